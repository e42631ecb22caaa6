//! Bounded latency result cache with per-entry TTL.
//!
//! Reads filter out stale entries; writes eagerly purge stale entries and
//! then evict by insertion order (oldest inserted first) while a new key
//! would exceed capacity. Overwriting an existing key keeps its original
//! insertion rank — eviction order is fixed at first write.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// One recorded measurement.
#[derive(Debug, Clone, Copy)]
pub struct LatencyMeasurement {
    pub latency_ms: u32,
    pub measured_at: Instant,
}

struct CacheEntry {
    latency_ms: u32,
    measured_at: Instant,
    inserted_at: Instant,
}

/// serverId -> latest successful measurement, TTL + capacity bounded.
pub struct LatencyCache {
    ttl: Duration,
    capacity: usize,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl LatencyCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record a successful probe with a fresh timestamp.
    pub async fn insert(&self, server_id: &str, latency_ms: u32) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| now.duration_since(entry.measured_at) < self.ttl);

        if let Some(existing) = entries.get_mut(server_id) {
            // Refresh the measurement but keep the original insertion rank.
            existing.latency_ms = latency_ms;
            existing.measured_at = now;
            return;
        }

        while entries.len() >= self.capacity {
            let oldest_key = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            match oldest_key {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }

        entries.insert(
            server_id.to_string(),
            CacheEntry {
                latency_ms,
                measured_at: now,
                inserted_at: now,
            },
        );
    }

    /// Fresh latency for one server, if any.
    pub async fn get(&self, server_id: &str) -> Option<u32> {
        let entries = self.entries.read().await;
        entries
            .get(server_id)
            .filter(|entry| entry.measured_at.elapsed() < self.ttl)
            .map(|entry| entry.latency_ms)
    }

    /// Whether a fresh (non-stale) measurement exists for this server.
    pub async fn is_fresh(&self, server_id: &str) -> bool {
        self.get(server_id).await.is_some()
    }

    /// Snapshot of all fresh measurements.
    pub async fn snapshot(&self) -> HashMap<String, u32> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|(_, entry)| entry.measured_at.elapsed() < self.ttl)
            .map(|(id, entry)| (id.clone(), entry.latency_ms))
            .collect()
    }

    /// Fresh measurements with their timestamps.
    pub async fn measurements(&self) -> HashMap<String, LatencyMeasurement> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|(_, entry)| entry.measured_at.elapsed() < self.ttl)
            .map(|(id, entry)| {
                (
                    id.clone(),
                    LatencyMeasurement {
                        latency_ms: entry.latency_ms,
                        measured_at: entry.measured_at,
                    },
                )
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Total entries including stale ones (stale entries linger until the
    /// next write purges them).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
