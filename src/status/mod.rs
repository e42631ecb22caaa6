//! Live per-server status fed by the backend's push-event stream.
//!
//! A single pump task consumes raw events in receipt order, derives a
//! normalized [`StatusUpdate`] for each, stores the latest update per
//! server in a bounded map, and re-publishes it to any number of
//! subscribers. A malformed event is logged and skipped; it never tears
//! down the subscription.

pub mod event;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;

use event::{StatusEvent, StatusUpdate};

/// Connect/disconnect-able push channel delivering status-change events.
#[async_trait]
pub trait StatusEventSource: Send + Sync {
    async fn connect(&self) -> anyhow::Result<()>;
    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Event stream. Each call returns an independent receiver delivering
    /// events from the point of subscription onward.
    fn events(&self) -> broadcast::Receiver<StatusEvent>;
}

struct CacheSlot {
    update: StatusUpdate,
    /// Monotonic insertion rank; fixed at first write.
    inserted_seq: u64,
}

struct Pump {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Bounded latest-status-per-server cache with fan-out re-publishing.
pub struct LiveStatusCache {
    source: Arc<dyn StatusEventSource>,
    capacity: usize,
    entries: Arc<RwLock<HashMap<String, CacheSlot>>>,
    next_seq: std::sync::atomic::AtomicU64,
    updates_tx: broadcast::Sender<StatusUpdate>,
    pump: Mutex<Option<Pump>>,
}

impl LiveStatusCache {
    pub fn new(settings: &Settings, source: Arc<dyn StatusEventSource>) -> Arc<Self> {
        let (updates_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            source,
            capacity: settings.status_cache_capacity,
            entries: Arc::new(RwLock::new(HashMap::new())),
            next_seq: std::sync::atomic::AtomicU64::new(0),
            updates_tx,
            pump: Mutex::new(None),
        })
    }

    /// Connect the underlying event stream and start the pump task.
    pub async fn connect(self: &Arc<Self>) -> anyhow::Result<()> {
        self.source.connect().await?;
        self.start_pump();
        Ok(())
    }

    /// Stop the pump and disconnect the underlying event stream.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.stop_pump();
        self.source.disconnect().await
    }

    /// Subscribe to normalized updates. Every subscriber receives every
    /// re-published update from subscription onward.
    pub fn status_updates(&self) -> broadcast::Receiver<StatusUpdate> {
        self.updates_tx.subscribe()
    }

    /// Most recent update for one server, if any.
    pub async fn latest_status(&self, server_id: &str) -> Option<StatusUpdate> {
        self.entries
            .read()
            .await
            .get(server_id)
            .map(|slot| slot.update.clone())
    }

    /// Most recent update per server.
    pub async fn latest_statuses(&self) -> HashMap<String, StatusUpdate> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.update.clone()))
            .collect()
    }

    /// Stop the pump task. Idempotent.
    pub fn dispose(&self) {
        self.stop_pump();
    }

    fn start_pump(self: &Arc<Self>) {
        let mut guard = self.pump.lock().unwrap();
        if guard.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut events = self.source.events();
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => {
                        match received {
                            Ok(event) => cache.apply_event(&event).await,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                // Isolated failure: later events still flow.
                                warn!(skipped, "status event stream lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                info!("status event stream closed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("status pump shutting down");
                        break;
                    }
                }
            }
        });

        *guard = Some(Pump {
            shutdown_tx,
            handle,
        });
    }

    fn stop_pump(&self) {
        if let Some(pump) = self.pump.lock().unwrap().take() {
            let _ = pump.shutdown_tx.send(true);
            pump.handle.abort();
        }
    }

    /// Derive, store, and re-publish one event.
    async fn apply_event(&self, event: &StatusEvent) {
        if event.server_id.trim().is_empty() {
            warn!(status = %event.status, "dropping status event with empty server id");
            return;
        }

        let update = StatusUpdate::from_event(event);
        {
            let mut entries = self.entries.write().await;
            if let Some(slot) = entries.get_mut(&update.server_id) {
                // Existing id: overwrite in place, size and rank unchanged.
                slot.update = update.clone();
            } else {
                while entries.len() >= self.capacity {
                    let oldest_key = entries
                        .iter()
                        .min_by_key(|(_, slot)| slot.inserted_seq)
                        .map(|(key, _)| key.clone());
                    match oldest_key {
                        Some(key) => {
                            entries.remove(&key);
                        }
                        None => break,
                    }
                }
                let seq = self
                    .next_seq
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                entries.insert(
                    update.server_id.clone(),
                    CacheSlot {
                        update: update.clone(),
                        inserted_seq: seq,
                    },
                );
            }
        }

        debug!(
            server = %update.server_id,
            status = %update.raw_status,
            available = update.available,
            "status update applied"
        );
        // No subscribers is fine; the cache remains readable.
        let _ = self.updates_tx.send(update);
    }
}

impl Drop for LiveStatusCache {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.pump.lock() {
            if let Some(pump) = guard.take() {
                let _ = pump.shutdown_tx.send(true);
                pump.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeEventSource {
        events_tx: broadcast::Sender<StatusEvent>,
        connect_calls: AtomicUsize,
        disconnect_calls: AtomicUsize,
    }

    impl FakeEventSource {
        fn new() -> Self {
            let (events_tx, _) = broadcast::channel(64);
            Self {
                events_tx,
                connect_calls: AtomicUsize::new(0),
                disconnect_calls: AtomicUsize::new(0),
            }
        }

        fn emit(&self, server_id: &str, status: &str) {
            self.emit_with_extra(server_id, status, serde_json::Map::new());
        }

        fn emit_with_extra(
            &self,
            server_id: &str,
            status: &str,
            extra: serde_json::Map<String, serde_json::Value>,
        ) {
            let _ = self.events_tx.send(StatusEvent {
                server_id: server_id.to_string(),
                status: status.to_string(),
                extra,
            });
        }
    }

    #[async_trait]
    impl StatusEventSource for FakeEventSource {
        async fn connect(&self) -> anyhow::Result<()> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> anyhow::Result<()> {
            self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn events(&self) -> broadcast::Receiver<StatusEvent> {
            self.events_tx.subscribe()
        }
    }

    fn settings_with_capacity(capacity: usize) -> Settings {
        Settings {
            status_cache_capacity: capacity,
            ..Default::default()
        }
    }

    /// Wait until `n` updates have been re-published on the given receiver.
    async fn drain(rx: &mut broadcast::Receiver<StatusUpdate>, n: usize) -> Vec<StatusUpdate> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let update = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for status update")
                .expect("update stream closed");
            out.push(update);
        }
        out
    }

    #[tokio::test]
    async fn test_connect_delegates_and_updates_flow() {
        let source = Arc::new(FakeEventSource::new());
        let cache = LiveStatusCache::new(&settings_with_capacity(10), source.clone());

        cache.connect().await.unwrap();
        assert_eq!(source.connect_calls.load(Ordering::SeqCst), 1);

        let mut rx = cache.status_updates();
        source.emit("s1", "online");
        let updates = drain(&mut rx, 1).await;
        assert!(updates[0].available);

        let latest = cache.latest_status("s1").await.unwrap();
        assert_eq!(latest.raw_status, "online");
        assert!(latest.available);

        cache.disconnect().await.unwrap();
        assert_eq!(source.disconnect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_online_to_maintenance_flips_availability() {
        let source = Arc::new(FakeEventSource::new());
        let cache = LiveStatusCache::new(&settings_with_capacity(10), source.clone());
        cache.connect().await.unwrap();
        let mut rx = cache.status_updates();

        source.emit("s1", "online");
        source.emit("s1", "maintenance");
        drain(&mut rx, 2).await;

        let latest = cache.latest_status("s1").await.unwrap();
        assert_eq!(latest.raw_status, "maintenance");
        assert!(!latest.available);
    }

    #[tokio::test]
    async fn test_new_id_at_capacity_evicts_exactly_oldest() {
        let source = Arc::new(FakeEventSource::new());
        let cache = LiveStatusCache::new(&settings_with_capacity(3), source.clone());
        cache.connect().await.unwrap();
        let mut rx = cache.status_updates();

        source.emit("s1", "online");
        source.emit("s2", "online");
        source.emit("s3", "online");
        source.emit("s4", "online");
        drain(&mut rx, 4).await;

        let statuses = cache.latest_statuses().await;
        assert_eq!(statuses.len(), 3);
        assert!(!statuses.contains_key("s1"));
        assert!(statuses.contains_key("s2"));
        assert!(statuses.contains_key("s4"));
    }

    #[tokio::test]
    async fn test_existing_id_never_changes_cache_size() {
        let source = Arc::new(FakeEventSource::new());
        let cache = LiveStatusCache::new(&settings_with_capacity(3), source.clone());
        cache.connect().await.unwrap();
        let mut rx = cache.status_updates();

        source.emit("s1", "online");
        source.emit("s2", "online");
        source.emit("s3", "online");
        source.emit("s2", "degraded");
        drain(&mut rx, 4).await;

        let statuses = cache.latest_statuses().await;
        assert_eq!(statuses.len(), 3);
        assert!(!statuses["s2"].available);
        assert_eq!(statuses["s2"].raw_status, "degraded");
    }

    #[tokio::test]
    async fn test_malformed_event_is_skipped_without_killing_stream() {
        let source = Arc::new(FakeEventSource::new());
        let cache = LiveStatusCache::new(&settings_with_capacity(10), source.clone());
        cache.connect().await.unwrap();
        let mut rx = cache.status_updates();

        source.emit("", "online"); // malformed: no server id
        source.emit("s1", "online");
        let updates = drain(&mut rx, 1).await;

        assert_eq!(updates[0].server_id, "s1");
        assert!(cache.latest_status("s1").await.is_some());
        assert_eq!(cache.latest_statuses().await.len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_see_every_update() {
        let source = Arc::new(FakeEventSource::new());
        let cache = LiveStatusCache::new(&settings_with_capacity(10), source.clone());
        cache.connect().await.unwrap();

        let mut rx_a = cache.status_updates();
        let mut rx_b = cache.status_updates();

        source.emit("s1", "online");
        source.emit("s2", "offline");

        let seen_a = drain(&mut rx_a, 2).await;
        let seen_b = drain(&mut rx_b, 2).await;
        assert_eq!(seen_a[0].server_id, seen_b[0].server_id);
        assert_eq!(seen_a[1].server_id, seen_b[1].server_id);
        assert!(!seen_a[1].available);
    }

    #[tokio::test]
    async fn test_numeric_extras_survive_to_cache() {
        let source = Arc::new(FakeEventSource::new());
        let cache = LiveStatusCache::new(&settings_with_capacity(10), source.clone());
        cache.connect().await.unwrap();
        let mut rx = cache.status_updates();

        let extra: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"load": 0.25, "current_users": 40}"#).unwrap();
        source.emit_with_extra("s1", "online", extra);
        drain(&mut rx, 1).await;

        let latest = cache.latest_status("s1").await.unwrap();
        assert_eq!(latest.load, Some(0.25));
        assert_eq!(latest.current_users, Some(40));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_stops_processing() {
        let source = Arc::new(FakeEventSource::new());
        let cache = LiveStatusCache::new(&settings_with_capacity(10), source.clone());
        cache.connect().await.unwrap();
        let mut rx = cache.status_updates();

        source.emit("s1", "online");
        drain(&mut rx, 1).await;

        cache.dispose();
        cache.dispose();

        source.emit("s2", "online");
        tokio::task::yield_now().await;
        assert!(cache.latest_status("s2").await.is_none());
    }
}
