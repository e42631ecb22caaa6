//! Concurrency-bounded latency sweeps over relay candidates.
//!
//! A sweep partitions candidates into fixed-size batches of the concurrency
//! bound; probes within a batch run in parallel, batches run sequentially,
//! so at most N probes are ever in flight. Results merge into the
//! TTL-bounded [`LatencyCache`]. A periodic schedule re-sweeps the most
//! recently supplied candidate set; starting a new schedule cancels the
//! previous one.

pub mod cache;
pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::server::ServerCandidate;

use cache::LatencyCache;
use transport::{ProbeTransport, TcpProbe};

struct Schedule {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Probes candidate relays and caches the measured round-trip latencies.
pub struct LatencyProber {
    transport: Arc<dyn ProbeTransport>,
    cache: LatencyCache,
    probe_timeout: Duration,
    concurrency: usize,
    interval: Duration,
    sweep_in_progress: AtomicBool,
    disposed: AtomicBool,
    /// Candidate set used by the periodic schedule.
    candidates: ArcSwap<Vec<ServerCandidate>>,
    schedule: Mutex<Option<Schedule>>,
}

impl LatencyProber {
    pub fn new(settings: &Settings) -> Arc<Self> {
        Self::with_transport(settings, Arc::new(TcpProbe))
    }

    /// Construct with an injected probe transport (tests, platform overrides).
    pub fn with_transport(settings: &Settings, transport: Arc<dyn ProbeTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            cache: LatencyCache::new(
                settings.latency_cache_ttl(),
                settings.latency_cache_capacity,
            ),
            probe_timeout: settings.probe_timeout(),
            concurrency: settings.probe_concurrency.max(1),
            interval: settings.probe_interval(),
            sweep_in_progress: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            candidates: ArcSwap::from_pointee(Vec::new()),
            schedule: Mutex::new(None),
        })
    }

    /// Probe a single endpoint. Any failure yields `None`.
    pub async fn probe_one(&self, host: &str, port: u16) -> Option<u32> {
        self.transport.probe(host, port, self.probe_timeout).await
    }

    /// Sweep the given candidates in bounded batches and merge successful
    /// measurements into the cache.
    ///
    /// If a sweep is already in progress the call does not start another
    /// one — overlapping sweeps would double the concurrency pressure — and
    /// returns the current fresh cache snapshot instead.
    pub async fn probe_all(&self, candidates: &[ServerCandidate]) -> HashMap<String, u32> {
        if self
            .sweep_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sweep already in progress, returning cache snapshot");
            return self.cache.snapshot().await;
        }

        let mut results = HashMap::new();
        for batch in candidates.chunks(self.concurrency) {
            let probes = batch.iter().map(|candidate| {
                let transport = Arc::clone(&self.transport);
                let timeout = self.probe_timeout;
                async move {
                    let latency = transport.probe(&candidate.host, candidate.port, timeout).await;
                    (candidate.id.clone(), latency)
                }
            });
            for (id, latency) in join_all(probes).await {
                if let Some(latency_ms) = latency {
                    results.insert(id, latency_ms);
                }
            }
        }

        // A dispose while the sweep was in flight discards its results.
        if self.disposed.load(Ordering::Acquire) {
            debug!("prober disposed during sweep, discarding results");
            self.sweep_in_progress.store(false, Ordering::Release);
            return HashMap::new();
        }

        for (id, latency_ms) in &results {
            self.cache.insert(id, *latency_ms).await;
        }
        debug!(
            probed = candidates.len(),
            reachable = results.len(),
            "sweep finished"
        );

        self.sweep_in_progress.store(false, Ordering::Release);
        results
    }

    /// Replace the candidate set used by the periodic schedule.
    pub fn set_candidates(&self, candidates: Vec<ServerCandidate>) {
        self.candidates.store(Arc::new(candidates));
    }

    /// Start (or restart) periodic re-probing of the stored candidate set.
    ///
    /// Any previously running schedule is cancelled first, so there is never
    /// more than one timer.
    pub fn start_periodic(self: &Arc<Self>, candidates: Vec<ServerCandidate>) {
        self.set_candidates(candidates);
        self.disposed.store(false, Ordering::Release);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let prober = Arc::clone(self);
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let candidates = prober.candidates.load_full();
                        if candidates.is_empty() {
                            continue;
                        }
                        prober.probe_all(&candidates).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("periodic probe schedule shutting down");
                        break;
                    }
                }
            }
        });

        let previous = self.schedule.lock().unwrap().replace(Schedule {
            shutdown_tx,
            handle,
        });
        if let Some(old) = previous {
            info!("replacing existing probe schedule");
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
    }

    /// Stop the periodic schedule, if one is running. Idempotent.
    pub fn stop_periodic(&self) {
        if let Some(schedule) = self.schedule.lock().unwrap().take() {
            let _ = schedule.shutdown_tx.send(true);
            schedule.handle.abort();
        }
    }

    /// Cancel the schedule and clear cached state. Idempotent; probes
    /// already in flight complete but their results are discarded.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_periodic();
        self.cache.clear().await;
        info!("latency prober disposed");
    }

    // Cache read accessors.

    /// All fresh measurements.
    pub async fn cached_results(&self) -> HashMap<String, u32> {
        self.cache.snapshot().await
    }

    /// Fresh latency for one server, if any.
    pub async fn get_latency(&self, server_id: &str) -> Option<u32> {
        self.cache.get(server_id).await
    }

    /// Whether a fresh measurement exists for this server.
    pub async fn is_fresh(&self, server_id: &str) -> bool {
        self.cache.is_fresh(server_id).await
    }
}

impl Drop for LatencyProber {
    fn drop(&mut self) {
        // Last-resort cancellation when dispose() was never called.
        if let Ok(mut guard) = self.schedule.lock() {
            if let Some(schedule) = guard.take() {
                let _ = schedule.shutdown_tx.send(true);
                schedule.handle.abort();
                warn!("latency prober dropped without dispose, schedule cancelled");
            }
        }
    }
}
