//! Seam to the platform tunnel engine.
//!
//! The actual tunneling stack (native SDK, platform channel, kernel
//! extension) lives outside this crate; everything here talks to it through
//! [`TunnelProvider`]. The adapter never retries — retry and backoff belong
//! to the connection engine.

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Platform-specific initialization data, passed through opaquely.
#[derive(Debug, Clone, Default)]
pub struct PlatformParams {
    /// Free-form key/value pairs the platform adapter understands.
    pub values: Vec<(String, String)>,
}

/// Contract with the underlying tunnel engine.
///
/// `initialize` is idempotent: calls after the first are no-ops. All other
/// operations may fail with a provider-specific error surfaced as
/// `anyhow::Error`.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn initialize(&self, params: PlatformParams) -> anyhow::Result<()>;

    /// Bring the tunnel up with the given configuration.
    async fn connect(
        &self,
        raw_config: &str,
        remark: &str,
        blocked_apps: &[String],
    ) -> anyhow::Result<()>;

    /// Tear the tunnel down.
    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Current raw status string as reported by the engine.
    async fn current_status(&self) -> anyhow::Result<String>;

    /// Raw status change stream. Each call returns an independent receiver;
    /// values are the engine's own vocabulary, normalized by the caller.
    fn status_stream(&self) -> broadcast::Receiver<String>;

    /// Measure round-trip delay for a config without connecting (ms).
    async fn probe_delay(&self, raw_config: &str) -> anyhow::Result<u32>;

    /// Measure round-trip delay over the currently connected tunnel (ms).
    async fn probe_connected_delay(&self) -> anyhow::Result<u32>;

    /// Ask the platform for tunnel permission (e.g. VPN consent dialog).
    async fn request_permission(&self) -> anyhow::Result<bool>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory provider for exercising the connection engine.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Scripted provider: records calls, emits statuses on demand.
    pub struct FakeProvider {
        status_tx: broadcast::Sender<String>,
        pub initialized: AtomicBool,
        pub connect_calls: AtomicUsize,
        pub disconnect_calls: AtomicUsize,
        /// (raw_config, remark, blocked_apps) for each connect call.
        pub connect_args: Mutex<Vec<(String, String, Vec<String>)>>,
        /// When set, connect() fails with this message.
        pub fail_connect: Mutex<Option<String>>,
    }

    impl FakeProvider {
        pub fn new() -> Self {
            let (status_tx, _) = broadcast::channel(64);
            Self {
                status_tx,
                initialized: AtomicBool::new(false),
                connect_calls: AtomicUsize::new(0),
                disconnect_calls: AtomicUsize::new(0),
                connect_args: Mutex::new(Vec::new()),
                fail_connect: Mutex::new(None),
            }
        }

        /// Push a raw status value to all stream subscribers.
        pub fn emit_status(&self, raw: &str) {
            let _ = self.status_tx.send(raw.to_string());
        }
    }

    #[async_trait]
    impl TunnelProvider for FakeProvider {
        async fn initialize(&self, _params: PlatformParams) -> anyhow::Result<()> {
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn connect(
            &self,
            raw_config: &str,
            remark: &str,
            blocked_apps: &[String],
        ) -> anyhow::Result<()> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            self.connect_args.lock().unwrap().push((
                raw_config.to_string(),
                remark.to_string(),
                blocked_apps.to_vec(),
            ));
            if let Some(msg) = self.fail_connect.lock().unwrap().clone() {
                anyhow::bail!(msg);
            }
            Ok(())
        }

        async fn disconnect(&self) -> anyhow::Result<()> {
            self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn current_status(&self) -> anyhow::Result<String> {
            Ok("disconnected".to_string())
        }

        fn status_stream(&self) -> broadcast::Receiver<String> {
            self.status_tx.subscribe()
        }

        async fn probe_delay(&self, _raw_config: &str) -> anyhow::Result<u32> {
            Ok(42)
        }

        async fn probe_connected_delay(&self) -> anyhow::Result<u32> {
            Ok(17)
        }

        async fn request_permission(&self) -> anyhow::Result<bool> {
            Ok(true)
        }
    }
}
