//! Tunnel connection lifecycle state machine.
//!
//! The engine owns the [`ConnectionState`] and is its only mutator; callers
//! observe it through a watch channel. It subscribes to the provider's raw
//! status stream exactly once, classifies each value, drops consecutive
//! duplicates, and maps the result onto the state machine. The last
//! connection parameters are retained so `reconnect()` works after an
//! error; they are cleared only by `dispose()`, never by an ordinary
//! disconnect.

pub mod status;

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::provider::{PlatformParams, TunnelProvider};

use status::StatusKind;

/// Lifecycle state of the tunnel. Exactly one value is active at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected {
        server: String,
        protocol: String,
        since: SystemTime,
    },
    Disconnecting,
    Reconnecting,
    Error(String),
}

/// Parameters of the most recent connect attempt, retained for reconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub raw_config: String,
    /// Human-readable server label shown in the Connected state.
    pub remark: String,
    /// Advertised protocol of the chosen candidate.
    pub protocol: String,
    /// Apps excluded from the tunnel (platform split-tunneling).
    pub blocked_apps: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `reconnect()` was called before any successful `connect()`.
    #[error("no prior session to reconnect")]
    NoPriorSession,
    #[error("tunnel provider error: {0:#}")]
    Provider(#[source] anyhow::Error),
}

struct EngineInner {
    last_params: Option<ConnectionParams>,
    /// A connect or reconnect attempt has been issued and has not yet
    /// reached Connected. A down-status in this window is an error, not a
    /// clean disconnect.
    attempt_active: bool,
}

struct Pump {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the tunnel lifecycle; all state mutations go through here.
pub struct ConnectionEngine {
    provider: Arc<dyn TunnelProvider>,
    state_tx: watch::Sender<ConnectionState>,
    inner: Mutex<EngineInner>,
    pump: std::sync::Mutex<Option<Pump>>,
}

impl ConnectionEngine {
    pub fn new(provider: Arc<dyn TunnelProvider>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            provider,
            state_tx,
            inner: Mutex::new(EngineInner {
                last_params: None,
                attempt_active: false,
            }),
            pump: std::sync::Mutex::new(None),
        })
    }

    /// Initialize the provider and subscribe to its status stream.
    ///
    /// Subscribing happens exactly once; repeated calls are no-ops (the
    /// provider's own `initialize` is idempotent as well).
    pub async fn start(self: &Arc<Self>, platform: PlatformParams) -> Result<(), EngineError> {
        self.provider
            .initialize(platform)
            .await
            .map_err(EngineError::Provider)?;

        let mut guard = self.pump.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status_rx = self.provider.status_stream();
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.run_pump(status_rx, shutdown_rx).await;
        });
        *guard = Some(Pump {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Observe the deduplicated state stream.
    pub fn state_stream(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Bring the tunnel up; records the parameters for later reconnect.
    pub async fn connect(&self, params: ConnectionParams) -> Result<(), EngineError> {
        {
            let mut inner = self.inner.lock().await;
            inner.last_params = Some(params.clone());
            inner.attempt_active = true;
        }
        self.publish(ConnectionState::Connecting);
        info!(server = %params.remark, "connecting tunnel");

        match self
            .provider
            .connect(&params.raw_config, &params.remark, &params.blocked_apps)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.lock().await.attempt_active = false;
                self.publish(ConnectionState::Error(format!("connect failed: {e:#}")));
                Err(EngineError::Provider(e))
            }
        }
    }

    /// Tear the tunnel down. Retained parameters survive, so `reconnect()`
    /// stays possible afterwards.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.inner.lock().await.attempt_active = false;
        self.publish(ConnectionState::Disconnecting);
        info!("disconnecting tunnel");

        match self.provider.disconnect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.publish(ConnectionState::Error(format!("disconnect failed: {e:#}")));
                Err(EngineError::Provider(e))
            }
        }
    }

    /// Disconnect, then connect again with the retained parameters.
    ///
    /// Fails with [`EngineError::NoPriorSession`] — without touching the
    /// provider — when no parameters are retained.
    pub async fn reconnect(&self) -> Result<(), EngineError> {
        let params = {
            let mut inner = self.inner.lock().await;
            let params = inner
                .last_params
                .clone()
                .ok_or(EngineError::NoPriorSession)?;
            inner.attempt_active = true;
            params
        };
        self.publish(ConnectionState::Reconnecting);
        info!(server = %params.remark, "reconnecting tunnel");

        if let Err(e) = self.provider.disconnect().await {
            self.inner.lock().await.attempt_active = false;
            self.publish(ConnectionState::Error(format!("reconnect failed: {e:#}")));
            return Err(EngineError::Provider(e));
        }
        match self
            .provider
            .connect(&params.raw_config, &params.remark, &params.blocked_apps)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.lock().await.attempt_active = false;
                self.publish(ConnectionState::Error(format!("reconnect failed: {e:#}")));
                Err(EngineError::Provider(e))
            }
        }
    }

    /// Round-trip delay over the live tunnel (ms).
    pub async fn current_delay(&self) -> Result<u32, EngineError> {
        self.provider
            .probe_connected_delay()
            .await
            .map_err(EngineError::Provider)
    }

    /// Stop the status subscription and drop the retained parameters.
    /// Idempotent. In-flight provider calls are not interrupted.
    pub async fn dispose(&self) {
        if let Some(pump) = self.pump.lock().unwrap().take() {
            let _ = pump.shutdown_tx.send(true);
            pump.handle.abort();
        }
        let mut inner = self.inner.lock().await;
        inner.last_params = None;
        inner.attempt_active = false;
        info!("connection engine disposed");
    }

    async fn run_pump(
        self: Arc<Self>,
        mut status_rx: broadcast::Receiver<String>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut last_kind: Option<StatusKind> = None;
        loop {
            tokio::select! {
                received = status_rx.recv() => {
                    match received {
                        Ok(raw) => {
                            let kind = StatusKind::classify(&raw);
                            if last_kind.as_ref() == Some(&kind) {
                                // Consecutive identical classification.
                                continue;
                            }
                            last_kind = Some(kind.clone());
                            self.on_status(kind).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "provider status stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("provider status stream closed");
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
    }

    /// Map one classified status onto the state machine.
    async fn on_status(&self, kind: StatusKind) {
        let mut inner = self.inner.lock().await;
        match kind {
            StatusKind::Connected => {
                inner.attempt_active = false;
                let (server, protocol) = inner
                    .last_params
                    .as_ref()
                    .map(|p| (p.remark.clone(), p.protocol.clone()))
                    .unwrap_or_default();
                self.publish(ConnectionState::Connected {
                    server,
                    protocol,
                    since: SystemTime::now(),
                });
            }
            StatusKind::Connecting => self.publish(ConnectionState::Connecting),
            StatusKind::Reconnecting => self.publish(ConnectionState::Reconnecting),
            StatusKind::Disconnected | StatusKind::Stopped => {
                if inner.attempt_active {
                    // Never reached Connected: this attempt failed.
                    inner.attempt_active = false;
                    self.publish(ConnectionState::Error(
                        "tunnel closed before session was established".to_string(),
                    ));
                } else {
                    self.publish(ConnectionState::Disconnected);
                }
            }
            StatusKind::Unknown(raw) => {
                warn!(raw = %raw, "unrecognized provider status");
                self.publish(ConnectionState::Error(format!(
                    "unrecognized provider status '{}'",
                    raw
                )));
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(state = ?state, "connection state changed");
            *current = state;
            true
        });
    }
}

impl Drop for ConnectionEngine {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.pump.lock() {
            if let Some(pump) = guard.take() {
                let _ = pump.shutdown_tx.send(true);
                pump.handle.abort();
            }
        }
    }
}
