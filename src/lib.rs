//! Client core for a tunnel service: connection lifecycle management plus
//! server health tracking.
//!
//! Two halves:
//!
//! - [`engine::ConnectionEngine`] drives the tunnel through a platform
//!   [`provider::TunnelProvider`], owning the connection state machine and
//!   reconnect-with-last-parameters.
//! - The health subsystem measures reachability ([`probe::LatencyProber`]),
//!   tracks pushed per-server status ([`status::LiveStatusCache`]) and picks
//!   a candidate to connect to ([`select::BestServerSelector`]).
//!
//! Everything is constructed explicitly and wired by the embedding
//! application; there are no globals. Long-running tasks stop through their
//! owner's `dispose()` or on drop.

pub mod config;
pub mod engine;
pub mod probe;
pub mod provider;
pub mod select;
pub mod server;
pub mod status;

pub use config::Settings;
pub use engine::{ConnectionEngine, ConnectionParams, ConnectionState, EngineError};
pub use probe::{cache::LatencyCache, transport::ProbeTransport, LatencyProber};
pub use provider::{PlatformParams, TunnelProvider};
pub use select::{BestServerSelector, SelectError};
pub use server::ServerCandidate;
pub use status::{event::StatusEvent, event::StatusUpdate, LiveStatusCache, StatusEventSource};
