//! Relay server candidates as fetched from the Zenith API.
//!
//! Candidates are immutable once fetched; this crate only reads them.
//! Fetching and persisting the list is the repository layer's job.

use serde::{Deserialize, Serialize};

/// A single relay candidate from the server list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCandidate {
    /// Opaque stable id assigned by the backend.
    pub id: String,
    /// Network address (hostname or IP literal).
    pub host: String,
    pub port: u16,
    /// Advertised tunnel protocol (e.g. "vless", "trojan").
    pub protocol: String,
    /// Static availability flag from the server list.
    pub available: bool,
    /// Restricted to premium-tier accounts.
    pub premium_only: bool,
}

impl ServerCandidate {
    /// `host:port` endpoint string for probing.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Eligible for automatic selection: available and not premium-gated.
    pub fn is_eligible(&self) -> bool {
        self.available && !self.premium_only
    }
}
