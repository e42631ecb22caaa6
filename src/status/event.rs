//! Raw push events and the normalized updates derived from them.
//!
//! The backend pushes loosely-shaped status-change events; numeric extras
//! are extracted defensively — a missing or non-numeric field becomes
//! `None`, never a parse failure that aborts processing.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw status-change event as delivered by the push source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub server_id: String,
    pub status: String,
    /// Loosely-typed extras (load, user counts, future fields).
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,
}

/// Normalized per-server status derived from a [`StatusEvent`].
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub server_id: String,
    pub raw_status: String,
    /// `true` iff the raw status is "online" (case-insensitive). Every
    /// other value, recognized or not, means unavailable.
    pub available: bool,
    /// Load fraction in [0, 1], when the backend reported one.
    pub load: Option<f64>,
    /// Active user count, when the backend reported one.
    pub current_users: Option<u64>,
    pub received_at: SystemTime,
}

impl StatusUpdate {
    /// Derive a normalized update from a raw event.
    pub fn from_event(event: &StatusEvent) -> Self {
        Self {
            server_id: event.server_id.clone(),
            raw_status: event.status.clone(),
            available: event.status.trim().eq_ignore_ascii_case("online"),
            load: extract_f64(&event.extra, "load").filter(|v| (0.0..=1.0).contains(v)),
            current_users: extract_u64(&event.extra, "current_users"),
            received_at: SystemTime::now(),
        }
    }
}

/// Pull a float out of a loosely-typed field (number or numeric string).
fn extract_f64(extra: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    match extra.get(key)? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Pull an unsigned count out of a loosely-typed field.
fn extract_u64(extra: &serde_json::Map<String, Value>, key: &str) -> Option<u64> {
    match extra.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
