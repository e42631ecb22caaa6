//! Classification of the provider's raw status strings.
//!
//! The vocabulary is closed: {connected, connecting, disconnected,
//! reconnecting, stopped}, matched case-insensitively. Anything else is
//! carried as `Unknown` so diagnostics keep the original value — never
//! silently aliased to connected or disconnected.

/// Normalized classification of a raw provider status value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    Connected,
    Connecting,
    Disconnected,
    Reconnecting,
    Stopped,
    /// Unrecognized value, preserved verbatim for diagnostics.
    Unknown(String),
}

impl StatusKind {
    /// Classify a raw status string from the provider.
    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("connected") {
            Self::Connected
        } else if trimmed.eq_ignore_ascii_case("connecting") {
            Self::Connecting
        } else if trimmed.eq_ignore_ascii_case("disconnected") {
            Self::Disconnected
        } else if trimmed.eq_ignore_ascii_case("reconnecting") {
            Self::Reconnecting
        } else if trimmed.eq_ignore_ascii_case("stopped") {
            Self::Stopped
        } else {
            Self::Unknown(raw.to_string())
        }
    }

    /// The tunnel is down or on its way down.
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Stopped)
    }
}
