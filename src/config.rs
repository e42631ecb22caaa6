//! Client core settings with TOML file persistence.
//!
//! The host application decides where the file lives; defaults match the
//! production Zenith backend expectations.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the connection engine and health subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Per-probe TCP connect timeout in seconds.
    pub probe_timeout_secs: u64,
    /// Maximum simultaneous in-flight probes during a sweep.
    pub probe_concurrency: usize,
    /// Interval between periodic re-probe sweeps in seconds.
    pub probe_interval_secs: u64,
    /// Latency cache capacity (entries).
    pub latency_cache_capacity: usize,
    /// Latency cache entry TTL in seconds.
    pub latency_cache_ttl_secs: u64,
    /// Live status cache capacity (entries).
    pub status_cache_capacity: usize,
    /// How many eligible candidates the selector probes before picking.
    pub selector_probe_prefix: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 5,
            probe_concurrency: 10,
            probe_interval_secs: 30,
            latency_cache_capacity: 500,
            latency_cache_ttl_secs: 30,
            status_cache_capacity: 500,
            selector_probe_prefix: 5,
        }
    }
}

impl Settings {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.probe_concurrency == 0 {
            anyhow::bail!("probe_concurrency must be at least 1");
        }
        if self.probe_timeout_secs == 0 {
            anyhow::bail!("probe_timeout_secs must be at least 1");
        }
        if self.probe_interval_secs == 0 {
            anyhow::bail!("probe_interval_secs must be at least 1");
        }
        if self.latency_cache_capacity == 0 || self.status_cache_capacity == 0 {
            anyhow::bail!("cache capacities must be at least 1");
        }
        if self.selector_probe_prefix == 0 {
            anyhow::bail!("selector_probe_prefix must be at least 1");
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn latency_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.latency_cache_ttl_secs)
    }
}
