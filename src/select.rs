//! Best-server selection over latency and eligibility data.
//!
//! Only a bounded prefix of the eligible candidates is probed, to keep the
//! cost of one selection predictable. Availability takes priority over
//! speed: when no probe in the prefix succeeds, the first eligible
//! candidate is returned regardless of latency.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Settings;
use crate::probe::LatencyProber;
use crate::server::ServerCandidate;

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("no eligible servers in candidate list")]
    NoEligibleServers,
}

/// Picks a connection candidate from latency measurements and eligibility
/// flags.
pub struct BestServerSelector {
    prober: Arc<LatencyProber>,
    probe_prefix: usize,
}

impl BestServerSelector {
    pub fn new(settings: &Settings, prober: Arc<LatencyProber>) -> Self {
        Self {
            prober,
            probe_prefix: settings.selector_probe_prefix.max(1),
        }
    }

    /// Select the best candidate: lowest measured latency among the probed
    /// prefix of eligible servers, ties broken by original list order.
    pub async fn select_best(
        &self,
        candidates: &[ServerCandidate],
    ) -> Result<ServerCandidate, SelectError> {
        let eligible: Vec<&ServerCandidate> =
            candidates.iter().filter(|c| c.is_eligible()).collect();
        if eligible.is_empty() {
            return Err(SelectError::NoEligibleServers);
        }

        let prefix: Vec<ServerCandidate> = eligible
            .iter()
            .take(self.probe_prefix)
            .map(|c| (*c).clone())
            .collect();
        let latencies = self.prober.probe_all(&prefix).await;

        let mut best: Option<(&ServerCandidate, u32)> = None;
        for candidate in &prefix {
            if let Some(&latency) = latencies.get(&candidate.id) {
                // Strict comparison keeps the first occurrence on ties.
                if best.map_or(true, |(_, best_latency)| latency < best_latency) {
                    best = Some((candidate, latency));
                }
            }
        }

        match best {
            Some((candidate, latency)) => {
                info!(server = %candidate.id, latency_ms = latency, "selected best server");
                Ok(candidate.clone())
            }
            None => {
                // No probe data at all: availability beats speed.
                debug!(
                    server = %eligible[0].id,
                    "no successful probe in prefix, falling back to first eligible"
                );
                Ok(eligible[0].clone())
            }
        }
    }
}
