//! Single-candidate reachability probe.
//!
//! One probe is a TCP connect against `host:port` with a fixed timeout; the
//! measured value is the elapsed time until the connection is established.
//! Every failure mode (refusal, timeout, DNS failure) yields `None` — a
//! probe never errors out to the caller.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Probe seam so sweeps can be exercised with an instrumented fake.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Connect-and-measure. `None` means "no successful probe", which is
    /// distinct from a 0 ms measurement.
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Option<u32>;
}

/// Default transport: plain TCP connect via the tokio resolver.
pub struct TcpProbe;

#[async_trait]
impl ProbeTransport for TcpProbe {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Option<u32> {
        let endpoint = format!("{}:{}", host, port);
        let started = tokio::time::Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect(&endpoint)).await {
            Ok(Ok(_stream)) => {
                let elapsed_ms = started.elapsed().as_millis().min(u32::MAX as u128) as u32;
                debug!(endpoint = %endpoint, latency_ms = elapsed_ms, "probe succeeded");
                Some(elapsed_ms)
            }
            Ok(Err(e)) => {
                debug!(endpoint = %endpoint, error = %e, "probe failed");
                None
            }
            Err(_) => {
                debug!(endpoint = %endpoint, timeout_ms = timeout.as_millis(), "probe timed out");
                None
            }
        }
    }
}
