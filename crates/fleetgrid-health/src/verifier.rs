//! Health verifier: settle, then probe one representative target.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fleetgrid_core::{ProbeSpec, Target, epoch_millis, parse_duration};
use fleetgrid_state::HealthResult;

use crate::checker::{ProbeResult, http_probe, probe_address};

/// A single functional check against one target.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &Target, spec: &ProbeSpec) -> ProbeResult;
}

/// Runs `ProbeSpec::Http` probes. Command probes are not its business.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpProber;

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, target: &Target, spec: &ProbeSpec) -> ProbeResult {
        let ProbeSpec::Http {
            path, port, timeout, ..
        } = spec
        else {
            warn!(target = %target.id, "http prober handed a non-http probe");
            return ProbeResult::Failed;
        };
        let Some(address) = target.address.as_deref() else {
            warn!(target = %target.id, "target has no address to probe");
            return ProbeResult::Failed;
        };
        let timeout = parse_duration(timeout).unwrap_or(Duration::from_secs(5));
        http_probe(&probe_address(address, *port), path, timeout).await
    }
}

/// Verifies a freshly deployed group through one representative target.
#[derive(Clone)]
pub struct HealthVerifier {
    prober: Arc<dyn Probe>,
}

impl HealthVerifier {
    pub fn new(prober: Arc<dyn Probe>) -> Self {
        Self { prober }
    }

    /// The target that stands in for the whole group: the first resolved one.
    pub fn representative(targets: &[Target]) -> Option<&Target> {
        targets.first()
    }

    /// Wait `settle`, then probe `target` up to `spec.attempts()` times.
    pub async fn verify(&self, target: &Target, spec: &ProbeSpec, settle: Duration) -> HealthResult {
        debug!(target = %target.id, ?settle, "waiting for service to settle");
        tokio::time::sleep(settle).await;

        let attempts = spec.attempts();
        let mut last = ProbeResult::Failed;
        for attempt in 1..=attempts {
            last = self.prober.probe(target, spec).await;
            if last.passed() {
                info!(target = %target.id, attempt, "health probe passed");
                return HealthResult {
                    target: target.id.clone(),
                    passed: true,
                    attempts: attempt,
                    detail: "healthy".to_string(),
                    checked_at: epoch_millis(),
                };
            }
            debug!(target = %target.id, attempt, result = ?last, "health probe did not pass");
            if attempt < attempts {
                tokio::time::sleep(spec.retry_interval()).await;
            }
        }

        warn!(target = %target.id, attempts, result = ?last, "health probe failed");
        HealthResult {
            target: target.id.clone(),
            passed: false,
            attempts,
            detail: match last {
                ProbeResult::Unhealthy => "unhealthy response".to_string(),
                _ => "probe could not be executed".to_string(),
            },
            checked_at: epoch_millis(),
        }
    }
}
