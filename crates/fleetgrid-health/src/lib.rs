//! fleetgrid-health: post-deployment health verification for FleetGrid.
//!
//! After a fleet-wide deploy succeeds, the orchestrator probes exactly one
//! representative target (bounding latency on large fleets) once a fixed
//! settle delay has let the service process restart.
//!
//! # Architecture
//!
//! ```text
//! HealthVerifier
//!   ├── settle delay (tokio::time::sleep, paused clock in tests)
//!   ├── Probe trait → ProbeResult, retried up to ProbeSpec::attempts()
//!   │   └── HttpProber → http_probe() (hyper, plain HTTP/1.1 GET)
//!   └── HealthResult recorded on the DeploymentRun
//! ```
//!
//! Command probes (run a command set on the target) are provided by
//! `fleetgrid-rollout`, which owns the remote command executor.

pub mod checker;
pub mod verifier;

pub use checker::{ProbeResult, http_probe, probe_address};
pub use verifier::{HealthVerifier, HttpProber, Probe};
