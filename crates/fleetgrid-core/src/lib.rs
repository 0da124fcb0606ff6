pub mod config;
pub mod duration;
pub mod types;

pub use config::{
    CommandsConfig, ConflictPolicy, FleetConfig, GatePolicy, GroupConfig, NotifyConfig,
    OrchestratorConfig, PollConfig, ProbeSpec, RegistryConfig,
};
pub use duration::parse_duration;
pub use types::*;
