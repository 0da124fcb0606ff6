//! fleet.toml configuration parser.
//!
//! One `[groups.<name>]` table per target group carries the command sets and
//! probe for that group, so a single orchestrator serves every tier.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid group name '{0}': must be non-empty and free of '/' and ':'")]
    InvalidGroupName(String),

    #[error("group '{group}' has an empty {set} command set")]
    EmptyCommandSet { group: String, set: &'static str },

    #[error("invalid duration for {field}: '{value}'")]
    InvalidDuration { field: String, value: String },

    #[error("{field} must be at least 1")]
    ZeroAttempts { field: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    pub registry: Option<RegistryConfig>,
    pub commands: Option<CommandsConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
    /// Backups kept per target after a successful run.
    #[serde(default = "default_retention")]
    pub backup_retention: usize,
    #[serde(default)]
    pub gate: GatePolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            on_conflict: ConflictPolicy::default(),
            backup_retention: default_retention(),
            gate: GatePolicy::default(),
        }
    }
}

/// What a trigger does when its group already has an active run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Wait for the active run to finish, then run.
    #[default]
    Queue,
    /// Refuse the trigger.
    Reject,
}

/// Which non-successful build signals may still start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    #[serde(default = "default_true")]
    pub allow_manual: bool,
    #[serde(default)]
    pub allow_unsuccessful: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            allow_manual: true,
            allow_unsuccessful: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub url: String,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub timeout: String,
}

impl RegistryConfig {
    pub fn request_timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    pub url: String,
    #[serde(default = "default_dispatch_attempts")]
    pub dispatch_attempts: u32,
    #[serde(default = "default_dispatch_backoff")]
    pub dispatch_backoff: String,
    /// Per-request timeout for send, status and output calls.
    #[serde(default = "default_request_timeout")]
    pub timeout: String,
}

impl CommandsConfig {
    pub fn request_timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn dispatch_backoff(&self) -> Duration {
        parse_duration(&self.dispatch_backoff).unwrap_or(Duration::from_secs(2))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhook: Option<String>,
}

/// Per-group pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub deploy: Vec<String>,
    pub backup: Vec<String>,
    pub restore: Vec<String>,
    /// Delay between a successful deploy and the health probe.
    #[serde(default = "default_settle")]
    pub settle: String,
    #[serde(default = "PollConfig::long")]
    pub deploy_poll: PollConfig,
    #[serde(default = "PollConfig::short")]
    pub backup_poll: PollConfig,
    #[serde(default = "PollConfig::short")]
    pub restore_poll: PollConfig,
    pub probe: ProbeSpec,
}

impl GroupConfig {
    pub fn settle_delay(&self) -> Duration {
        parse_duration(&self.settle).unwrap_or(Duration::from_secs(10))
    }
}

/// Bounded polling: wait `interval` between polls, at most `max_attempts` polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval")]
    pub interval: String,
    pub max_attempts: u32,
}

impl PollConfig {
    /// Budget for dependency-install style operations (5 minutes).
    pub fn long() -> Self {
        Self {
            interval: default_poll_interval(),
            max_attempts: 60,
        }
    }

    /// Budget for reload style operations (1 minute).
    pub fn short() -> Self {
        Self {
            interval: default_poll_interval(),
            max_attempts: 12,
        }
    }

    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(5))
    }

    /// Total wall-clock budget, handed to the remote side as its own timeout.
    pub fn budget(&self) -> Duration {
        self.checked_budget().unwrap_or(Duration::MAX)
    }

    fn checked_budget(&self) -> Option<Duration> {
        parse_duration(&self.interval)?.checked_mul(self.max_attempts)
    }
}

/// How the health verifier checks the representative target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeSpec {
    /// GET `path` on the target's address; any 2xx passes.
    Http {
        path: String,
        port: Option<u16>,
        #[serde(default = "default_probe_timeout")]
        timeout: String,
        #[serde(default = "default_one")]
        attempts: u32,
        #[serde(default = "default_poll_interval")]
        interval: String,
    },
    /// Run `commands` on the target; a `succeeded` status passes.
    Command {
        commands: Vec<String>,
        #[serde(default = "PollConfig::short")]
        poll: PollConfig,
        #[serde(default = "default_one")]
        attempts: u32,
        #[serde(default = "default_poll_interval")]
        interval: String,
    },
}

impl ProbeSpec {
    pub fn attempts(&self) -> u32 {
        match self {
            ProbeSpec::Http { attempts, .. } | ProbeSpec::Command { attempts, .. } => {
                (*attempts).max(1)
            }
        }
    }

    /// Pause between failed attempts.
    pub fn retry_interval(&self) -> Duration {
        let raw = match self {
            ProbeSpec::Http { interval, .. } | ProbeSpec::Command { interval, .. } => interval,
        };
        parse_duration(raw).unwrap_or(Duration::from_secs(5))
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.get(name)
    }

    /// Reject configurations that would only fail later, mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(registry) = &self.registry {
            check_duration("registry.timeout", &registry.timeout)?;
        }
        if let Some(commands) = &self.commands {
            check_attempts("commands.dispatch_attempts", commands.dispatch_attempts)?;
            check_duration("commands.dispatch_backoff", &commands.dispatch_backoff)?;
            check_duration("commands.timeout", &commands.timeout)?;
        }

        for (name, group) in &self.groups {
            if name.is_empty() || name.contains('/') || name.contains(':') {
                return Err(ConfigError::InvalidGroupName(name.clone()));
            }
            for (set, commands) in [
                ("deploy", &group.deploy),
                ("backup", &group.backup),
                ("restore", &group.restore),
            ] {
                if commands.iter().all(|c| c.trim().is_empty()) {
                    return Err(ConfigError::EmptyCommandSet {
                        group: name.clone(),
                        set,
                    });
                }
            }
            check_duration(&format!("groups.{name}.settle"), &group.settle)?;
            for (field, poll) in [
                ("deploy_poll", &group.deploy_poll),
                ("backup_poll", &group.backup_poll),
                ("restore_poll", &group.restore_poll),
            ] {
                check_poll(&format!("groups.{name}.{field}"), poll)?;
            }

            match &group.probe {
                ProbeSpec::Http {
                    timeout,
                    attempts,
                    interval,
                    ..
                } => {
                    check_duration(&format!("groups.{name}.probe.timeout"), timeout)?;
                    check_attempts(&format!("groups.{name}.probe.attempts"), *attempts)?;
                    check_duration(&format!("groups.{name}.probe.interval"), interval)?;
                }
                ProbeSpec::Command {
                    commands,
                    poll,
                    attempts,
                    interval,
                } => {
                    if commands.iter().all(|c| c.trim().is_empty()) {
                        return Err(ConfigError::EmptyCommandSet {
                            group: name.clone(),
                            set: "probe",
                        });
                    }
                    check_poll(&format!("groups.{name}.probe.poll"), poll)?;
                    check_attempts(&format!("groups.{name}.probe.attempts"), *attempts)?;
                    check_duration(&format!("groups.{name}.probe.interval"), interval)?;
                }
            }
        }
        Ok(())
    }
}

fn check_poll(field: &str, poll: &PollConfig) -> Result<(), ConfigError> {
    check_duration(&format!("{field}.interval"), &poll.interval)?;
    check_attempts(&format!("{field}.max_attempts"), poll.max_attempts)?;
    if poll.checked_budget().is_none() {
        return Err(ConfigError::InvalidDuration {
            field: format!("{field}.max_attempts"),
            value: format!("{} x {}", poll.max_attempts, poll.interval),
        });
    }
    Ok(())
}

fn check_duration(field: &str, value: &str) -> Result<(), ConfigError> {
    match parse_duration(value) {
        Some(_) => Ok(()),
        None => Err(ConfigError::InvalidDuration {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

fn check_attempts(field: &str, attempts: u32) -> Result<(), ConfigError> {
    if attempts == 0 {
        return Err(ConfigError::ZeroAttempts {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn default_retention() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

fn default_dispatch_attempts() -> u32 {
    3
}

fn default_dispatch_backoff() -> String {
    "2s".to_string()
}

fn default_request_timeout() -> String {
    "10s".to_string()
}

fn default_settle() -> String {
    "10s".to_string()
}

fn default_poll_interval() -> String {
    "5s".to_string()
}

fn default_probe_timeout() -> String {
    "5s".to_string()
}
