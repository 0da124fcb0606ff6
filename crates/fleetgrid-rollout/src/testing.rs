//! Scripted collaborators shared by the unit tests of this crate.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use fleetgrid_core::{ProbeSpec, Target};
use fleetgrid_health::{Probe, ProbeResult};
use fleetgrid_state::{CommandStatus, InvocationId, TargetId};

use crate::executor::RemoteCommandApi;
use crate::notify::{Notifier, RunNotification};
use crate::publisher::ObjectStore;

// ── Registry ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRegistry {
    groups: Mutex<HashMap<String, Vec<Target>>>,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(group: &str, ids: &[&str]) -> Self {
        let registry = Self::new();
        registry.set(group, ids.iter().map(|id| Target::healthy(id)).collect());
        registry
    }

    pub fn set(&self, group: &str, targets: Vec<Target>) {
        self.groups
            .lock()
            .unwrap()
            .insert(group.to_string(), targets);
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::resolver::FleetRegistry for FakeRegistry {
    async fn list_healthy(&self, group: &str) -> anyhow::Result<Vec<Target>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure.lock().unwrap().clone() {
            anyhow::bail!(message);
        }
        Ok(self
            .groups
            .lock()
            .unwrap()
            .get(group)
            .cloned()
            .unwrap_or_default())
    }
}

// ── Remote command API ────────────────────────────────────────────

/// A command set accepted by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub id: InvocationId,
    pub targets: Vec<TargetId>,
    pub commands: Vec<String>,
    pub timeout: Duration,
}

impl SentCommand {
    pub fn mentions(&self, needle: &str) -> bool {
        self.commands.iter().any(|c| c.contains(needle))
    }
}

/// Final status for sends whose commands contain `needle`.
struct Rule {
    needle: String,
    target: Option<String>,
    status: CommandStatus,
    polls_to_finish: u32,
}

struct OutputRule {
    needle: String,
    target: String,
    text: String,
}

#[derive(Default)]
struct CommandState {
    sent: Vec<SentCommand>,
    polls: HashMap<InvocationId, u32>,
    rules: Vec<Rule>,
    outputs: Vec<OutputRule>,
    refused: Vec<String>,
    hidden: HashSet<String>,
    fail_next_sends: u32,
    regress: bool,
}

/// In-memory remote command service.
///
/// By default every target reports `succeeded` on the first poll.
#[derive(Default)]
pub struct FakeCommandApi {
    state: Mutex<CommandState>,
    send_attempts: AtomicU32,
}

impl FakeCommandApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends mentioning `needle` end in `status` after `polls_to_finish`
    /// polls, on `target` only or on every target. Later rules win.
    pub fn script(&self, needle: &str, target: Option<&str>, status: CommandStatus, polls_to_finish: u32) {
        self.state.lock().unwrap().rules.push(Rule {
            needle: needle.to_string(),
            target: target.map(str::to_string),
            status,
            polls_to_finish,
        });
    }

    /// Output returned for `target` by sends mentioning `needle`.
    pub fn set_output(&self, needle: &str, target: &str, text: &str) {
        self.state.lock().unwrap().outputs.push(OutputRule {
            needle: needle.to_string(),
            target: target.to_string(),
            text: text.to_string(),
        });
    }

    /// Every send mentioning `needle` fails at the transport level.
    pub fn refuse(&self, needle: &str) {
        self.state.lock().unwrap().refused.push(needle.to_string());
    }

    /// The next `n` sends fail at the transport level.
    pub fn fail_next_sends(&self, n: u32) {
        self.state.lock().unwrap().fail_next_sends = n;
    }

    /// Leave `target` out of every status answer.
    pub fn hide_target(&self, target: &str) {
        self.state.lock().unwrap().hidden.insert(target.to_string());
    }

    /// Report `pending` again once a target has been reported terminal.
    pub fn regress_after_terminal(&self) {
        self.state.lock().unwrap().regress = true;
    }

    pub fn send_attempts(&self) -> u32 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Accepted sends, in order.
    pub fn sent(&self) -> Vec<SentCommand> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_mentioning(&self, needle: &str) -> Vec<SentCommand> {
        self.sent().into_iter().filter(|s| s.mentions(needle)).collect()
    }
}

#[async_trait]
impl RemoteCommandApi for FakeCommandApi {
    async fn send(
        &self,
        targets: &[TargetId],
        commands: &[String],
        timeout: Duration,
    ) -> anyhow::Result<InvocationId> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.fail_next_sends > 0 {
            state.fail_next_sends -= 1;
            anyhow::bail!("connection reset by peer");
        }
        if let Some(needle) = state
            .refused
            .iter()
            .find(|n| commands.iter().any(|c| c.contains(n.as_str())))
        {
            anyhow::bail!("service unavailable for '{needle}'");
        }
        let id = format!("inv-{}", state.sent.len() + 1);
        state.sent.push(SentCommand {
            id: id.clone(),
            targets: targets.to_vec(),
            commands: commands.to_vec(),
            timeout,
        });
        Ok(id)
    }

    async fn get_status(&self, invocation: &str) -> anyhow::Result<HashMap<TargetId, CommandStatus>> {
        let mut state = self.state.lock().unwrap();
        let Some(sent) = state.sent.iter().find(|s| s.id == invocation).cloned() else {
            anyhow::bail!("unknown invocation {invocation}");
        };
        let polls = {
            let counter = state.polls.entry(invocation.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        let mut statuses = HashMap::new();
        for target in &sent.targets {
            if state.hidden.contains(target) {
                continue;
            }
            let (status, polls_to_finish) = state
                .rules
                .iter()
                .rev()
                .find(|r| {
                    sent.mentions(&r.needle)
                        && r.target.as_deref().is_none_or(|t| t == target)
                })
                .map(|r| (r.status, r.polls_to_finish))
                .unwrap_or((CommandStatus::Succeeded, 1));

            let reported = if polls < polls_to_finish {
                CommandStatus::InProgress
            } else if state.regress && polls > polls_to_finish {
                CommandStatus::Pending
            } else {
                status
            };
            statuses.insert(target.clone(), reported);
        }
        Ok(statuses)
    }

    async fn get_output(&self, invocation: &str, target: &str) -> anyhow::Result<Option<String>> {
        let state = self.state.lock().unwrap();
        let Some(sent) = state.sent.iter().find(|s| s.id == invocation) else {
            return Ok(None);
        };
        Ok(state
            .outputs
            .iter()
            .rev()
            .find(|o| o.target == target && sent.mentions(&o.needle))
            .map(|o| o.text.clone()))
    }
}

// ── Prober ────────────────────────────────────────────────────────

/// Replays scripted probe results; `Healthy` once the script runs out.
#[derive(Default)]
pub struct FakeProber {
    results: Mutex<VecDeque<ProbeResult>>,
    probed: Mutex<Vec<TargetId>>,
}

impl FakeProber {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn scripted(results: &[ProbeResult]) -> Self {
        Self {
            results: Mutex::new(results.iter().copied().collect()),
            probed: Mutex::new(Vec::new()),
        }
    }

    /// Targets probed, in order.
    pub fn probed(&self) -> Vec<TargetId> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Probe for FakeProber {
    async fn probe(&self, target: &Target, _spec: &ProbeSpec) -> ProbeResult {
        self.probed.lock().unwrap().push(target.id.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ProbeResult::Healthy)
    }
}

// ── Notifier ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    records: Mutex<Vec<RunNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<RunNotification> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &RunNotification) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ── Object store ──────────────────────────────────────────────────

/// In-memory object store whose writes fail for keys containing a needle.
#[derive(Default)]
pub struct FlakyObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: Option<String>,
}

impl FlakyObjectStore {
    pub fn failing_on(needle: &str) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            failing: Some(needle.to_string()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> anyhow::Result<()> {
        if let Some(needle) = &self.failing
            && key.contains(needle.as_str())
        {
            anyhow::bail!("write to {key} refused");
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }
}
