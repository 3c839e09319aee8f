//! In-memory collaborators for orchestrator tests

use super::cluster::{ClusterDescriptor, ClusterRecord, ClusterStatus};
use super::command::{CommandChannel, CommandHandle, CommandResult, CommandStatus};
use super::ledger::StatusLedger;
use super::queue::{AckToken, DescriptorQueue};
use crate::error::{BootstrapError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Command channel answering from scripted results
///
/// Scripts are keyed by command ID or by a command prefix; the longest
/// matching key wins. The last scripted result repeats, unscripted commands
/// succeed with empty output.
#[derive(Default)]
pub struct ScriptedChannel {
    dispatches: Mutex<Vec<(Vec<String>, String)>>,
    scripts: Mutex<HashMap<(String, String), VecDeque<CommandResult>>>,
    fetches: Mutex<HashMap<(String, String), usize>>,
    failing_dispatch: Mutex<Option<String>>,
    failing_fetches: Mutex<bool>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, key: &str, target: &str, results: Vec<CommandResult>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((key.to_string(), target.to_string()), results.into());
    }

    pub fn succeed(&self, key: &str, target: &str, output: &str) {
        self.script(
            key,
            target,
            vec![CommandResult::new(CommandStatus::Success, output)],
        );
    }

    pub fn fail(&self, key: &str, target: &str, status: CommandStatus, output: &str) {
        self.script(key, target, vec![CommandResult::new(status, output)]);
    }

    /// Reject dispatches of commands starting with `prefix`
    pub fn fail_dispatch(&self, prefix: &str) {
        *self.failing_dispatch.lock().unwrap() = Some(prefix.to_string());
    }

    pub fn fail_fetches(&self) {
        *self.failing_fetches.lock().unwrap() = true;
    }

    pub fn clear_failures(&self) {
        *self.failing_dispatch.lock().unwrap() = None;
        *self.failing_fetches.lock().unwrap() = false;
    }

    /// Every dispatch so far as (targets, command)
    pub fn dispatches(&self) -> Vec<(Vec<String>, String)> {
        self.dispatches.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.dispatches().into_iter().map(|(_, c)| c).collect()
    }

    pub fn fetch_count(&self, command_id: &str, target: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(&(command_id.to_string(), target.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn command_for(&self, command_id: &str) -> Option<String> {
        let index: usize = command_id.strip_prefix("cmd-")?.parse().ok()?;
        self.dispatches
            .lock()
            .unwrap()
            .get(index.checked_sub(1)?)
            .map(|(_, c)| c.clone())
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn dispatch(&self, targets: &[String], command: &str) -> Result<CommandHandle> {
        if let Some(prefix) = self.failing_dispatch.lock().unwrap().as_deref() {
            if command.starts_with(prefix) {
                return Err(BootstrapError::transport("command", "dispatch rejected"));
            }
        }

        let mut dispatches = self.dispatches.lock().unwrap();
        dispatches.push((targets.to_vec(), command.to_string()));

        Ok(CommandHandle {
            command_id: format!("cmd-{}", dispatches.len()),
            targets: targets.to_vec(),
        })
    }

    async fn fetch_result(&self, handle: &CommandHandle, target: &str) -> Result<CommandResult> {
        if *self.failing_fetches.lock().unwrap() {
            return Err(BootstrapError::transport("command", "connection reset"));
        }

        *self
            .fetches
            .lock()
            .unwrap()
            .entry((handle.command_id.clone(), target.to_string()))
            .or_default() += 1;

        let command = self.command_for(&handle.command_id).unwrap_or_default();
        let mut scripts = self.scripts.lock().unwrap();
        let key = scripts
            .keys()
            .filter(|(key, t)| {
                t == target && (*key == handle.command_id || command.starts_with(key.as_str()))
            })
            .max_by_key(|(key, _)| key.len())
            .cloned();

        let Some(key) = key else {
            return Ok(CommandResult::new(CommandStatus::Success, ""));
        };

        let results = scripts.get_mut(&key).unwrap();
        if results.len() > 1 {
            Ok(results.pop_front().unwrap())
        } else {
            Ok(results.front().cloned().unwrap_or_default())
        }
    }
}

/// Queue with visibility semantics: received messages stay in flight
/// until acknowledged or redelivered
#[derive(Default)]
pub struct MemoryQueue {
    visible: Mutex<VecDeque<(String, String)>>,
    in_flight: Mutex<Vec<(String, String)>>,
    acked: Mutex<Vec<String>>,
    next_receipt: Mutex<usize>,
    failing_ack: Mutex<bool>,
    failing_receive: Mutex<bool>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, descriptor: &ClusterDescriptor) {
        self.push_raw(&serde_json::to_string(descriptor).unwrap());
    }

    pub fn push_raw(&self, body: &str) {
        self.visible
            .lock()
            .unwrap()
            .push_back((String::new(), body.to_string()));
    }

    /// Make every in-flight message visible again
    pub fn redeliver(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let mut visible = self.visible.lock().unwrap();
        for message in in_flight.drain(..) {
            visible.push_back(message);
        }
    }

    pub fn fail_receives(&self, failing: bool) {
        *self.failing_receive.lock().unwrap() = failing;
    }

    pub fn fail_acks(&self, failing: bool) {
        *self.failing_ack.lock().unwrap() = failing;
    }

    pub fn ack_count(&self) -> usize {
        self.acked.lock().unwrap().len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    pub fn visible_count(&self) -> usize {
        self.visible.lock().unwrap().len()
    }
}

#[async_trait]
impl DescriptorQueue for MemoryQueue {
    async fn receive_one(&self) -> Result<(AckToken, ClusterDescriptor)> {
        if *self.failing_receive.lock().unwrap() {
            return Err(BootstrapError::transport("queue", "connection refused"));
        }

        let (_, body) = self
            .visible
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(BootstrapError::EmptyQueue)?;

        let receipt = {
            let mut next = self.next_receipt.lock().unwrap();
            *next += 1;
            format!("receipt-{}", next)
        };
        self.in_flight
            .lock()
            .unwrap()
            .push((receipt.clone(), body.clone()));

        let descriptor = ClusterDescriptor::from_json(&body)?;
        Ok((AckToken::new(&receipt), descriptor))
    }

    async fn acknowledge(&self, token: &AckToken) -> Result<()> {
        if *self.failing_ack.lock().unwrap() {
            return Err(BootstrapError::transport("queue", "delete rejected"));
        }

        let mut in_flight = self.in_flight.lock().unwrap();
        in_flight.retain(|(receipt, _)| receipt != token.as_str());
        self.acked.lock().unwrap().push(token.as_str().to_string());
        Ok(())
    }
}

/// Ledger holding records in memory, with the conditional update semantics
/// of the HTTP ledger
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<HashMap<String, ClusterRecord>>,
    writes: Mutex<Vec<String>>,
    failing: Mutex<bool>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pending(&self, descriptor: &ClusterDescriptor) {
        self.insert(ClusterRecord {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            size: descriptor.size() as u32,
            status: ClusterStatus::Pending,
        });
    }

    pub fn insert(&self, record: ClusterRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    pub fn fail_writes(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn status(&self, cluster_id: &str) -> Option<ClusterStatus> {
        self.records
            .lock()
            .unwrap()
            .get(cluster_id)
            .map(|r| r.status.clone())
    }

    /// Cluster IDs written to `Done`, in order
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusLedger for MemoryLedger {
    async fn mark_done(&self, cluster_id: &str) -> Result<()> {
        if *self.failing.lock().unwrap() {
            return Err(BootstrapError::transport("ledger", "throttled"));
        }

        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(cluster_id)
            .ok_or_else(|| BootstrapError::PreconditionFailed {
                cluster_id: cluster_id.to_string(),
                actual: "missing".to_string(),
            })?;

        match &record.status {
            ClusterStatus::Done => Ok(()),
            ClusterStatus::Pending => {
                record.status = ClusterStatus::Done;
                self.writes.lock().unwrap().push(cluster_id.to_string());
                Ok(())
            }
            ClusterStatus::Other(actual) => Err(BootstrapError::PreconditionFailed {
                cluster_id: cluster_id.to_string(),
                actual: actual.clone(),
            }),
        }
    }

    async fn get_record(&self, cluster_id: &str) -> Result<Option<ClusterRecord>> {
        Ok(self.records.lock().unwrap().get(cluster_id).cloned())
    }
}
