//! Swarm bootstrap orchestrator
//!
//! Drives a freshly provisioned cluster through the bootstrap phases:
//!
//! 1. `docker swarm init` on the leader
//! 2. `docker swarm join-token worker -q` on the leader
//! 3. `docker swarm join` on every follower, in one multi-target dispatch
//! 4. mark the cluster `Done` in the ledger
//! 5. acknowledge the queue message
//!
//! Phases run strictly in order. Any failure ends the run and leaves the
//! queue message un-acknowledged so the queue redelivers it.

use super::cluster::{ClusterDescriptor, JoinSecret};
use super::command::{CommandChannel, CommandResult, CommandStatus};
use super::ledger::StatusLedger;
use super::node::Node;
use super::poller::CommandPoller;
use super::queue::DescriptorQueue;
use crate::error::{BootstrapError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Initializes the swarm on the leader
pub const SWARM_INIT: &str = "docker swarm init";

/// Prints the worker join secret on the leader
pub const SWARM_JOIN_TOKEN: &str = "docker swarm join-token worker -q";

/// Docker's answer when init or join runs on a node that is already in a swarm
const ALREADY_IN_SWARM: &str = "already part of a swarm";

/// Bootstrap phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Swarm init on the leader
    Init,
    /// Join secret extraction
    Token,
    /// Followers joining
    Join,
    /// Ledger update
    Commit,
    /// Queue acknowledgment
    Acknowledge,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Token => "token",
            Phase::Join => "join",
            Phase::Commit => "commit",
            Phase::Acknowledge => "acknowledge",
        };
        f.write_str(s)
    }
}

/// Bootstrap run state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    Received,
    LeaderInitiating,
    LeaderInitiated,
    TokenFetching,
    TokenFetched,
    WorkersJoining,
    Committed,
    Failed { phase: Phase, cause: String },
}

impl BootstrapState {
    /// Check if the run is over
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BootstrapState::Committed | BootstrapState::Failed { .. }
        )
    }
}

/// Outcome of a committed bootstrap run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    /// Run ID used in logs
    pub run_id: String,
    pub cluster_id: String,
    pub cluster_name: String,
    /// Leader instance ID
    pub leader: String,
    /// Follower instance IDs that joined
    pub followers_joined: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Build the join command run on followers
pub fn join_command(secret: &JoinSecret, leader: &Node) -> String {
    format!(
        "docker swarm join --token {} {}",
        secret.expose(),
        leader.join_addr()
    )
}

/// Bootstrap orchestrator
pub struct BootstrapOrchestrator {
    channel: Arc<dyn CommandChannel>,
    poller: CommandPoller,
    queue: Arc<dyn DescriptorQueue>,
    ledger: Arc<dyn StatusLedger>,
    state: BootstrapState,
}

impl BootstrapOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        poller: CommandPoller,
        queue: Arc<dyn DescriptorQueue>,
        ledger: Arc<dyn StatusLedger>,
    ) -> Self {
        Self {
            channel,
            poller,
            queue,
            ledger,
            state: BootstrapState::Received,
        }
    }

    /// State of the current or last run
    pub fn state(&self) -> &BootstrapState {
        &self.state
    }

    /// Receive one descriptor, bootstrap it and acknowledge it
    ///
    /// The message is acknowledged only once the cluster is committed.
    pub async fn process_next(&mut self) -> Result<BootstrapReport> {
        let (token, descriptor) = self.queue.receive_one().await?;

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("bootstrap", run = %run_id, cluster = %descriptor.id);

        async {
            let report = self.run_with_id(&descriptor, run_id.clone()).await?;

            if let Err(e) = self.queue.acknowledge(&token).await {
                let e = e.in_phase(Phase::Acknowledge);
                warn!("Cluster {} committed but not acknowledged: {}", descriptor.id, e);
                self.transition(BootstrapState::Failed {
                    phase: Phase::Acknowledge,
                    cause: e.to_string(),
                });
                return Err(e);
            }
            info!("Acknowledged descriptor for cluster {}", descriptor.id);

            Ok::<_, BootstrapError>(report)
        }
        .instrument(span)
        .await
    }

    /// Bootstrap one cluster, without touching the queue
    pub async fn run(&mut self, descriptor: &ClusterDescriptor) -> Result<BootstrapReport> {
        self.run_with_id(descriptor, Uuid::new_v4().to_string())
            .await
    }

    async fn run_with_id(
        &mut self,
        descriptor: &ClusterDescriptor,
        run_id: String,
    ) -> Result<BootstrapReport> {
        self.state = BootstrapState::Received;
        let started_at = Utc::now();

        match self.drive(descriptor).await {
            Ok(followers_joined) => {
                let report = BootstrapReport {
                    run_id,
                    cluster_id: descriptor.id.clone(),
                    cluster_name: descriptor.name.clone(),
                    leader: descriptor.leader()?.id.clone(),
                    followers_joined,
                    started_at,
                    finished_at: Utc::now(),
                };
                info!(
                    "Cluster {} ({}) bootstrapped with {} node(s)",
                    report.cluster_name,
                    report.cluster_id,
                    descriptor.size()
                );
                Ok(report)
            }
            Err(e) => {
                let phase = e.phase().unwrap_or(Phase::Init);
                warn!("Bootstrap of cluster {} failed in {}: {}", descriptor.id, phase, e);
                self.state = BootstrapState::Failed {
                    phase,
                    cause: e.to_string(),
                };
                Err(e)
            }
        }
    }

    async fn drive(&mut self, descriptor: &ClusterDescriptor) -> Result<Vec<String>> {
        descriptor.validate()?;
        let leader = descriptor.leader()?;
        let followers = descriptor.followers();

        self.init_leader(leader).await?;
        let secret = self.fetch_join_secret(leader).await?;

        let joined = if followers.is_empty() {
            debug!("Single node cluster, skipping join");
            Vec::new()
        } else {
            self.join_followers(leader, followers, &secret).await?
        };

        self.ledger
            .mark_done(&descriptor.id)
            .await
            .map_err(|e| e.in_phase(Phase::Commit))?;
        self.transition(BootstrapState::Committed);

        Ok(joined)
    }

    fn transition(&mut self, state: BootstrapState) {
        debug!("Bootstrap state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Run a command on the leader and wait for its result
    async fn run_on_leader(
        &self,
        phase: Phase,
        leader: &Node,
        command: &str,
    ) -> Result<CommandResult> {
        let targets = vec![leader.id.clone()];
        let handle = self
            .channel
            .dispatch(&targets, command)
            .await
            .map_err(|e| e.in_phase(phase))?;

        let mut results = self
            .poller
            .await_completion(&handle, &targets)
            .await
            .map_err(|e| e.in_phase(phase))?;

        Ok(results.remove(&leader.id).unwrap_or_default())
    }

    async fn init_leader(&mut self, leader: &Node) -> Result<()> {
        self.transition(BootstrapState::LeaderInitiating);
        info!("Initializing swarm on leader {}", leader.label());

        let result = self.run_on_leader(Phase::Init, leader, SWARM_INIT).await?;
        if !result.is_success() {
            if result.mentions(ALREADY_IN_SWARM) {
                info!("Leader {} already runs a swarm", leader.label());
            } else {
                return Err(command_failure(Phase::Init, leader, &result));
            }
        }

        self.transition(BootstrapState::LeaderInitiated);
        Ok(())
    }

    async fn fetch_join_secret(&mut self, leader: &Node) -> Result<JoinSecret> {
        self.transition(BootstrapState::TokenFetching);

        let result = self
            .run_on_leader(Phase::Token, leader, SWARM_JOIN_TOKEN)
            .await?;
        if !result.is_success() {
            return Err(command_failure(Phase::Token, leader, &result));
        }

        let secret = JoinSecret::from_output(&result.output).ok_or_else(|| {
            BootstrapError::NonSuccessStatus {
                phase: Phase::Token,
                node: leader.id.clone(),
                status: result.status.to_string(),
                output: "empty join token".to_string(),
            }
        })?;

        debug!("Fetched join secret {}", secret.fingerprint());
        self.transition(BootstrapState::TokenFetched);
        Ok(secret)
    }

    async fn join_followers(
        &mut self,
        leader: &Node,
        followers: &[Node],
        secret: &JoinSecret,
    ) -> Result<Vec<String>> {
        self.transition(BootstrapState::WorkersJoining);
        info!(
            "Joining {} follower(s) to {}",
            followers.len(),
            leader.join_addr()
        );

        let targets: Vec<String> = followers.iter().map(|n| n.id.clone()).collect();
        let handle = self
            .channel
            .dispatch(&targets, &join_command(secret, leader))
            .await
            .map_err(|e| e.in_phase(Phase::Join))?;

        let results = self
            .poller
            .await_completion(&handle, &targets)
            .await
            .map_err(|e| e.in_phase(Phase::Join))?;

        check_joins(followers, &results)
    }
}

/// Apply the all-or-nothing join policy
fn check_joins(
    followers: &[Node],
    results: &HashMap<String, CommandResult>,
) -> Result<Vec<String>> {
    let mut joined = Vec::new();
    let mut failed: Vec<(&Node, CommandResult)> = Vec::new();

    for node in followers {
        let result = results.get(&node.id).cloned().unwrap_or_default();
        if result.is_success() || result.mentions(ALREADY_IN_SWARM) {
            joined.push(node.id.clone());
        } else {
            warn!(
                "Follower {} did not join: {} {}",
                node.label(),
                result.status,
                result.error_output.trim()
            );
            failed.push((node, result));
        }
    }

    let Some((first, first_result)) = failed.first() else {
        return Ok(joined);
    };

    if failed
        .iter()
        .all(|(_, r)| r.status == CommandStatus::TimedOut)
    {
        return Err(BootstrapError::Timeout {
            phase: Phase::Join,
            nodes: failed.iter().map(|(n, _)| n.id.clone()).collect(),
        });
    }

    if joined.is_empty() {
        return Err(command_failure(Phase::Join, first, first_result));
    }

    Err(BootstrapError::PartialJoinFailure {
        failed_node: first.id.clone(),
        failed: failed.iter().map(|(n, _)| n.id.clone()).collect(),
        joined,
    })
}

/// Error for a command that did not succeed on `node`
fn command_failure(phase: Phase, node: &Node, result: &CommandResult) -> BootstrapError {
    if result.status == CommandStatus::TimedOut {
        return BootstrapError::Timeout {
            phase,
            nodes: vec![node.id.clone()],
        };
    }

    let output = if result.error_output.trim().is_empty() {
        result.output.trim().to_string()
    } else {
        result.error_output.trim().to_string()
    };

    BootstrapError::NonSuccessStatus {
        phase,
        node: node.id.clone(),
        status: result.status.to_string(),
        output,
    }
}
