//! Docker Swarm bootstrap
//!
//! This module turns a freshly provisioned set of nodes into a running
//! swarm: one leader initializes the swarm, every follower joins it.

pub mod cluster;
pub mod command;
pub mod ledger;
pub mod node;
pub mod orchestrator;
pub mod poller;
pub mod queue;
pub mod runner;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{ClusterDescriptor, ClusterRecord, ClusterStatus, JoinSecret};
pub use command::{
    CommandChannel, CommandHandle, CommandResult, CommandStatus, HttpCommandChannel,
};
pub use ledger::{HttpLedgerClient, StatusLedger};
pub use node::Node;
pub use orchestrator::{BootstrapOrchestrator, BootstrapReport, BootstrapState, Phase};
pub use poller::{CommandPoller, PollPolicy};
pub use queue::{AckToken, DescriptorQueue, HttpQueueClient};
pub use runner::{BootstrapService, ServiceStats, Tick};
