//! swarmboot - Docker Swarm bootstrap for freshly provisioned clusters
//!
//! swarmboot consumes cluster descriptors from a queue and turns the
//! described nodes into a swarm:
//!
//! - `docker swarm init` on the leader
//! - join secret extraction on the leader
//! - one fan-out `docker swarm join` to every follower
//! - ledger update and queue acknowledgment once the swarm is up

pub mod config;
pub mod error;
pub mod swarm;

pub use config::Config;
pub use error::{BootstrapError, Result};
