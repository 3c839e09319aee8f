//! Cluster descriptors, ledger records and join secrets

use super::node::Node;
use crate::error::{BootstrapError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Provisioning output consumed by the bootstrap orchestrator
///
/// `nodes[0]` is the leader, every other node is a follower. The wire form
/// is the provisioner's record (`ID`, `Name`, `Instances`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterDescriptor {
    /// Cluster ID, also the ledger key
    #[serde(rename = "ID", alias = "id")]
    pub id: String,
    /// Cluster name
    #[serde(default, alias = "name")]
    pub name: String,
    /// Provisioned nodes, leader first
    #[serde(rename = "Instances", alias = "instances", alias = "nodes")]
    pub nodes: Vec<Node>,
}

impl ClusterDescriptor {
    /// Create a new descriptor
    pub fn new(id: &str, name: &str, nodes: Vec<Node>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            nodes,
        }
    }

    /// Decode a queued descriptor and check its invariants
    pub fn from_json(body: &str) -> Result<Self> {
        let descriptor: Self = serde_json::from_str(body)
            .map_err(|e| BootstrapError::InvalidDescriptor(e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check the descriptor can be bootstrapped
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BootstrapError::InvalidDescriptor(
                "cluster id is empty".to_string(),
            ));
        }

        if self.nodes.is_empty() {
            return Err(BootstrapError::InvalidDescriptor(format!(
                "cluster {} has no nodes",
                self.id
            )));
        }

        for (index, node) in self.nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                return Err(BootstrapError::InvalidDescriptor(format!(
                    "node {} of cluster {} has no instance id",
                    index, self.id
                )));
            }
            if node.address.trim().is_empty() {
                return Err(BootstrapError::InvalidDescriptor(format!(
                    "node {} of cluster {} has no address",
                    node.id, self.id
                )));
            }
        }

        Ok(())
    }

    /// Leader node
    pub fn leader(&self) -> Result<&Node> {
        self.nodes.first().ok_or_else(|| {
            BootstrapError::InvalidDescriptor(format!("cluster {} has no nodes", self.id))
        })
    }

    /// Follower nodes, in descriptor order
    pub fn followers(&self) -> &[Node] {
        self.nodes.get(1..).unwrap_or_default()
    }

    /// Number of nodes in the cluster
    pub fn size(&self) -> usize {
        self.nodes.len()
    }
}

/// Cluster status as stored in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClusterStatus {
    /// Provisioned, waiting for bootstrap
    Pending,
    /// Swarm bootstrapped
    Done,
    /// Any state owned by another writer
    Other(String),
}

impl ClusterStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ClusterStatus::Pending => "Pending",
            ClusterStatus::Done => "Done",
            ClusterStatus::Other(s) => s,
        }
    }
}

impl From<String> for ClusterStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Pending" => ClusterStatus::Pending,
            "Done" => ClusterStatus::Done,
            _ => ClusterStatus::Other(s),
        }
    }
}

impl From<ClusterStatus> for String {
    fn from(status: ClusterStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster record in the status ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u32,
    #[serde(rename = "ClusterStatus")]
    pub status: ClusterStatus,
}

/// Secret authorizing a follower to join the leader's swarm
///
/// Only lives in memory for one bootstrap run. `Debug` and `Display` are
/// redacted; use [`JoinSecret::fingerprint`] when a run needs to be correlated
/// in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinSecret(String);

impl JoinSecret {
    /// Extract the secret from the captured output of `docker swarm join-token -q`
    pub fn from_output(output: &str) -> Option<Self> {
        let token = output.trim();
        if token.is_empty() {
            None
        } else {
            Some(Self(token.to_string()))
        }
    }

    /// Raw secret, only for building the join command
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 prefix that identifies the secret without revealing it
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest[..6].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for JoinSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JoinSecret(<redacted>)")
    }
}

impl fmt::Display for JoinSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging() -> ClusterDescriptor {
        ClusterDescriptor::new(
            "c1",
            "staging",
            vec![
                Node::new("leader", "10.0.0.1", "i-leader"),
                Node::new("w1", "10.0.0.2", "i-w1"),
            ],
        )
    }

    #[test]
    fn test_leader_and_followers() {
        let cluster = staging();
        assert_eq!(cluster.leader().unwrap().id, "i-leader");
        assert_eq!(cluster.followers().len(), 1);
        assert_eq!(cluster.followers()[0].id, "i-w1");
        assert_eq!(cluster.size(), 2);
    }

    #[test]
    fn test_single_node_has_no_followers() {
        let cluster = ClusterDescriptor::new(
            "c2",
            "solo",
            vec![Node::new("leader", "10.0.0.1", "i-leader")],
        );
        assert!(cluster.followers().is_empty());
    }

    #[test]
    fn test_decode_provisioner_record() {
        let body = r#"{
            "ID": "c1",
            "Name": "staging",
            "Instances": [
                {"Name": "swarm-1", "IP": "10.0.0.1", "ID": "i-leader"},
                {"Name": "swarm-2", "IP": "10.0.0.2", "ID": "i-w1"}
            ]
        }"#;

        let cluster = ClusterDescriptor::from_json(body).unwrap();
        assert_eq!(cluster.id, "c1");
        assert_eq!(cluster.name, "staging");
        assert_eq!(cluster.leader().unwrap().address, "10.0.0.1");
    }

    #[test]
    fn test_decode_lowercase_record() {
        let body = r#"{"id":"c1","name":"staging","nodes":[{"id":"i-leader","address":"10.0.0.1"}]}"#;
        let cluster = ClusterDescriptor::from_json(body).unwrap();
        assert_eq!(cluster.nodes.len(), 1);
    }

    #[test]
    fn test_reject_empty_node_list() {
        let body = r#"{"ID":"c1","Name":"staging","Instances":[]}"#;
        let err = ClusterDescriptor::from_json(body).unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_reject_garbage_body() {
        let err = ClusterDescriptor::from_json("not json").unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_reject_node_without_address() {
        let mut cluster = staging();
        cluster.nodes[1].address.clear();
        assert!(cluster.validate().is_err());
    }

    #[test]
    fn test_cluster_status_round_trip() {
        let record: ClusterRecord = serde_json::from_str(
            r#"{"ID":"c1","Name":"staging","Size":2,"ClusterStatus":"Provisioning"}"#,
        )
        .unwrap();
        assert_eq!(
            record.status,
            ClusterStatus::Other("Provisioning".to_string())
        );

        let json = serde_json::to_value(ClusterStatus::Done).unwrap();
        assert_eq!(json, "Done");
    }

    #[test]
    fn test_join_secret_trimmed_and_redacted() {
        let secret = JoinSecret::from_output("  SWMTKN-xyz  \n").unwrap();
        assert_eq!(secret.expose(), "SWMTKN-xyz");
        assert!(!format!("{:?}", secret).contains("SWMTKN"));
        assert!(!secret.to_string().contains("SWMTKN"));
        assert_eq!(secret.fingerprint().len(), 12);
    }

    #[test]
    fn test_join_secret_empty_output() {
        assert!(JoinSecret::from_output(" \n\t").is_none());
    }
}
