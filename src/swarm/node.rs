//! Cluster member nodes

use serde::{Deserialize, Serialize};

/// Swarm port managers listen on for joining nodes
pub const SWARM_JOIN_PORT: u16 = 2377;

/// A provisioned compute node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    /// Node name
    #[serde(default, alias = "name")]
    pub name: String,
    /// Network address followers use to reach the leader
    #[serde(rename = "IP", alias = "ip", alias = "address")]
    pub address: String,
    /// Instance ID used to address remote commands
    #[serde(rename = "ID", alias = "id")]
    pub id: String,
}

impl Node {
    /// Create a new node
    pub fn new(name: &str, address: &str, id: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            id: id.to_string(),
        }
    }

    /// Address followers pass to `docker swarm join`
    pub fn join_addr(&self) -> String {
        format!("{}:{}", self.address, SWARM_JOIN_PORT)
    }

    /// Label used in logs and errors
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_addr() {
        let node = Node::new("leader", "10.0.0.1", "i-leader");
        assert_eq!(node.join_addr(), "10.0.0.1:2377");
    }

    #[test]
    fn test_label_falls_back_to_id() {
        let node = Node::new("", "10.0.0.2", "i-w1");
        assert_eq!(node.label(), "i-w1");
    }

    #[test]
    fn test_decode_provisioner_instance() {
        let node: Node =
            serde_json::from_str(r#"{"Name":"swarm-1","IP":"10.0.0.1","ID":"i-leader"}"#).unwrap();
        assert_eq!(node, Node::new("swarm-1", "10.0.0.1", "i-leader"));

        let node: Node =
            serde_json::from_str(r#"{"id":"i-w1","address":"10.0.0.2"}"#).unwrap();
        assert_eq!(node.address, "10.0.0.2");
        assert!(node.name.is_empty());
    }
}
