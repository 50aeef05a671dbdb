//! Persisted record of an HA cluster.

use crate::core::domain::{error::ValidationError, value_object::validate_entity_name};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterType {
    /// Raft-backed high availability cluster.
    #[default]
    #[serde(rename = "HA")]
    Ha,
}

/// A named group of nodes forming one Raft cluster.
///
/// `nodes` keeps join order; the first entry is the founding member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(rename = "type", default)]
    pub cluster_type: ClusterType,
    #[serde(default)]
    pub nodes: Vec<String>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, founder: impl Into<String>) -> Result<Self, ValidationError> {
        let cluster = Self {
            name: name.into(),
            cluster_type: ClusterType::Ha,
            nodes: vec![founder.into()],
        };
        cluster.validate()?;
        Ok(cluster)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_entity_name("cluster", &self.name)?;
        for (index, node) in self.nodes.iter().enumerate() {
            validate_entity_name(&format!("nodes[{index}]"), node)?;
        }
        Ok(())
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n == node)
    }

    /// Drops `node` from the member list, returning whether it was present.
    pub fn remove_member(&mut self, node: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n != node);
        self.nodes.len() != before
    }
}
