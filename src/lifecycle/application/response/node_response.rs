use crate::core::domain::value_object::ProductType;
use serde::Serialize;
use std::fmt;

/// Whether a node's tracked process is alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Running,
    Stopped,
    /// The persisted record could not be loaded.
    Unreadable,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Running => f.write_str("running"),
            NodeState::Stopped => f.write_str("stopped"),
            NodeState::Unreadable => f.write_str("unreadable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub product: ProductType,
    pub state: NodeState,
    pub pid: u32,
    /// Empty when the node belongs to no cluster.
    pub cluster: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeOutcome {
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanOutcome {
    /// `false` when there was nothing left on disk to delete.
    pub removed: bool,
    /// Load and stop failures tolerated by a forced clean.
    pub warnings: Vec<String>,
}
