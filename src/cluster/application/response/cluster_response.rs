use crate::core::domain::model::node::Node;

/// Result of joining a node to a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The node became a member. `resumed` is set when an earlier,
    /// interrupted join was completed instead of issuing a new Raft join.
    Joined { resumed: bool },
    /// The node was already a listed member; nothing was done.
    AlreadyMember,
}

/// Result of removing a member from a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The Raft peer with this server id was removed.
    Removed { raft_id: String },
    /// The live cluster did not know the member; only local records changed.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUnseal {
    pub node: String,
    /// `false` when the member was already unsealed.
    pub unsealed: bool,
}

#[derive(Debug, Clone)]
pub struct ClusterStartOutcome {
    pub cluster: String,
    pub nodes: Vec<String>,
    pub leader: Node,
}
