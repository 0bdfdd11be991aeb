//! Configuration for one overlay node

use std::time::Duration;

use crate::path::NodeId;
use crate::role::NodeRole;

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identity appended to every path this node sends on
    pub node_id: NodeId,

    /// Role, which decides the node's capabilities
    pub role: NodeRole,

    /// How long a locally originated request waits for its answer
    pub request_timeout: Duration,

    /// How long a forwarded request's correlation entry lives
    pub forward_timeout: Duration,

    /// Number of answered requests remembered for duplicate suppression
    pub dedup_capacity: usize,

    /// Inbound frame queue size
    pub inbox_capacity: usize,

    /// Install the role's built-in filters
    pub role_filters: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::from("EK3-001"),
            role: NodeRole::ChargingStation,
            request_timeout: Duration::from_secs(30),
            forward_timeout: Duration::from_secs(60),
            dedup_capacity: 1024,
            inbox_capacity: 256,
            role_filters: true,
        }
    }
}

impl NodeConfig {
    /// Create config with identity and role
    pub fn new(node_id: impl Into<NodeId>, role: NodeRole) -> Self {
        Self {
            node_id: node_id.into(),
            role,
            ..Default::default()
        }
    }

    /// Set the local request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the forwarded-entry lifetime
    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    /// Skip the role's built-in filters
    pub fn without_role_filters(mut self) -> Self {
        self.role_filters = false;
        self
    }
}
