//! Cluster topology types
//!
//! The discovery collaborator produces a [`ClusterSnapshot`]; the pool
//! reconciles against it and then discards it. Nothing here carries
//! liveness state, that lives with the pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Role flags reported for a node in the last discovered snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRoles {
    /// Whether the node is eligible to act as cluster master
    #[serde(default = "default_true", rename = "master")]
    pub master_eligible: bool,
    /// Whether the node holds data
    #[serde(default = "default_true", rename = "data")]
    pub data: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NodeRoles {
    fn default() -> Self {
        Self {
            master_eligible: true,
            data: true,
        }
    }
}

/// One cluster member as reported by a discovery call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredNode {
    /// Endpoint address the node serves requests on
    pub endpoint: Url,
    /// Role flags from the cluster state
    #[serde(flatten)]
    pub roles: NodeRoles,
}

impl DiscoveredNode {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            roles: NodeRoles::default(),
        }
    }
}

/// The result of one discovery call: the member list and when it was taken.
///
/// Immutable once produced; used only to reconcile the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Discovered cluster members
    pub nodes: Vec<DiscoveredNode>,
    /// When the snapshot was captured
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

impl ClusterSnapshot {
    /// Create a snapshot captured now
    pub fn new(nodes: Vec<DiscoveredNode>) -> Self {
        Self {
            nodes,
            captured_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl fmt::Display for ClusterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClusterSnapshot({} nodes @ {})",
            self.nodes.len(),
            self.captured_at
        )
    }
}
