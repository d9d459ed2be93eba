use serde::{Deserialize, Serialize};

use crate::impl_object;
use crate::meta::ObjectMeta;
use crate::resources::ResourceList;
use pkg_constants::quota::{CONTROL_PLANE_LABELS, OWNER_KIND_TENANT};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeStatus {
    Ready,
    NotReady,
    Unknown,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Ready => write!(f, "Ready"),
            NodeStatus::NotReady => write!(f, "NotReady"),
            NodeStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A compute node, possibly contributed by a tenant (owner reference of kind `Tenant`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub capacity: ResourceList,
    pub status: NodeStatus,
}

impl_object!(Node, pkg_constants::state::NODES, namespaced = false);

impl Node {
    pub fn is_ready(&self) -> bool {
        self.status == NodeStatus::Ready
    }

    pub fn is_control_plane(&self) -> bool {
        CONTROL_PLANE_LABELS
            .iter()
            .any(|label| self.metadata.labels.contains_key(*label))
    }

    /// Tenants that contributed this node, in owner-reference order.
    pub fn owner_tenants(&self) -> impl Iterator<Item = &str> {
        self.metadata
            .owner_references
            .iter()
            .filter(|owner| owner.kind == OWNER_KIND_TENANT)
            .map(|owner| owner.name.as_str())
    }
}
