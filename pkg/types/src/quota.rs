use serde::{Deserialize, Serialize};

use crate::impl_object;
use crate::meta::ObjectMeta;
use crate::resources::ResourceList;

/// Quota object: hard bound on what a namespace may still hand out or consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub metadata: ObjectMeta,
    pub spec: ResourceQuotaSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceQuotaSpec {
    #[serde(default)]
    pub hard: ResourceList,
}

impl_object!(ResourceQuota, pkg_constants::state::RESOURCE_QUOTAS, namespaced = true);

impl ResourceQuota {
    pub fn new(namespace: &str, name: &str, hard: ResourceList) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: ResourceQuotaSpec { hard },
        }
    }

    pub fn hard(&self) -> ResourceList {
        self.spec.hard
    }
}
