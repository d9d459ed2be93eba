use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_object;
use crate::meta::ObjectMeta;
use crate::resources::ResourceList;
use crate::status::Condition;

/// A child namespace carved out of a parent, with its own quota demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubNamespace {
    pub metadata: ObjectMeta,
    pub spec: SubNamespaceSpec,
    #[serde(default)]
    pub status: Condition,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubNamespaceSpec {
    pub resource_allocation: ResourceList,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inheritance: Inheritance,
}

/// Which parent objects the provisioning step copies into the child namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inheritance {
    #[serde(default)]
    pub rbac: bool,
    #[serde(default)]
    pub network_policy: bool,
    #[serde(default)]
    pub limit_range: bool,
    #[serde(default)]
    pub config_map: bool,
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub service_account: bool,
}

impl_object!(SubNamespace, pkg_constants::state::SUBNAMESPACES, namespaced = true);

impl SubNamespace {
    pub fn new(parent: &str, name: &str, demand: ResourceList) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(parent, name),
            spec: SubNamespaceSpec {
                resource_allocation: demand,
                ..Default::default()
            },
            status: Condition::default(),
        }
    }

    /// Namespace this record lives in.
    pub fn parent(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Address of the materialized child namespace: `<parent>-<name>`.
    pub fn child_name(&self) -> String {
        format!("{}-{}", self.parent(), self.metadata.name)
    }

    pub fn demand(&self) -> ResourceList {
        self.spec.resource_allocation
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.spec.expiry.is_some_and(|expiry| expiry <= now)
    }

    /// Live sub-namespaces hold a reservation and are eligible for eviction.
    pub fn is_live(&self) -> bool {
        self.status.is_applied()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata.creation_timestamp.unwrap_or_default()
    }
}
