use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use pkg_constants::state::REGISTRY_ROOT;

/// Metadata carried by every stored object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    /// Owning namespace; `None` for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: String,
    /// Optimistic-concurrency token. Bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

/// A storable object: knows its metadata and where it lives in the registry.
pub trait Object: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Registry resource segment, e.g. `subnamespaces`.
    const RESOURCE: &'static str;
    const NAMESPACED: bool;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Registry key of the object with the given coordinates.
    fn key_for(namespace: Option<&str>, name: &str) -> String {
        match namespace {
            Some(ns) if Self::NAMESPACED => {
                format!("{}/{}/{}/{}", REGISTRY_ROOT, Self::RESOURCE, ns, name)
            }
            _ => format!("{}/{}/{}", REGISTRY_ROOT, Self::RESOURCE, name),
        }
    }

    /// Prefix under which every object of this type (optionally in one namespace) lives.
    fn list_prefix(namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if Self::NAMESPACED => {
                format!("{}/{}/{}/", REGISTRY_ROOT, Self::RESOURCE, ns)
            }
            _ => format!("{}/{}/", REGISTRY_ROOT, Self::RESOURCE),
        }
    }

    fn key(&self) -> String {
        Self::key_for(self.meta().namespace.as_deref(), &self.meta().name)
    }

    fn name(&self) -> &str {
        &self.meta().name
    }
}

/// Implements [`Object`] for a type with a `metadata: ObjectMeta` field.
#[macro_export]
macro_rules! impl_object {
    ($ty:ty, $resource:expr, namespaced = $namespaced:expr) => {
        impl $crate::meta::Object for $ty {
            const RESOURCE: &'static str = $resource;
            const NAMESPACED: bool = $namespaced;

            fn meta(&self) -> &$crate::meta::ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut $crate::meta::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::ResourceQuota;
    use crate::tenant::Tenant;

    #[test]
    fn cluster_scoped_keys_ignore_namespace() {
        assert_eq!(Tenant::key_for(None, "acme"), "/registry/tenants/acme");
        assert_eq!(Tenant::key_for(Some("x"), "acme"), "/registry/tenants/acme");
        assert_eq!(Tenant::list_prefix(None), "/registry/tenants/");
    }

    #[test]
    fn namespaced_keys_include_namespace() {
        assert_eq!(
            ResourceQuota::key_for(Some("acme"), "core-quota"),
            "/registry/resourcequotas/acme/core-quota"
        );
        // Trailing slash keeps `acme` from matching `acme-dev`.
        assert_eq!(
            ResourceQuota::list_prefix(Some("acme")),
            "/registry/resourcequotas/acme/"
        );
    }
}
