use serde::{Deserialize, Serialize};

use crate::impl_object;
use crate::meta::ObjectMeta;
use pkg_constants::quota::{
    CORE_QUOTA_NAME, KIND_CORE, KIND_SUB, LABEL_KIND, LABEL_OWNER, LABEL_PARENT_NAMESPACE,
    LABEL_TENANT, SUB_QUOTA_NAME,
};

/// A namespace node of a tenant's tree: either the core namespace or a sub-namespace's child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub metadata: ObjectMeta,
}

impl_object!(Namespace, pkg_constants::state::NAMESPACES, namespaced = false);

impl Namespace {
    /// Core namespace of a tenant.
    pub fn core(tenant: &str) -> Self {
        let mut metadata = ObjectMeta::named(tenant);
        metadata.labels.insert(LABEL_TENANT.to_string(), tenant.to_string());
        metadata.labels.insert(LABEL_KIND.to_string(), KIND_CORE.to_string());
        Self { metadata }
    }

    /// Child namespace materialized for sub-namespace `owner` under `parent`.
    pub fn child(name: &str, tenant: &str, parent: &str, owner: &str) -> Self {
        let mut metadata = ObjectMeta::named(name);
        metadata.labels.insert(LABEL_TENANT.to_string(), tenant.to_string());
        metadata.labels.insert(LABEL_KIND.to_string(), KIND_SUB.to_string());
        metadata
            .labels
            .insert(LABEL_PARENT_NAMESPACE.to_string(), parent.to_string());
        metadata.labels.insert(LABEL_OWNER.to_string(), owner.to_string());
        Self { metadata }
    }

    pub fn tenant(&self) -> Option<&str> {
        self.metadata.label(LABEL_TENANT)
    }

    pub fn is_core(&self) -> bool {
        self.metadata.label(LABEL_KIND) == Some(KIND_CORE)
    }

    /// Name of this namespace's canonical quota object.
    pub fn quota_name(&self) -> &'static str {
        if self.is_core() {
            CORE_QUOTA_NAME
        } else {
            SUB_QUOTA_NAME
        }
    }

    /// Whether this namespace was materialized by the given sub-namespace.
    pub fn is_owned_by(&self, parent: &str, owner: &str) -> bool {
        self.metadata.label(LABEL_PARENT_NAMESPACE) == Some(parent)
            && self.metadata.label(LABEL_OWNER) == Some(owner)
    }
}
