use serde::{Deserialize, Serialize};

use crate::impl_object;
use crate::meta::ObjectMeta;

/// Top-level consumer of cluster capacity. Its core namespace shares its name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub metadata: ObjectMeta,
    pub spec: TenantSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSpec {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub full_name: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl_object!(Tenant, pkg_constants::state::TENANTS, namespaced = false);

impl Tenant {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: TenantSpec {
                enabled,
                full_name: None,
            },
        }
    }

    /// Name of the tenant's core namespace.
    pub fn core_namespace(&self) -> &str {
        &self.metadata.name
    }
}
