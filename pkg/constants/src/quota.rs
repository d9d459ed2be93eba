//! Quota accounting constants.

/// Canonical quota object of a tenant's core namespace.
pub const CORE_QUOTA_NAME: &str = "core-quota";

/// Canonical quota object of every sub-namespace.
pub const SUB_QUOTA_NAME: &str = "sub-quota";

pub const LABEL_TENANT: &str = "edge-net.io/tenant";
pub const LABEL_KIND: &str = "edge-net.io/kind";
pub const LABEL_OWNER: &str = "edge-net.io/owner";
pub const LABEL_PARENT_NAMESPACE: &str = "edge-net.io/parent-namespace";

pub const KIND_CORE: &str = "core";
pub const KIND_SUB: &str = "sub";

/// Owner reference kind that marks a node as contributed by a tenant.
pub const OWNER_KIND_TENANT: &str = "Tenant";

/// Nodes carrying any of these labels never earn contribution rewards.
pub const CONTROL_PLANE_LABELS: &[&str] = &[
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

/// Reward granted per contributed CPU unit.
pub const REWARD_CPU_MULTIPLIER: f64 = 1.5;

/// Reward granted per contributed memory unit.
pub const REWARD_MEMORY_MULTIPLIER: f64 = 1.3;
