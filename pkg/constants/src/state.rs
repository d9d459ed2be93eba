//! State store key layout.
//!
//! Cluster-scoped objects live at `/registry/<resource>/<name>`,
//! namespaced objects at `/registry/<resource>/<namespace>/<name>`.

pub const REGISTRY_ROOT: &str = "/registry";

pub const TENANTS: &str = "tenants";
pub const TENANT_RESOURCE_QUOTAS: &str = "tenantresourcequotas";
pub const NAMESPACES: &str = "namespaces";
pub const SUBNAMESPACES: &str = "subnamespaces";
pub const RESOURCE_QUOTAS: &str = "resourcequotas";
pub const NODES: &str = "nodes";

/// Number of recent watch events kept for `events_since` replay.
pub const EVENT_LOG_CAPACITY: usize = 4096;

/// Buffer of the live watch broadcast channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;
