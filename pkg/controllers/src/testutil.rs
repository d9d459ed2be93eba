//! Fixtures shared by the controller tests.

use chrono::{DateTime, Utc};

use pkg_constants::quota::{CORE_QUOTA_NAME, SUB_QUOTA_NAME};
use pkg_state::client::StateStore;
use pkg_types::ResourceList;
use pkg_types::ledger::{LedgerEntry, TenantResourceQuota};
use pkg_types::namespace::Namespace;
use pkg_types::quota::ResourceQuota;
use pkg_types::status::StatusState;
use pkg_types::subnamespace::SubNamespace;
use pkg_types::tenant::Tenant;

pub fn gi(n: i64) -> i64 {
    n << 30
}

/// Enabled tenant with its core namespace, a core quota of `core_hard` and a ledger of claims.
pub async fn seed_tenant(
    store: &StateStore,
    tenant: &str,
    core_hard: ResourceList,
    claims: &[LedgerEntry],
) {
    store.create(Tenant::new(tenant, true)).await.unwrap();
    store.create(Namespace::core(tenant)).await.unwrap();
    store
        .create(ResourceQuota::new(tenant, CORE_QUOTA_NAME, core_hard))
        .await
        .unwrap();
    let mut ledger = TenantResourceQuota::new(tenant);
    ledger.spec.claims = claims.to_vec();
    store.create(ledger).await.unwrap();
}

/// State right after a successful admission: applied record, owned child namespace and its sub-quota.
/// The parent's quota is left untouched.
pub async fn applied_subnamespace(
    store: &StateStore,
    parent: &str,
    name: &str,
    hard: ResourceList,
    created_at: DateTime<Utc>,
) -> SubNamespace {
    let tenant = store
        .get_object::<Namespace>(None, parent)
        .await
        .unwrap()
        .and_then(|ns| ns.tenant().map(str::to_string))
        .unwrap_or_else(|| parent.to_string());

    let mut sn = SubNamespace::new(parent, name, hard);
    sn.metadata.creation_timestamp = Some(created_at);
    sn.status.set(StatusState::Applied, "fixture");
    let sn = store.create(sn).await.unwrap();

    let child = sn.child_name();
    store
        .create(Namespace::child(&child, &tenant, parent, name))
        .await
        .unwrap();
    store
        .create(ResourceQuota::new(&child, SUB_QUOTA_NAME, hard))
        .await
        .unwrap();
    sn
}

pub async fn hard(store: &StateStore, namespace: &str, name: &str) -> Option<ResourceList> {
    store
        .get_object::<ResourceQuota>(Some(namespace), name)
        .await
        .unwrap()
        .map(|q| q.hard())
}

pub async fn core_hard(store: &StateStore, tenant: &str) -> ResourceList {
    hard(store, tenant, CORE_QUOTA_NAME).await.unwrap_or_default()
}

pub async fn ledger(store: &StateStore, tenant: &str) -> TenantResourceQuota {
    store
        .get_object::<TenantResourceQuota>(None, tenant)
        .await
        .unwrap()
        .unwrap()
}

pub async fn subnamespace(store: &StateStore, namespace: &str, name: &str) -> Option<SubNamespace> {
    store.get_object(Some(namespace), name).await.unwrap()
}
