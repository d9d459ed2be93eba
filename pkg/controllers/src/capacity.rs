//! Read-modify-write helpers for canonical quota objects.

use pkg_constants::quota::{CORE_QUOTA_NAME, SUB_QUOTA_NAME};
use pkg_state::client::StateStore;
use pkg_state::{StoreError, retry_on_conflict};
use pkg_types::ResourceList;
use pkg_types::namespace::Namespace;
use pkg_types::quota::ResourceQuota;

/// Name of the canonical quota object of `namespace`.
///
/// Falls back to probing the stored quotas when the namespace record is gone.
pub async fn canonical_quota_name(store: &StateStore, namespace: &str) -> anyhow::Result<&'static str> {
    if let Some(ns) = store.get_object::<Namespace>(None, namespace).await? {
        return Ok(ns.quota_name());
    }
    let core = store
        .get_object::<ResourceQuota>(Some(namespace), CORE_QUOTA_NAME)
        .await?;
    Ok(if core.is_some() {
        CORE_QUOTA_NAME
    } else {
        SUB_QUOTA_NAME
    })
}

/// Current `hard` of a quota object, zero when it does not exist.
pub async fn hard_of(store: &StateStore, namespace: &str, name: &str) -> anyhow::Result<ResourceList> {
    Ok(store
        .get_object::<ResourceQuota>(Some(namespace), name)
        .await?
        .map(|q| q.hard())
        .unwrap_or_default())
}

/// Set a quota's `hard`, creating the object if needed. Returns whether anything was written.
pub async fn set_hard(
    store: &StateStore,
    namespace: &str,
    name: &str,
    hard: ResourceList,
) -> anyhow::Result<bool> {
    let written = retry_on_conflict(|| async move {
        match store.get_object::<ResourceQuota>(Some(namespace), name).await? {
            Some(quota) if quota.hard() == hard => Ok(false),
            Some(mut quota) => {
                quota.spec.hard = hard;
                store.update(quota).await.map(|_| true)
            }
            None => match store.create(ResourceQuota::new(namespace, name, hard)).await {
                Ok(_) => Ok(true),
                // Lost a creation race; re-read and compare on the next attempt.
                Err(StoreError::AlreadyExists { key }) => Err(StoreError::Conflict {
                    key,
                    expected: 0,
                    found: 1,
                }),
                Err(e) => Err(e),
            },
        }
    })
    .await?;
    Ok(written)
}

/// Add `delta` to an existing quota's `hard`. Returns the new value, or `None`
/// when the quota does not exist.
pub async fn adjust_hard(
    store: &StateStore,
    namespace: &str,
    name: &str,
    delta: ResourceList,
) -> anyhow::Result<Option<ResourceList>> {
    if delta.is_zero() {
        return Ok(store
            .get_object::<ResourceQuota>(Some(namespace), name)
            .await?
            .map(|q| q.hard()));
    }
    let hard = retry_on_conflict(|| async move {
        match store.get_object::<ResourceQuota>(Some(namespace), name).await? {
            Some(mut quota) => {
                quota.spec.hard += delta;
                store.update(quota).await.map(|q| Some(q.hard()))
            }
            None => Ok(None),
        }
    })
    .await?;
    Ok(hard)
}
