use tracing::{debug, info};

use crate::aggregate::aggregate;
use crate::capacity::{adjust_hard, canonical_quota_name};
use pkg_state::client::StateStore;
use pkg_types::ResourceList;
use pkg_types::namespace::Namespace;
use pkg_types::quota::ResourceQuota;
use pkg_types::subnamespace::SubNamespace;

/// Delete a SubNamespace and return its capacity to the parent.
///
/// The child's whole subtree commitment is added back to the parent's canonical
/// quota, then the child namespace tree is torn down and the record removed.
/// Returns the released capacity, or `None` if the record no longer exists.
pub async fn delete_subnamespace(
    store: &StateStore,
    namespace: &str,
    name: &str,
) -> anyhow::Result<Option<ResourceList>> {
    let Some(sn) = store.get_object::<SubNamespace>(Some(namespace), name).await? else {
        return Ok(None);
    };
    let child = sn.child_name();

    let owned = store
        .get_object::<Namespace>(None, &child)
        .await?
        .is_some_and(|ns| ns.is_owned_by(namespace, name));

    let released = if owned {
        aggregate(store, &child).await?.total
    } else {
        ResourceList::ZERO
    };

    if !released.is_zero() {
        let parent_quota = canonical_quota_name(store, namespace).await?;
        match adjust_hard(store, namespace, parent_quota, released).await? {
            Some(hard) => debug!("{}/{} now {}", namespace, parent_quota, hard),
            None => debug!("{}/{} is gone, released capacity dropped", namespace, parent_quota),
        }
    }

    if owned {
        teardown(store, &child).await?;
    }
    store
        .delete_object::<SubNamespace>(Some(namespace), name)
        .await?;

    info!(
        "Deleted sub-namespace {}/{} (released {})",
        namespace, name, released
    );
    Ok(Some(released))
}

/// Remove a child namespace and everything nested below it.
async fn teardown(store: &StateStore, root: &str) -> anyhow::Result<()> {
    let mut stack = vec![root.to_string()];
    while let Some(namespace) = stack.pop() {
        let nested: Vec<SubNamespace> = store.list_objects(Some(&namespace)).await?;
        for sn in nested {
            let child = sn.child_name();
            let owned = store
                .get_object::<Namespace>(None, &child)
                .await?
                .is_some_and(|ns| ns.is_owned_by(&namespace, &sn.metadata.name));
            if owned {
                stack.push(child);
            }
            store
                .delete_object::<SubNamespace>(Some(&namespace), &sn.metadata.name)
                .await?;
        }

        let quotas: Vec<ResourceQuota> = store.list_objects(Some(&namespace)).await?;
        for quota in quotas {
            store
                .delete_object::<ResourceQuota>(Some(&namespace), &quota.metadata.name)
                .await?;
        }
        store.delete_object::<Namespace>(None, &namespace).await?;
        debug!("Removed namespace {}", namespace);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{applied_subnamespace, core_hard, hard, seed_tenant, subnamespace};
    use chrono::{Duration, Utc};
    use pkg_constants::quota::SUB_QUOTA_NAME;

    #[tokio::test]
    async fn returns_subtree_capacity_to_parent() {
        let store = StateStore::in_memory();
        let t0 = Utc::now() - Duration::hours(1);
        seed_tenant(&store, "acme", ResourceList::new(1000, 0), &[]).await;
        applied_subnamespace(&store, "acme", "lab", ResourceList::new(2000, 0), t0).await;
        applied_subnamespace(&store, "acme-lab", "deep", ResourceList::new(500, 0), t0).await;

        let released = delete_subnamespace(&store, "acme", "lab").await.unwrap();
        assert_eq!(released, Some(ResourceList::new(2500, 0)));
        assert_eq!(core_hard(&store, "acme").await, ResourceList::new(3500, 0));

        assert!(subnamespace(&store, "acme", "lab").await.is_none());
        assert!(subnamespace(&store, "acme-lab", "deep").await.is_none());
        assert!(hard(&store, "acme-lab", SUB_QUOTA_NAME).await.is_none());
        assert!(hard(&store, "acme-lab-deep", SUB_QUOTA_NAME).await.is_none());
        for ns in ["acme-lab", "acme-lab-deep"] {
            assert!(store.get_object::<Namespace>(None, ns).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn foreign_namespace_is_left_alone() {
        let store = StateStore::in_memory();
        seed_tenant(&store, "acme", ResourceList::new(1000, 0), &[]).await;
        // Same address, but owned by somebody else.
        store
            .create(Namespace::child("acme-lab", "other", "other", "lab"))
            .await
            .unwrap();
        store
            .create(ResourceQuota::new("acme-lab", SUB_QUOTA_NAME, ResourceList::new(9000, 0)))
            .await
            .unwrap();
        store
            .create(SubNamespace::new("acme", "lab", ResourceList::new(100, 0)))
            .await
            .unwrap();

        let released = delete_subnamespace(&store, "acme", "lab").await.unwrap();
        assert_eq!(released, Some(ResourceList::ZERO));
        assert_eq!(core_hard(&store, "acme").await, ResourceList::new(1000, 0));
        assert!(hard(&store, "acme-lab", SUB_QUOTA_NAME).await.is_some());
    }

    #[tokio::test]
    async fn missing_record_is_a_no_op() {
        let store = StateStore::in_memory();
        assert_eq!(delete_subnamespace(&store, "acme", "nope").await.unwrap(), None);
    }
}
