use chrono::{DateTime, Utc};
use std::collections::HashSet;

use pkg_state::client::StateStore;
use pkg_types::ResourceList;
use pkg_types::namespace::Namespace;
use pkg_types::quota::ResourceQuota;
use pkg_types::subnamespace::SubNamespace;

/// A live sub-namespace that may be deleted to reclaim capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    /// Namespace holding the SubNamespace record.
    pub namespace: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub child_namespace: String,
}

impl EvictionCandidate {
    pub fn of(sn: &SubNamespace) -> Self {
        Self {
            namespace: sn.parent().to_string(),
            name: sn.metadata.name.clone(),
            created_at: sn.created_at(),
            child_namespace: sn.child_name(),
        }
    }

    /// Eviction order: latest creation first, child namespace name breaks ties.
    pub fn is_newer_than(&self, other: &EvictionCandidate) -> bool {
        (self.created_at, &self.child_namespace) > (other.created_at, &other.child_namespace)
    }
}

/// Newest of a set of candidates under the eviction order.
pub fn newest<I>(candidates: I) -> Option<EvictionCandidate>
where
    I: IntoIterator<Item = EvictionCandidate>,
{
    candidates.into_iter().fold(None, |best, c| match best {
        Some(b) if !c.is_newer_than(&b) => Some(b),
        _ => Some(c),
    })
}

/// Result of walking a namespace subtree.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    /// Sum of every quota object in every namespace of the subtree.
    pub total: ResourceList,
    /// Newest live sub-namespace anywhere in the subtree.
    pub newest_live: Option<EvictionCandidate>,
    /// Number of namespaces visited, the root included.
    pub namespaces: usize,
}

/// Walk the subtree rooted at `root` depth-first and fold up its commitment.
pub async fn aggregate(store: &StateStore, root: &str) -> anyhow::Result<Aggregate> {
    let mut result = Aggregate::default();
    let mut visited = HashSet::new();
    let mut stack = vec![root.to_string()];

    while let Some(namespace) = stack.pop() {
        if !visited.insert(namespace.clone()) {
            continue;
        }
        result.namespaces += 1;

        let quotas: Vec<ResourceQuota> = store.list_objects(Some(&namespace)).await?;
        result.total += quotas.iter().map(ResourceQuota::hard).sum::<ResourceList>();

        let children: Vec<SubNamespace> = store.list_objects(Some(&namespace)).await?;
        for sn in children {
            // A colliding address belongs to someone else; never walk or evict into it.
            let child = sn.child_name();
            let owned = store
                .get_object::<Namespace>(None, &child)
                .await?
                .is_some_and(|ns| ns.is_owned_by(&namespace, &sn.metadata.name));
            if !owned {
                continue;
            }
            if sn.is_live() {
                let candidate = EvictionCandidate::of(&sn);
                if result
                    .newest_live
                    .as_ref()
                    .is_none_or(|best| candidate.is_newer_than(best))
                {
                    result.newest_live = Some(candidate);
                }
            }
            stack.push(child);
        }
    }

    Ok(result)
}
