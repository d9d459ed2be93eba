use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregate::{EvictionCandidate, aggregate, newest};
use crate::capacity::{adjust_hard, canonical_quota_name, hard_of, set_hard};
use crate::eviction::delete_subnamespace;
use pkg_constants::quota::SUB_QUOTA_NAME;
use pkg_constants::timing::EVICTION_SETTLE_MILLIS;
use pkg_state::client::StateStore;
use pkg_state::{StoreError, retry_on_conflict};
use pkg_types::ResourceList;
use pkg_types::namespace::Namespace;
use pkg_types::quota::ResourceQuota;
use pkg_types::status::StatusState;
use pkg_types::subnamespace::SubNamespace;
use pkg_types::tenant::Tenant;
use pkg_types::validate::validate_subnamespace_name;

/// Result of one `admit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// The child holds exactly its demand.
    Admitted {
        child_namespace: String,
        demand: ResourceList,
        evicted: Vec<String>,
    },
    /// Not enough capacity, a name collision or an invalid record.
    Rejected { reason: String, evicted: Vec<String> },
    /// The record had expired and was deleted instead.
    Expired { released: ResourceList },
    /// Record gone, or its tenant is missing or disabled.
    Skipped(String),
}

impl AdmissionOutcome {
    fn rejected(reason: impl Into<String>, evicted: Vec<String>) -> Self {
        AdmissionOutcome::Rejected {
            reason: reason.into(),
            evicted,
        }
    }

    pub fn evicted(&self) -> &[String] {
        match self {
            AdmissionOutcome::Admitted { evicted, .. } | AdmissionOutcome::Rejected { evicted, .. } => {
                evicted
            }
            _ => &[],
        }
    }
}

/// Sizes a child namespace's quota out of its parent's remainder.
///
/// The child's current subtree commitment is handed back to the parent before
/// comparing, so a resize never counts the child's own reservation twice. When
/// the parent cannot cover the demand, the newest live sibling is deleted and
/// the check repeats.
#[derive(Clone)]
pub struct AdmissionGate {
    store: StateStore,
    settle: Duration,
}

impl AdmissionGate {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            settle: Duration::from_millis(EVICTION_SETTLE_MILLIS),
        }
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub async fn admit(&self, namespace: &str, name: &str) -> anyhow::Result<AdmissionOutcome> {
        let Some(sn) = self
            .store
            .get_object::<SubNamespace>(Some(namespace), name)
            .await?
        else {
            return Ok(AdmissionOutcome::Skipped(format!(
                "sub-namespace {}/{} not found",
                namespace, name
            )));
        };

        if sn.is_expired(Utc::now()) {
            let released = delete_subnamespace(&self.store, namespace, name)
                .await?
                .unwrap_or_default();
            return Ok(AdmissionOutcome::Expired { released });
        }

        let Some(parent) = self.store.get_object::<Namespace>(None, namespace).await? else {
            return Ok(AdmissionOutcome::rejected(
                format!("parent namespace {} not found", namespace),
                Vec::new(),
            ));
        };
        let tenant = parent.tenant().unwrap_or(namespace).to_string();
        let active = self
            .store
            .get_object::<Tenant>(None, &tenant)
            .await?
            .is_some_and(|t| t.spec.enabled);
        if !active {
            return Ok(AdmissionOutcome::Skipped(format!(
                "tenant {} is missing or disabled",
                tenant
            )));
        }

        if let Err(e) = validate_subnamespace_name(namespace, name) {
            return Ok(AdmissionOutcome::rejected(e.to_string(), Vec::new()));
        }

        let child = sn.child_name();
        if let Some(existing) = self.store.get_object::<Namespace>(None, &child).await?
            && !existing.is_owned_by(namespace, name)
        {
            return Ok(AdmissionOutcome::rejected(
                format!("namespace {} already exists", child),
                Vec::new(),
            ));
        }

        let demand = sn.demand();
        if !demand.is_non_negative() {
            return Ok(AdmissionOutcome::rejected(
                format!("demand {} is negative", demand),
                Vec::new(),
            ));
        }

        let parent_quota = canonical_quota_name(&self.store, namespace).await?;
        let mut evicted = Vec::new();
        loop {
            if self
                .store
                .get_object::<ResourceQuota>(Some(namespace), parent_quota)
                .await?
                .is_none()
            {
                return Ok(AdmissionOutcome::rejected(
                    format!("quota {}/{} not found", namespace, parent_quota),
                    evicted,
                ));
            }
            let parent_hard = hard_of(&self.store, namespace, parent_quota).await?;
            let child_total = self.committed(namespace, name, &child).await?;
            let child_hard = hard_of(&self.store, &child, SUB_QUOTA_NAME).await?;
            let nested = child_total - child_hard;

            if !nested.fits_within(&demand) {
                return Ok(AdmissionOutcome::rejected(
                    format!(
                        "demand {} is below the {} reserved by nested sub-namespaces",
                        demand, nested
                    ),
                    evicted,
                ));
            }

            let available = parent_hard + child_total;
            if demand.fits_within(&available) {
                self.reserve(&sn, &tenant, parent_quota, demand - child_total, demand - nested)
                    .await?;
                info!(
                    "Admitted sub-namespace {}/{} with {} ({} left in {})",
                    namespace,
                    name,
                    demand,
                    available - demand,
                    namespace
                );
                return Ok(AdmissionOutcome::Admitted {
                    child_namespace: child,
                    demand,
                    evicted,
                });
            }

            let siblings = self.live_siblings(namespace, name).await?;
            let Some(victim) = newest(siblings) else {
                return Ok(AdmissionOutcome::rejected(
                    format!("demand {} exceeds the {} available in {}", demand, available, namespace),
                    evicted,
                ));
            };
            info!(
                "Evicting sub-namespace {}/{} to admit {}/{}",
                victim.namespace, victim.name, namespace, name
            );
            delete_subnamespace(&self.store, &victim.namespace, &victim.name).await?;
            evicted.push(victim.child_namespace);
            tokio::time::sleep(self.settle).await;
        }
    }

    /// Capacity held by the child's subtree, zero if the child was never materialized.
    async fn committed(&self, namespace: &str, name: &str, child: &str) -> anyhow::Result<ResourceList> {
        let owned = self
            .store
            .get_object::<Namespace>(None, child)
            .await?
            .is_some_and(|ns| ns.is_owned_by(namespace, name));
        if !owned {
            return Ok(ResourceList::ZERO);
        }
        Ok(aggregate(&self.store, child).await?.total)
    }

    /// Live sub-namespaces under `namespace`, the one being sized excluded.
    async fn live_siblings(&self, namespace: &str, name: &str) -> anyhow::Result<Vec<EvictionCandidate>> {
        let records: Vec<SubNamespace> = self.store.list_objects(Some(namespace)).await?;
        Ok(records
            .iter()
            .filter(|sn| sn.metadata.name != name && sn.is_live())
            .map(EvictionCandidate::of)
            .collect())
    }

    /// Move `delta` from the parent's remainder into the child, then size the child's own quota.
    async fn reserve(
        &self,
        sn: &SubNamespace,
        tenant: &str,
        parent_quota: &str,
        delta: ResourceList,
        child_hard: ResourceList,
    ) -> anyhow::Result<()> {
        let namespace = sn.parent();
        let child = sn.child_name();

        match self
            .store
            .create(Namespace::child(&child, tenant, namespace, &sn.metadata.name))
            .await
        {
            Ok(_) => debug!("Created namespace {}", child),
            Err(StoreError::AlreadyExists { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        adjust_hard(&self.store, namespace, parent_quota, -delta).await?;
        set_hard(&self.store, &child, SUB_QUOTA_NAME, child_hard).await?;
        Ok(())
    }

    /// Admit and record the outcome on the sub-namespace status.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> anyhow::Result<AdmissionOutcome> {
        let outcome = self.admit(namespace, name).await?;
        let (state, message) = match &outcome {
            AdmissionOutcome::Admitted {
                child_namespace,
                demand,
                ..
            } => (
                StatusState::Applied,
                format!("Reserved {} for namespace {}", demand, child_namespace),
            ),
            AdmissionOutcome::Rejected { reason, .. } => {
                warn!("Rejected sub-namespace {}/{}: {}", namespace, name, reason);
                (StatusState::Failure, reason.clone())
            }
            AdmissionOutcome::Expired { .. } | AdmissionOutcome::Skipped(_) => return Ok(outcome),
        };

        let store = &self.store;
        retry_on_conflict(|| {
            let message = message.clone();
            async move {
                let Some(mut sn) = store
                    .get_object::<SubNamespace>(Some(namespace), name)
                    .await?
                else {
                    return Ok(());
                };
                if sn.status.set(state, message) {
                    store.update(sn).await?;
                }
                Ok(())
            }
        })
        .await?;

        Ok(outcome)
    }
}
