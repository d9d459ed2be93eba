use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregate::aggregate;
use crate::capacity::{hard_of, set_hard};
use crate::eviction::delete_subnamespace;
use pkg_constants::quota::CORE_QUOTA_NAME;
use pkg_constants::timing::EVICTION_SETTLE_MILLIS;
use pkg_state::client::StateStore;
use pkg_state::retry_on_conflict;
use pkg_types::ResourceList;
use pkg_types::ledger::TenantResourceQuota;
use pkg_types::status::StatusState;
use pkg_types::tenant::Tenant;

/// Result of one `tune` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TuneOutcome {
    /// The tree's capacity matches the entitlement.
    Converged {
        entitlement: ResourceList,
        root_hard: ResourceList,
        evicted: Vec<String>,
    },
    /// Nothing left to evict and the tree still holds more than the entitlement.
    UnderProvisioned {
        entitlement: ResourceList,
        root_hard: ResourceList,
        shortage: ResourceList,
        evicted: Vec<String>,
    },
    /// Tenant missing, disabled or without a ledger.
    Skipped(String),
}

impl TuneOutcome {
    pub fn evicted(&self) -> &[String] {
        match self {
            TuneOutcome::Converged { evicted, .. } | TuneOutcome::UnderProvisioned { evicted, .. } => {
                evicted
            }
            TuneOutcome::Skipped(_) => &[],
        }
    }
}

/// Reconciles a tenant's root quota with the entitlement computed from its ledger.
///
/// The root's `hard` is the unallocated remainder of the tree, so the tuner sets
/// it to `entitlement − reserved below`. When the sub-namespaces already reserve
/// more than the entitlement, the globally newest live one is deleted and the
/// pass starts over.
#[derive(Clone)]
pub struct QuotaTuner {
    store: StateStore,
    settle: Duration,
}

impl QuotaTuner {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            settle: Duration::from_millis(EVICTION_SETTLE_MILLIS),
        }
    }

    /// Delay between an eviction and the next read.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub async fn tune(&self, tenant: &str) -> anyhow::Result<TuneOutcome> {
        match self.store.get_object::<Tenant>(None, tenant).await? {
            None => return Ok(TuneOutcome::Skipped(format!("tenant {} not found", tenant))),
            Some(t) if !t.spec.enabled => {
                return Ok(TuneOutcome::Skipped(format!("tenant {} is disabled", tenant)));
            }
            Some(_) => {}
        }

        let core = tenant;
        let mut evicted = Vec::new();
        loop {
            let Some(ledger) = self
                .store
                .get_object::<TenantResourceQuota>(None, tenant)
                .await?
            else {
                return Ok(TuneOutcome::Skipped(format!("tenant {} has no ledger", tenant)));
            };
            let entitlement = ledger.compute_entitlement(Utc::now());

            let tree = aggregate(&self.store, core).await?;
            let root = hard_of(&self.store, core, CORE_QUOTA_NAME).await?;
            let reserved = tree.total - root;

            if reserved.fits_within(&entitlement) {
                let root_hard = entitlement - reserved;
                if set_hard(&self.store, core, CORE_QUOTA_NAME, root_hard).await? {
                    info!(
                        "Tenant {} core quota {} -> {} (entitlement {})",
                        tenant, root, root_hard, entitlement
                    );
                }
                return Ok(TuneOutcome::Converged {
                    entitlement,
                    root_hard,
                    evicted,
                });
            }

            let Some(candidate) = tree.newest_live else {
                let root_hard = (entitlement - reserved).floor_zero();
                set_hard(&self.store, core, CORE_QUOTA_NAME, root_hard).await?;
                let shortage = (reserved - entitlement).floor_zero();
                warn!(
                    "Tenant {} under-provisioned by {} with nothing left to evict",
                    tenant, shortage
                );
                return Ok(TuneOutcome::UnderProvisioned {
                    entitlement,
                    root_hard,
                    shortage,
                    evicted,
                });
            };

            info!(
                "Tenant {} reserves {} over entitlement {}, evicting newest sub-namespace {}/{}",
                tenant, reserved, entitlement, candidate.namespace, candidate.name
            );
            delete_subnamespace(&self.store, &candidate.namespace, &candidate.name).await?;
            evicted.push(candidate.child_namespace);
            tokio::time::sleep(self.settle).await;
        }
    }

    /// Prune the ledger, tune, and record the outcome on the ledger status.
    pub async fn reconcile(&self, tenant: &str) -> anyhow::Result<TuneOutcome> {
        let enabled = self
            .store
            .get_object::<Tenant>(None, tenant)
            .await?
            .is_some_and(|t| t.spec.enabled);
        if !enabled {
            debug!("Skipping reconcile of tenant {}: missing or disabled", tenant);
            return Ok(TuneOutcome::Skipped(format!("tenant {} is not active", tenant)));
        }

        prune_ledger(&self.store, tenant).await?;
        let outcome = self.tune(tenant).await?;

        let (state, message, entitlement) = match &outcome {
            TuneOutcome::Converged { entitlement, .. } => (
                StatusState::Applied,
                format!("Core quota tuned to entitlement {}", entitlement),
                *entitlement,
            ),
            TuneOutcome::UnderProvisioned {
                entitlement,
                shortage,
                ..
            } => (
                StatusState::Failure,
                format!(
                    "Entitlement {} is short by {} after evicting every sub-namespace",
                    entitlement, shortage
                ),
                *entitlement,
            ),
            TuneOutcome::Skipped(_) => return Ok(outcome),
        };

        let store = &self.store;
        retry_on_conflict(|| {
            let message = message.clone();
            async move {
                let Some(mut ledger) = store.get_object::<TenantResourceQuota>(None, tenant).await?
                else {
                    return Ok(());
                };
                let mut changed = ledger.status.condition.set(state, message);
                if ledger.status.entitlement != Some(entitlement) {
                    ledger.status.entitlement = Some(entitlement);
                    changed = true;
                }
                if changed {
                    store.update(ledger).await?;
                }
                Ok(())
            }
        })
        .await?;

        Ok(outcome)
    }
}

/// Physically drop elapsed claims and drops. Returns whether the ledger changed.
pub async fn prune_ledger(store: &StateStore, tenant: &str) -> anyhow::Result<bool> {
    let pruned = retry_on_conflict(|| async move {
        let Some(ledger) = store.get_object::<TenantResourceQuota>(None, tenant).await? else {
            return Ok(false);
        };
        let (ledger, changed) = ledger.pruned(Utc::now());
        if changed {
            store.update(ledger).await?;
        }
        Ok(changed)
    })
    .await?;
    if pruned {
        info!("Pruned expired entries from ledger of tenant {}", tenant);
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{applied_subnamespace, core_hard, gi, ledger, seed_tenant, subnamespace};
    use chrono::Duration as ChronoDuration;
    use pkg_constants::quota::SUB_QUOTA_NAME;
    use pkg_types::ledger::{EntryKind, LedgerEntry};
    use pkg_types::quota::ResourceQuota;
    use pkg_types::subnamespace::SubNamespace;
    use proptest::prelude::*;

    fn tuner(store: &StateStore) -> QuotaTuner {
        QuotaTuner::new(store.clone()).with_settle_delay(Duration::from_millis(1))
    }

    fn claim(name: &str, cpu: i64, mem: i64) -> LedgerEntry {
        LedgerEntry::new(name, ResourceList::new(cpu, mem), None)
    }

    async fn set_claims(store: &StateStore, tenant: &str, claims: Vec<LedgerEntry>) {
        let mut l = ledger(store, tenant).await;
        l.spec.claims = claims;
        store.update(l).await.unwrap();
    }

    #[tokio::test]
    async fn scenario_a_root_converges_to_entitlement() {
        let store = StateStore::in_memory();
        seed_tenant(&store, "acme", ResourceList::ZERO, &[claim("initial", 8000, gi(8))]).await;

        let outcome = tuner(&store).reconcile("acme").await.unwrap();
        assert!(matches!(outcome, TuneOutcome::Converged { .. }));
        let hard = core_hard(&store, "acme").await;
        assert_eq!(hard, ResourceList::parse("8000m", "8192Mi").unwrap());

        let status = ledger(&store, "acme").await.status;
        assert!(status.condition.is_applied());
        assert_eq!(status.entitlement, Some(hard));
    }

    #[tokio::test]
    async fn bootstraps_missing_core_quota() {
        let store = StateStore::in_memory();
        seed_tenant(&store, "acme", ResourceList::ZERO, &[claim("initial", 2000, gi(2))]).await;
        store
            .delete_object::<ResourceQuota>(Some("acme"), CORE_QUOTA_NAME)
            .await
            .unwrap();

        tuner(&store).tune("acme").await.unwrap();
        assert_eq!(core_hard(&store, "acme").await, ResourceList::new(2000, gi(2)));
    }

    #[tokio::test]
    async fn drop_shrinks_root_and_expiry_restores_it() {
        let store = StateStore::in_memory();
        seed_tenant(&store, "acme", ResourceList::ZERO, &[claim("initial", 8000, gi(8))]).await;
        let mut l = ledger(&store, "acme").await;
        l.upsert(
            EntryKind::Drop,
            LedgerEntry::new(
                "penalty",
                ResourceList::new(2000, gi(2)),
                Some(Utc::now() + ChronoDuration::milliseconds(150)),
            ),
        );
        store.update(l).await.unwrap();

        let t = tuner(&store);
        t.reconcile("acme").await.unwrap();
        assert_eq!(core_hard(&store, "acme").await, ResourceList::new(6000, gi(6)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        t.reconcile("acme").await.unwrap();
        assert_eq!(core_hard(&store, "acme").await, ResourceList::new(8000, gi(8)));
        assert!(ledger(&store, "acme").await.spec.drops.is_empty());
    }

    #[tokio::test]
    async fn scenario_c_evicts_newest_subnamespace() {
        let store = StateStore::in_memory();
        let t0 = Utc::now() - ChronoDuration::hours(1);
        // 8 cores entitled, two children reserve 3 each, root holds the remaining 2.
        seed_tenant(&store, "acme", ResourceList::new(2000, gi(2)), &[claim("initial", 8000, gi(8))]).await;
        applied_subnamespace(&store, "acme", "first", ResourceList::new(3000, gi(3)), t0).await;
        applied_subnamespace(
            &store,
            "acme",
            "second",
            ResourceList::new(3000, gi(3)),
            t0 + ChronoDuration::minutes(1),
        )
        .await;

        set_claims(&store, "acme", vec![claim("initial", 4000, gi(4))]).await;
        let outcome = tuner(&store).tune("acme").await.unwrap();

        assert_eq!(outcome.evicted(), ["acme-second".to_string()]);
        assert!(subnamespace(&store, "acme", "second").await.is_none());
        assert!(subnamespace(&store, "acme", "first").await.is_some());
        assert_eq!(core_hard(&store, "acme").await, ResourceList::new(1000, gi(1)));
        let tree = aggregate(&store, "acme").await.unwrap();
        assert_eq!(tree.total, ResourceList::new(4000, gi(4)));
    }

    #[tokio::test]
    async fn never_evicts_from_a_tenant_owning_a_colliding_address() {
        let store = StateStore::in_memory();
        let t0 = Utc::now() - ChronoDuration::hours(1);
        seed_tenant(&store, "acme", ResourceList::ZERO, &[claim("initial", 1000, 0)]).await;
        seed_tenant(&store, "acme-lab", ResourceList::new(4000, 0), &[claim("initial", 4500, 0)]).await;
        applied_subnamespace(&store, "acme-lab", "x", ResourceList::new(500, 0), t0).await;
        store
            .create(SubNamespace::new("acme", "lab", ResourceList::new(100, 0)))
            .await
            .unwrap();

        let outcome = tuner(&store).tune("acme").await.unwrap();
        assert!(matches!(outcome, TuneOutcome::Converged { .. }));
        assert!(outcome.evicted().is_empty());
        assert_eq!(core_hard(&store, "acme").await, ResourceList::new(1000, 0));
        assert!(subnamespace(&store, "acme-lab", "x").await.is_some());
        assert_eq!(core_hard(&store, "acme-lab").await, ResourceList::new(4000, 0));
    }

    #[tokio::test]
    async fn eviction_is_lifo_across_branches_even_if_older_is_larger() {
        let store = StateStore::in_memory();
        let t0 = Utc::now() - ChronoDuration::hours(1);
        seed_tenant(&store, "acme", ResourceList::ZERO, &[claim("initial", 10_000, 0)]).await;
        applied_subnamespace(&store, "acme", "big", ResourceList::new(6000, 0), t0).await;
        applied_subnamespace(&store, "acme", "other", ResourceList::new(2000, 0), t0 + ChronoDuration::minutes(1)).await;
        // Newest of all sits one level down, under the oldest branch.
        applied_subnamespace(&store, "acme-big", "deep", ResourceList::new(2000, 0), t0 + ChronoDuration::minutes(2)).await;

        set_claims(&store, "acme", vec![claim("initial", 9000, 0)]).await;
        let outcome = tuner(&store).tune("acme").await.unwrap();

        // Reclaiming acme-big-deep only refills acme-big, so the next newest goes as well.
        assert_eq!(
            outcome.evicted(),
            ["acme-big-deep".to_string(), "acme-other".to_string()]
        );
        assert!(subnamespace(&store, "acme", "big").await.is_some());
        assert_eq!(
            crate::testutil::hard(&store, "acme-big", SUB_QUOTA_NAME).await,
            Some(ResourceList::new(8000, 0))
        );
        assert_eq!(core_hard(&store, "acme").await, ResourceList::new(1000, 0));
        assert!(matches!(outcome, TuneOutcome::Converged { .. }));
    }

    #[tokio::test]
    async fn exhausted_eviction_reports_under_provisioned() {
        let store = StateStore::in_memory();
        seed_tenant(&store, "acme", ResourceList::ZERO, &[claim("initial", 1000, 0)]).await;
        // Reservation that is not a live sub-namespace: cannot be evicted.
        store
            .create(ResourceQuota::new("acme", "pinned", ResourceList::new(3000, 0)))
            .await
            .unwrap();

        let t = tuner(&store);
        let outcome = t.reconcile("acme").await.unwrap();
        match outcome {
            TuneOutcome::UnderProvisioned { shortage, root_hard, .. } => {
                assert_eq!(shortage, ResourceList::new(2000, 0));
                assert_eq!(root_hard, ResourceList::ZERO);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let status = ledger(&store, "acme").await.status;
        assert_eq!(status.condition.state, Some(StatusState::Failure));
        assert_eq!(status.condition.failed, 1);

        // Re-running with the same inputs does not count another failure.
        t.reconcile("acme").await.unwrap();
        assert_eq!(ledger(&store, "acme").await.status.condition.failed, 1);
    }

    #[tokio::test]
    async fn negative_entitlement_is_surfaced_unclamped() {
        let store = StateStore::in_memory();
        seed_tenant(&store, "acme", ResourceList::ZERO, &[claim("initial", 1000, gi(1))]).await;
        let mut l = ledger(&store, "acme").await;
        l.upsert(EntryKind::Drop, claim("penalty", 3000, gi(1)));
        store.update(l).await.unwrap();

        let outcome = tuner(&store).reconcile("acme").await.unwrap();
        assert!(matches!(outcome, TuneOutcome::UnderProvisioned { .. }));
        assert_eq!(
            ledger(&store, "acme").await.status.entitlement,
            Some(ResourceList::new(-2000, 0))
        );
        assert_eq!(core_hard(&store, "acme").await, ResourceList::ZERO);
    }

    #[tokio::test]
    async fn disabled_tenant_is_skipped() {
        let store = StateStore::in_memory();
        seed_tenant(&store, "acme", ResourceList::ZERO, &[claim("initial", 1000, 0)]).await;
        let mut tenant = store.get_object::<Tenant>(None, "acme").await.unwrap().unwrap();
        tenant.spec.enabled = false;
        store.update(tenant).await.unwrap();

        let outcome = tuner(&store).reconcile("acme").await.unwrap();
        assert!(matches!(outcome, TuneOutcome::Skipped(_)));
        assert_eq!(core_hard(&store, "acme").await, ResourceList::ZERO);
    }

    #[tokio::test]
    async fn converges_within_live_subnamespace_rounds() {
        let store = StateStore::in_memory();
        let t0 = Utc::now() - ChronoDuration::hours(1);
        seed_tenant(&store, "acme", ResourceList::ZERO, &[claim("initial", 5000, 0)]).await;
        for i in 0..5 {
            applied_subnamespace(
                &store,
                "acme",
                &format!("c{}", i),
                ResourceList::new(1000, 0),
                t0 + ChronoDuration::minutes(i),
            )
            .await;
        }
        set_claims(&store, "acme", vec![claim("initial", 2500, 0)]).await;

        let outcome = tuner(&store).tune("acme").await.unwrap();
        assert_eq!(
            outcome.evicted(),
            ["acme-c4".to_string(), "acme-c3".to_string(), "acme-c2".to_string()]
        );
        assert_eq!(core_hard(&store, "acme").await, ResourceList::new(500, 0));

        // A second pass with no changes evicts nothing.
        let again = tuner(&store).tune("acme").await.unwrap();
        assert!(again.evicted().is_empty());
    }

    /// Random tree: each node is (parent index, reservation in millicores).
    fn arb_tree() -> impl Strategy<Value = Vec<(usize, i64)>> {
        proptest::collection::vec((0usize..8, 0i64..4000), 0..8)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn conservation_holds_after_tuning(
            tree in arb_tree(),
            entitlement in 0i64..20_000,
            root_slack in 0i64..3000,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let store = StateStore::in_memory();
                let t0 = Utc::now() - ChronoDuration::hours(1);
                seed_tenant(&store, "acme", ResourceList::new(root_slack, 0), &[claim("initial", entitlement, 0)]).await;

                let mut namespaces = vec!["acme".to_string()];
                for (i, (parent, cpu)) in tree.iter().enumerate() {
                    let parent = namespaces[parent % namespaces.len()].clone();
                    let sn = applied_subnamespace(
                        &store,
                        &parent,
                        &format!("n{}", i),
                        ResourceList::new(*cpu, 0),
                        t0 + ChronoDuration::seconds(i as i64),
                    )
                    .await;
                    namespaces.push(sn.child_name());
                }

                let outcome = tuner(&store).tune("acme").await.unwrap();
                let evicted = outcome.evicted().len();
                prop_assert!(evicted <= tree.len());

                // No quota in the surviving tree is negative, and the tree never holds more than it is entitled to
                // unless nothing evictable remains.
                let agg = aggregate(&store, "acme").await.unwrap();
                for ns in &namespaces {
                    let quotas: Vec<ResourceQuota> = store.list_objects(Some(ns)).await.unwrap();
                    for q in quotas {
                        prop_assert!(q.hard().is_non_negative());
                    }
                }
                match outcome {
                    TuneOutcome::Converged { root_hard, .. } => {
                        prop_assert_eq!(agg.total.cpu_millis, entitlement);
                        prop_assert_eq!(core_hard(&store, "acme").await, root_hard);
                    }
                    TuneOutcome::UnderProvisioned { .. } => {
                        prop_assert!(agg.newest_live.is_none());
                    }
                    TuneOutcome::Skipped(reason) => prop_assert!(false, "skipped: {}", reason),
                }
                Ok(())
            })?;
        }
    }
}
