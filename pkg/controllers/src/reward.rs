use tracing::{debug, info};

use pkg_constants::quota::{REWARD_CPU_MULTIPLIER, REWARD_MEMORY_MULTIPLIER};
use pkg_state::client::StateStore;
use pkg_state::retry_on_conflict;
use pkg_types::ledger::{EntryKind, LedgerEntry, TenantResourceQuota};
use pkg_types::node::Node;
use pkg_types::tenant::Tenant;

/// Which ledgers a node reconcile changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardChange {
    Granted { tenants: Vec<String> },
    Revoked { tenants: Vec<String> },
    Unchanged,
}

impl RewardChange {
    fn granted(tenants: Vec<String>) -> Self {
        if tenants.is_empty() {
            Self::Unchanged
        } else {
            Self::Granted { tenants }
        }
    }

    fn revoked(tenants: Vec<String>) -> Self {
        if tenants.is_empty() {
            Self::Unchanged
        } else {
            Self::Revoked { tenants }
        }
    }
}

/// Keeps one reward claim per healthy contributed node in each owning tenant's ledger.
///
/// The claim is derived from the node's current state only, so replaying the
/// same reconcile is harmless.
#[derive(Clone)]
pub struct NodeRewardBinder {
    store: StateStore,
}

impl NodeRewardBinder {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Reward claim for a node's capacity.
    pub fn reward(node: &Node) -> LedgerEntry {
        LedgerEntry::new(
            node.metadata.name.clone(),
            node.capacity
                .scale(REWARD_CPU_MULTIPLIER, REWARD_MEMORY_MULTIPLIER),
            None,
        )
    }

    /// Re-read the node and bring its owners' ledgers in line.
    ///
    /// A node that no longer exists loses its reward in every enabled tenant's ledger.
    pub async fn reconcile(&self, name: &str) -> anyhow::Result<RewardChange> {
        match self.store.get_object::<Node>(None, name).await? {
            Some(node) => self.bind(&node).await,
            None => self.revoke_everywhere(name).await,
        }
    }

    /// Grant the reward if the node is ready, otherwise revoke it.
    pub async fn bind(&self, node: &Node) -> anyhow::Result<RewardChange> {
        if node.is_ready() && !node.is_control_plane() {
            self.grant(node).await
        } else {
            self.revoke(node).await
        }
    }

    async fn grant(&self, node: &Node) -> anyhow::Result<RewardChange> {
        let entry = Self::reward(node);
        let mut granted = Vec::new();
        for tenant in self.active_owners(node).await? {
            let changed = self
                .mutate(&tenant, |ledger| ledger.upsert(EntryKind::Claim, entry.clone()))
                .await?;
            if changed {
                info!(
                    "Node {} rewards tenant {} with {}",
                    node.metadata.name, tenant, entry.resources
                );
                granted.push(tenant);
            }
        }
        Ok(RewardChange::granted(granted))
    }

    async fn revoke(&self, node: &Node) -> anyhow::Result<RewardChange> {
        let owners = self.active_owners(node).await?;
        self.revoke_from(&node.metadata.name, owners).await
    }

    async fn revoke_everywhere(&self, name: &str) -> anyhow::Result<RewardChange> {
        let ledgers: Vec<TenantResourceQuota> = self.store.list_objects(None).await?;
        let mut holders = Vec::new();
        for ledger in ledgers {
            let tenant = ledger.metadata.name;
            let holds = ledger
                .spec
                .claims
                .iter()
                .any(|claim| claim.name == name && claim.expiry.is_none());
            if holds && self.is_enabled(&tenant).await? {
                holders.push(tenant);
            }
        }
        self.revoke_from(name, holders).await
    }

    async fn revoke_from(&self, name: &str, tenants: Vec<String>) -> anyhow::Result<RewardChange> {
        let mut revoked = Vec::new();
        for tenant in tenants {
            let changed = self
                .mutate(&tenant, |ledger| ledger.remove(EntryKind::Claim, name))
                .await?;
            if changed {
                info!("Node {} no longer rewards tenant {}", name, tenant);
                revoked.push(tenant);
            }
        }
        Ok(RewardChange::revoked(revoked))
    }

    /// Owning tenants that exist and are enabled.
    async fn active_owners(&self, node: &Node) -> anyhow::Result<Vec<String>> {
        let mut owners = Vec::new();
        for owner in node.owner_tenants() {
            if self.is_enabled(owner).await? {
                owners.push(owner.to_string());
            } else {
                debug!("Node {} owner {} is missing or disabled", node.metadata.name, owner);
            }
        }
        Ok(owners)
    }

    async fn is_enabled(&self, tenant: &str) -> anyhow::Result<bool> {
        Ok(self
            .store
            .get_object::<Tenant>(None, tenant)
            .await?
            .is_some_and(|t| t.spec.enabled))
    }

    async fn mutate<F>(&self, tenant: &str, edit: F) -> anyhow::Result<bool>
    where
        F: Fn(&mut TenantResourceQuota) -> bool,
    {
        let store = &self.store;
        let edit = &edit;
        let changed = retry_on_conflict(|| async move {
            let Some(mut ledger) = store.get_object::<TenantResourceQuota>(None, tenant).await?
            else {
                debug!("Tenant {} has no ledger", tenant);
                return Ok(false);
            };
            if !edit(&mut ledger) {
                return Ok(false);
            }
            store.update(ledger).await?;
            Ok(true)
        })
        .await?;
        Ok(changed)
    }
}
