//! Tenant entitlement ledger: time-bounded claims (grants) and drops (revocations).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_object;
use crate::meta::ObjectMeta;
use crate::resources::ResourceList;
use crate::status::Condition;

/// One ledger per tenant, named after the tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantResourceQuota {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: LedgerSpec,
    #[serde(default)]
    pub status: LedgerStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerSpec {
    #[serde(default)]
    pub claims: Vec<LedgerEntry>,
    #[serde(default)]
    pub drops: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub name: String,
    #[serde(flatten)]
    pub resources: ResourceList,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerStatus {
    #[serde(flatten)]
    pub condition: Condition,
    /// Entitlement computed by the last reconciliation.
    #[serde(default)]
    pub entitlement: Option<ResourceList>,
}

/// Which side of the ledger an entry sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Claim,
    Drop,
}

impl_object!(
    TenantResourceQuota,
    pkg_constants::state::TENANT_RESOURCE_QUOTAS,
    namespaced = false
);

impl LedgerEntry {
    pub fn new(name: impl Into<String>, resources: ResourceList, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            resources,
            expiry,
        }
    }

    /// Live entries count toward the entitlement: no expiry, or an expiry still ahead.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_none_or(|expiry| expiry > now)
    }
}

impl TenantResourceQuota {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(tenant),
            spec: LedgerSpec::default(),
            status: LedgerStatus::default(),
        }
    }

    /// Σ live claims − Σ live drops, per resource. Never clamped.
    pub fn compute_entitlement(&self, now: DateTime<Utc>) -> ResourceList {
        let live_sum = |entries: &[LedgerEntry]| -> ResourceList {
            entries
                .iter()
                .filter(|e| e.is_live(now))
                .map(|e| e.resources)
                .sum()
        };
        live_sum(&self.spec.claims) - live_sum(&self.spec.drops)
    }

    /// Physically remove every claim and drop whose expiry has elapsed.
    /// Returns whether anything was removed.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> bool {
        let before = self.spec.claims.len() + self.spec.drops.len();
        self.spec.claims.retain(|e| e.is_live(now));
        self.spec.drops.retain(|e| e.is_live(now));
        before != self.spec.claims.len() + self.spec.drops.len()
    }

    /// Non-mutating form of [`prune_expired`](Self::prune_expired).
    pub fn pruned(&self, now: DateTime<Utc>) -> (Self, bool) {
        let mut copy = self.clone();
        let changed = copy.prune_expired(now);
        (copy, changed)
    }

    /// Closest expiry still in the future, across claims and drops.
    pub fn next_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.spec
            .claims
            .iter()
            .chain(self.spec.drops.iter())
            .filter_map(|e| e.expiry)
            .filter(|expiry| *expiry > now)
            .min()
    }

    pub fn entries(&self, kind: EntryKind) -> &[LedgerEntry] {
        match kind {
            EntryKind::Claim => &self.spec.claims,
            EntryKind::Drop => &self.spec.drops,
        }
    }

    fn entries_mut(&mut self, kind: EntryKind) -> &mut Vec<LedgerEntry> {
        match kind {
            EntryKind::Claim => &mut self.spec.claims,
            EntryKind::Drop => &mut self.spec.drops,
        }
    }

    /// Insert an entry, or replace the one with the same name. Returns whether the ledger changed.
    pub fn upsert(&mut self, kind: EntryKind, entry: LedgerEntry) -> bool {
        let entries = self.entries_mut(kind);
        match entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) if *existing == entry => false,
            Some(existing) => {
                *existing = entry;
                true
            }
            None => {
                entries.push(entry);
                true
            }
        }
    }

    /// Remove the entry with the given name. Returns whether it existed.
    pub fn remove(&mut self, kind: EntryKind, name: &str) -> bool {
        let entries = self.entries_mut(kind);
        let before = entries.len();
        entries.retain(|e| e.name != name);
        before != entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn gi(n: i64) -> i64 {
        n << 30
    }

    fn ledger(claims: Vec<LedgerEntry>, drops: Vec<LedgerEntry>) -> TenantResourceQuota {
        let mut l = TenantResourceQuota::new("acme");
        l.spec.claims = claims;
        l.spec.drops = drops;
        l
    }

    #[test]
    fn entitlement_subtracts_live_drops() {
        let now = Utc::now();
        let l = ledger(
            vec![LedgerEntry::new("initial", ResourceList::new(8000, gi(8)), None)],
            vec![LedgerEntry::new(
                "penalty",
                ResourceList::new(2000, gi(2)),
                Some(now + Duration::milliseconds(1300)),
            )],
        );
        assert_eq!(l.compute_entitlement(now), ResourceList::new(6000, gi(6)));
        // Once the drop has elapsed it no longer counts, even before pruning.
        let later = now + Duration::seconds(2);
        assert_eq!(l.compute_entitlement(later), ResourceList::new(8000, gi(8)));
    }

    #[test]
    fn entitlement_is_not_clamped() {
        let now = Utc::now();
        let l = ledger(
            vec![LedgerEntry::new("initial", ResourceList::new(1000, gi(1)), None)],
            vec![LedgerEntry::new("penalty", ResourceList::new(3000, gi(2)), None)],
        );
        assert_eq!(l.compute_entitlement(now), ResourceList::new(-2000, -gi(1)));
    }

    #[test]
    fn expiry_at_exactly_now_is_dead() {
        let now = Utc::now();
        let entry = LedgerEntry::new("x", ResourceList::new(1, 1), Some(now));
        assert!(!entry.is_live(now));
    }

    #[test]
    fn prune_removes_only_elapsed_entries() {
        let now = Utc::now();
        let mut l = ledger(
            vec![
                LedgerEntry::new("old", ResourceList::new(1000, 0), Some(now - Duration::seconds(1))),
                LedgerEntry::new("forever", ResourceList::new(1000, 0), None),
            ],
            vec![LedgerEntry::new("soon", ResourceList::new(500, 0), Some(now + Duration::hours(1)))],
        );
        assert!(l.prune_expired(now));
        assert_eq!(l.spec.claims.len(), 1);
        assert_eq!(l.spec.claims[0].name, "forever");
        assert_eq!(l.spec.drops.len(), 1);
        assert!(!l.prune_expired(now));
    }

    #[test]
    fn next_expiry_picks_closest_future() {
        let now = Utc::now();
        let soon = now + Duration::minutes(5);
        let l = ledger(
            vec![
                LedgerEntry::new("a", ResourceList::ZERO, Some(now + Duration::hours(2))),
                LedgerEntry::new("b", ResourceList::ZERO, Some(now - Duration::hours(2))),
            ],
            vec![LedgerEntry::new("c", ResourceList::ZERO, Some(soon))],
        );
        assert_eq!(l.next_expiry(now), Some(soon));
        assert_eq!(TenantResourceQuota::new("empty").next_expiry(now), None);
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut l = TenantResourceQuota::new("acme");
        let entry = LedgerEntry::new("node-1", ResourceList::new(3000, gi(5)), None);
        assert!(l.upsert(EntryKind::Claim, entry.clone()));
        assert!(!l.upsert(EntryKind::Claim, entry));
        assert_eq!(l.spec.claims.len(), 1);

        let resized = LedgerEntry::new("node-1", ResourceList::new(6000, gi(5)), None);
        assert!(l.upsert(EntryKind::Claim, resized));
        assert_eq!(l.spec.claims.len(), 1);
        assert_eq!(l.spec.claims[0].resources.cpu_millis, 6000);

        assert!(l.remove(EntryKind::Claim, "node-1"));
        assert!(!l.remove(EntryKind::Claim, "node-1"));
    }

    #[test]
    fn entries_serialize_flat() {
        let entry = LedgerEntry::new("initial", ResourceList::new(8000, gi(8)), None);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["cpu"], "8000m");
        assert_eq!(json["memory"], "8Gi");
        let back: LedgerEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    fn arb_entry() -> impl Strategy<Value = LedgerEntry> {
        (0i64..10_000, 0i64..(1 << 34), proptest::option::of(-3_600i64..3_600)).prop_map(
            |(cpu, mem, offset)| {
                let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
                LedgerEntry::new(
                    format!("e-{}-{}", cpu, mem),
                    ResourceList::new(cpu, mem),
                    offset.map(|s| base + Duration::seconds(s)),
                )
            },
        )
    }

    proptest! {
        #[test]
        fn prune_is_idempotent(
            claims in proptest::collection::vec(arb_entry(), 0..8),
            drops in proptest::collection::vec(arb_entry(), 0..8),
        ) {
            let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
            let l = ledger(claims, drops);
            let (once, _) = l.pruned(now);
            let (twice, changed) = once.pruned(now);
            prop_assert!(!changed);
            prop_assert_eq!(&once.spec, &twice.spec);
            // Pruning never changes the entitlement.
            prop_assert_eq!(l.compute_entitlement(now), once.compute_entitlement(now));
        }
    }
}
