use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::Reconcile;
use crate::eviction::delete_subnamespace;
use crate::tuner::prune_ledger;
use crate::workqueue::WorkQueue;
use pkg_constants::timing::{FALLBACK_SWEEP_HOURS, SWEEP_RETRY_SECS};
use pkg_state::client::StateStore;
use pkg_state::watch::{EventType, WatchEvent, Watcher};
use pkg_types::Object;
use pkg_types::ledger::TenantResourceQuota;
use pkg_types::subnamespace::SubNamespace;
use pkg_types::tenant::Tenant;

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// One kind of record with expiring content.
#[async_trait]
pub trait ExpirySweep: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Key prefix whose changes may announce a new expiry.
    fn watch_prefix(&self) -> String;

    /// Closest future expiry carried by a changed record.
    fn observed_expiry(&self, event: &WatchEvent) -> Option<DateTime<Utc>>;

    /// Remove everything that has expired and return the next future expiry.
    async fn sweep(&self) -> anyhow::Result<Option<DateTime<Utc>>>;
}

enum Signal {
    Expiry(DateTime<Utc>),
    /// Events were dropped; the next expiry has to be recomputed.
    Resync,
}

/// Wakes exactly at the next expiry instead of polling.
///
/// A forwarding task turns watch events into expiry notifications; the main
/// loop keeps one timer that only ever moves earlier, except after a full
/// sweep recomputes it. Without a watch it sweeps on a fixed long period.
pub struct ExpiryScheduler<S> {
    store: StateStore,
    sweep: Arc<S>,
    fallback: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<S: ExpirySweep> ExpiryScheduler<S> {
    pub fn new(store: StateStore, sweep: S, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            store,
            sweep: Arc::new(sweep),
            fallback: Duration::from_secs(FALLBACK_SWEEP_HOURS * 3600),
            shutdown,
        }
    }

    /// Period of the fallback sweep used when no watch can be established.
    pub fn with_fallback_period(mut self, fallback: Duration) -> Self {
        self.fallback = fallback;
        self
    }

    /// Start the scheduler loop as a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) {
        let name = self.sweep.name();
        let (tx, mut rx) = mpsc::channel(64);
        let mut watching = match self.store.watch(&self.sweep.watch_prefix()) {
            Ok(watcher) => {
                tokio::spawn(forward(watcher, self.sweep.clone(), tx, self.shutdown.clone()));
                true
            }
            Err(e) => {
                warn!(
                    "{} expiry watch unavailable ({}), sweeping every {}s",
                    name,
                    e,
                    self.fallback.as_secs()
                );
                false
            }
        };
        info!("{} ExpiryScheduler started", name);

        let mut next = self.sweep_now().await;
        let mut fallback_at = deadline_after(self.fallback);

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let mut deadline = next.map(instant_at);
            if !watching {
                deadline = Some(deadline.map_or(fallback_at, |d| d.min(fallback_at)));
            }

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                signal = rx.recv(), if watching => match signal {
                    Some(Signal::Expiry(expiry)) => {
                        if next.is_none_or(|current| expiry < current) {
                            debug!("{} timer moved to {}", name, expiry);
                            next = Some(expiry);
                        }
                    }
                    Some(Signal::Resync) => next = self.sweep_now().await,
                    None => {
                        warn!(
                            "{} expiry watch closed, sweeping every {}s",
                            name,
                            self.fallback.as_secs()
                        );
                        watching = false;
                        fallback_at = deadline_after(self.fallback);
                    }
                },
                _ = sleep_until(deadline), if deadline.is_some() => {
                    next = self.sweep_now().await;
                    if !watching {
                        fallback_at = deadline_after(self.fallback);
                    }
                }
            }
        }
        info!("{} ExpiryScheduler stopped", name);
    }

    async fn sweep_now(&self) -> Option<DateTime<Utc>> {
        match self.sweep.sweep().await {
            Ok(next) => {
                debug!("{} sweep done, next expiry {:?}", self.sweep.name(), next);
                next
            }
            Err(e) => {
                warn!("{} ExpiryScheduler sweep error: {}", self.sweep.name(), e);
                Some(Utc::now() + chrono::Duration::seconds(SWEEP_RETRY_SECS as i64))
            }
        }
    }
}

async fn forward<S: ExpirySweep>(
    mut watcher: Watcher,
    sweep: Arc<S>,
    tx: mpsc::Sender<Signal>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let signal = tokio::select! {
            _ = shutdown.changed() => return,
            event = watcher.recv() => match event {
                Ok(event) => match sweep.observed_expiry(&event) {
                    Some(expiry) => Signal::Expiry(expiry),
                    None => continue,
                },
                Err(RecvError::Lagged(n)) => {
                    debug!("{} expiry watch lagged by {} events", sweep.name(), n);
                    Signal::Resync
                }
                Err(RecvError::Closed) => return,
            },
        };
        if tx.send(signal).await.is_err() {
            return;
        }
    }
}

fn instant_at(at: DateTime<Utc>) -> Instant {
    deadline_after((at - Utc::now()).to_std().unwrap_or_default())
}

/// `now + period`, clamped to roughly thirty years ahead.
fn deadline_after(period: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(period.min(FAR_FUTURE)).unwrap_or(now)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Prunes elapsed claims and drops from every active tenant's ledger.
pub struct LedgerSweep {
    store: StateStore,
    queue: WorkQueue<Reconcile>,
}

impl LedgerSweep {
    pub fn new(store: StateStore, queue: WorkQueue<Reconcile>) -> Self {
        Self { store, queue }
    }
}

#[async_trait]
impl ExpirySweep for LedgerSweep {
    fn name(&self) -> &'static str {
        "Ledger"
    }

    fn watch_prefix(&self) -> String {
        TenantResourceQuota::list_prefix(None)
    }

    fn observed_expiry(&self, event: &WatchEvent) -> Option<DateTime<Utc>> {
        if event.event_type == EventType::Deleted {
            return None;
        }
        event
            .decode::<TenantResourceQuota>()?
            .next_expiry(Utc::now())
    }

    async fn sweep(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let ledgers: Vec<TenantResourceQuota> = self.store.list_objects(None).await?;
        let mut next: Option<DateTime<Utc>> = None;
        for ledger in ledgers {
            let tenant = ledger.metadata.name.clone();
            let active = self
                .store
                .get_object::<Tenant>(None, &tenant)
                .await?
                .is_some_and(|t| t.spec.enabled);
            if active && prune_ledger(&self.store, &tenant).await? {
                self.queue.add(Reconcile::Tenant(tenant)).await;
            }
            if let Some(expiry) = ledger.next_expiry(Utc::now()) {
                next = Some(next.map_or(expiry, |n| n.min(expiry)));
            }
        }
        Ok(next)
    }
}

/// Deletes sub-namespaces whose own expiry has elapsed.
pub struct SubNamespaceSweep {
    store: StateStore,
}

impl SubNamespaceSweep {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ExpirySweep for SubNamespaceSweep {
    fn name(&self) -> &'static str {
        "SubNamespace"
    }

    fn watch_prefix(&self) -> String {
        SubNamespace::list_prefix(None)
    }

    fn observed_expiry(&self, event: &WatchEvent) -> Option<DateTime<Utc>> {
        if event.event_type == EventType::Deleted {
            return None;
        }
        event.decode::<SubNamespace>()?.spec.expiry
    }

    async fn sweep(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let records: Vec<SubNamespace> = self.store.list_objects(None).await?;
        let now = Utc::now();
        let mut next: Option<DateTime<Utc>> = None;
        for sn in records {
            if sn.is_expired(now) {
                info!("Sub-namespace {}/{} expired", sn.parent(), sn.metadata.name);
                delete_subnamespace(&self.store, sn.parent(), &sn.metadata.name).await?;
            } else if let Some(expiry) = sn.spec.expiry {
                next = Some(next.map_or(expiry, |n| n.min(expiry)));
            }
        }
        Ok(next)
    }
}
