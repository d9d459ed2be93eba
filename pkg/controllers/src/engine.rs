use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::admission::AdmissionGate;
use crate::expiry::{ExpiryScheduler, LedgerSweep, SubNamespaceSweep};
use crate::reward::NodeRewardBinder;
use crate::tuner::QuotaTuner;
use crate::workqueue::WorkQueue;
use pkg_constants::state::{NODES, SUBNAMESPACES, TENANT_RESOURCE_QUOTAS, TENANTS};
use pkg_constants::timing::{DEFAULT_WORKERS, EVICTION_SETTLE_MILLIS, FALLBACK_SWEEP_HOURS};
use pkg_state::client::StateStore;
use pkg_state::watch::{EventType, WatchEvent};
use pkg_types::Object;
use pkg_types::ledger::TenantResourceQuota;
use pkg_types::namespace::Namespace;
use pkg_types::node::Node;
use pkg_types::subnamespace::SubNamespace;
use pkg_types::tenant::Tenant;

/// A unit of work for the reconciliation workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reconcile {
    Tenant(String),
    SubNamespace { namespace: String, name: String },
    Node(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workers: usize,
    pub eviction_settle: Duration,
    pub fallback_sweep: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            eviction_settle: Duration::from_millis(EVICTION_SETTLE_MILLIS),
            fallback_sweep: Duration::from_secs(FALLBACK_SWEEP_HOURS * 3600),
        }
    }
}

/// The quota accounting engine: workers, event dispatch and expiry schedulers.
pub struct QuotaEngine {
    store: StateStore,
    config: EngineConfig,
    tuner: QuotaTuner,
    gate: AdmissionGate,
}

impl QuotaEngine {
    pub fn new(store: StateStore, config: EngineConfig) -> Self {
        let tuner = QuotaTuner::new(store.clone()).with_settle_delay(config.eviction_settle);
        let gate = AdmissionGate::new(store.clone()).with_settle_delay(config.eviction_settle);
        Self {
            store,
            config,
            tuner,
            gate,
        }
    }

    pub fn tuner(&self) -> QuotaTuner {
        self.tuner.clone()
    }

    pub fn gate(&self) -> AdmissionGate {
        self.gate.clone()
    }

    /// Spawn every task and queue a full resync.
    pub async fn start(self) -> anyhow::Result<EngineHandle> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue: WorkQueue<Reconcile> = WorkQueue::new();

        // Subscribe before the initial resync so no change slips between the two.
        let events = self.store.event_log.subscribe()?;
        resync(&self.store, &queue).await?;

        let workers = (0..self.config.workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: queue.clone(),
                    tuner: self.tuner.clone(),
                    gate: self.gate.clone(),
                    binder: NodeRewardBinder::new(self.store.clone()),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let dispatcher = Dispatcher {
            store: self.store.clone(),
            queue: queue.clone(),
            shutdown: shutdown_rx.clone(),
        };
        let dispatcher = tokio::spawn(dispatcher.run(events));

        let schedulers = vec![
            ExpiryScheduler::new(
                self.store.clone(),
                LedgerSweep::new(self.store.clone(), queue.clone()),
                shutdown_rx.clone(),
            )
            .with_fallback_period(self.config.fallback_sweep)
            .start(),
            ExpiryScheduler::new(
                self.store.clone(),
                SubNamespaceSweep::new(self.store.clone()),
                shutdown_rx,
            )
            .with_fallback_period(self.config.fallback_sweep)
            .start(),
        ];

        info!(
            "Quota engine started ({} workers, settle={}ms)",
            self.config.workers.max(1),
            self.config.eviction_settle.as_millis()
        );

        Ok(EngineHandle {
            queue,
            shutdown_tx,
            workers,
            dispatcher,
            schedulers,
        })
    }
}

/// Running engine. Dropping it leaves the tasks running; call `shutdown`.
pub struct EngineHandle {
    queue: WorkQueue<Reconcile>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
    schedulers: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn queue(&self) -> &WorkQueue<Reconcile> {
        &self.queue
    }

    /// Stop the queue, wait for in-flight items, then stop the dispatcher and schedulers.
    pub async fn shutdown(self) {
        info!("Quota engine shutting down");
        let _ = self.shutdown_tx.send(true);
        self.queue.shut_down().await;
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Reconcile worker ended abnormally: {}", e);
            }
        }
        let _ = self.dispatcher.await;
        for scheduler in self.schedulers {
            let _ = scheduler.await;
        }
        info!("Quota engine stopped");
    }
}

struct Worker {
    id: usize,
    queue: WorkQueue<Reconcile>,
    tuner: QuotaTuner,
    gate: AdmissionGate,
    binder: NodeRewardBinder,
}

impl Worker {
    async fn run(self) {
        debug!("Reconcile worker {} started", self.id);
        while let Some(item) = self.queue.get().await {
            let result = match &item {
                Reconcile::Tenant(tenant) => self.tuner.reconcile(tenant).await.map(|_| ()),
                Reconcile::SubNamespace { namespace, name } => {
                    self.gate.reconcile(namespace, name).await.map(|_| ())
                }
                Reconcile::Node(name) => self.binder.reconcile(name).await.map(|_| ()),
            };
            match result {
                Ok(()) => self.queue.forget(&item).await,
                Err(e) => {
                    warn!("Reconcile {:?} error: {:#}", item, e);
                    self.queue.add_rate_limited(item.clone()).await;
                }
            }
            self.queue.done(&item).await;
        }
        debug!("Reconcile worker {} stopped", self.id);
    }
}

struct Dispatcher {
    store: StateStore,
    queue: WorkQueue<Reconcile>,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    async fn run(mut self, mut events: tokio::sync::broadcast::Receiver<WatchEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                result = events.recv() => match result {
                    Ok(event) => {
                        if let Err(e) = self.dispatch(&event).await {
                            warn!("Dispatch of {} error: {}", event.key, e);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Event stream lagged by {} events, resyncing", n);
                        if let Err(e) = resync(&self.store, &self.queue).await {
                            warn!("Resync error: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Event dispatcher stopped");
    }

    async fn dispatch(&self, event: &WatchEvent) -> anyhow::Result<()> {
        match resource_of(&event.key) {
            Some(TENANTS) => {
                if event.event_type == EventType::Deleted {
                    return Ok(());
                }
                let Some(tenant) = event.decode::<Tenant>() else {
                    return Ok(());
                };
                let name = tenant.metadata.name;
                self.queue.add(Reconcile::Tenant(name.clone())).await;
                // Sub-namespaces held back while the tenant was disabled get another chance.
                for sn in tenant_subnamespaces(&self.store, &name).await? {
                    if !sn.is_live() {
                        self.queue.add(subnamespace_key(&sn)).await;
                    }
                }
            }
            Some(TENANT_RESOURCE_QUOTAS) => {
                if event.event_type != EventType::Deleted
                    && let Some(ledger) = event.decode::<TenantResourceQuota>()
                {
                    self.queue.add(Reconcile::Tenant(ledger.metadata.name)).await;
                }
            }
            Some(SUBNAMESPACES) => {
                if event.event_type != EventType::Deleted
                    && let Some(sn) = event.decode::<SubNamespace>()
                {
                    self.queue.add(subnamespace_key(&sn)).await;
                }
            }
            Some(NODES) => {
                // Deleted events still queue the name; the worker revokes what is gone.
                if let Some(node) = event.decode::<Node>() {
                    self.queue.add(Reconcile::Node(node.metadata.name)).await;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Resource segment of a registry key: `/registry/<resource>/...`.
fn resource_of(key: &str) -> Option<&str> {
    key.strip_prefix(pkg_constants::state::REGISTRY_ROOT)?
        .strip_prefix('/')?
        .split('/')
        .next()
}

fn subnamespace_key(sn: &SubNamespace) -> Reconcile {
    Reconcile::SubNamespace {
        namespace: sn.parent().to_string(),
        name: sn.metadata.name.clone(),
    }
}

/// Sub-namespace records living in namespaces of the given tenant.
async fn tenant_subnamespaces(store: &StateStore, tenant: &str) -> anyhow::Result<Vec<SubNamespace>> {
    let namespaces: Vec<Namespace> = store.list_objects(None).await?;
    let mut records = Vec::new();
    for ns in namespaces.iter().filter(|ns| ns.tenant() == Some(tenant)) {
        records.extend(store.list_objects::<SubNamespace>(Some(&ns.metadata.name)).await?);
    }
    Ok(records)
}

/// Queue every tenant, sub-namespace and node.
async fn resync(store: &StateStore, queue: &WorkQueue<Reconcile>) -> anyhow::Result<()> {
    let tenants: Vec<Tenant> = store.list_objects(None).await?;
    for tenant in &tenants {
        queue.add(Reconcile::Tenant(tenant.metadata.name.clone())).await;
    }
    let records: Vec<SubNamespace> = store.list_objects(None).await?;
    for sn in &records {
        queue.add(subnamespace_key(sn)).await;
    }
    let nodes: Vec<Node> = store.list_objects(None).await?;
    for node in &nodes {
        queue.add(Reconcile::Node(node.metadata.name.clone())).await;
    }
    debug!(
        "Resync queued {} tenants, {} sub-namespaces and {} nodes (prefix {})",
        tenants.len(),
        records.len(),
        nodes.len(),
        Tenant::list_prefix(None)
    );
    Ok(())
}
