//! Per-label provisioning scheduler.
//!
//! A [`NodeProvisioner`] owns the pending-launch ledger of one label (or of
//! unlabeled work) and runs the configured strategies on every tick. Ticks
//! happen periodically and whenever a review is suggested. The
//! [`ProvisionerRegistry`] creates provisioners lazily and runs their loops
//! in the background, one task per label.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jobnodes_core::{Label, LoadSnapshot, SharedConfig};

use crate::planned::PendingLedger;
use crate::strategy::{CapacityDecider, ProvisioningState, StrategyDecision};

/// Load accounting provided by the host.
#[async_trait]
pub trait LoadStatistics: Send + Sync {
    /// Executor and queue counts for `label`, or for unlabeled work.
    async fn snapshot(&self, label: Option<&Label>) -> LoadSnapshot;

    /// Whether some node of `label` currently accepts tasks.
    async fn label_has_accepting_node(&self, label: &Label) -> bool;

    /// Whether the host is draining and should not grow.
    async fn is_quieting_down(&self) -> bool;
}

/// What a single tick saw and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub label: Option<Label>,
    pub snapshot: LoadSnapshot,
    pub planned_capacity: u32,
    pub decision: StrategyDecision,
    /// Nodes requested during this tick.
    pub launched: usize,
    /// Pending launches reaped at the start of this tick.
    pub resolved: usize,
    /// Reaped launches that ended in an error.
    pub failed: usize,
}

/// Provisioning loop for a single label.
pub struct NodeProvisioner {
    label: Option<Label>,
    stats: Arc<dyn LoadStatistics>,
    strategies: Vec<Arc<dyn CapacityDecider>>,
    config: SharedConfig,
    ledger: PendingLedger,
    review: Notify,
    tick_lock: Mutex<()>,
}

impl NodeProvisioner {
    pub fn new(
        label: Option<Label>,
        stats: Arc<dyn LoadStatistics>,
        strategies: Vec<Arc<dyn CapacityDecider>>,
        config: SharedConfig,
    ) -> Self {
        Self {
            label,
            stats,
            strategies,
            config,
            ledger: PendingLedger::new(),
            review: Notify::new(),
            tick_lock: Mutex::new(()),
        }
    }

    pub fn label(&self) -> Option<&Label> {
        self.label.as_ref()
    }

    pub fn ledger(&self) -> &PendingLedger {
        &self.ledger
    }

    /// Ask for a tick as soon as possible instead of waiting for the next
    /// interval. Suggestions made while a tick runs are coalesced.
    pub fn suggest_review_now(&self) {
        debug!(label = ?self.label, "review suggested");
        self.review.notify_one();
    }

    /// Run one evaluation. Ticks of the same provisioner never overlap.
    pub async fn tick(&self) -> TickReport {
        let _guard = self.tick_lock.lock().await;

        let reaped = self.ledger.reap_resolved();
        let mut failed = 0;
        for (planned, outcome) in &reaped {
            match outcome {
                Ok(node) => {
                    debug!(label = %planned.label, node = %node.name, "pending launch resolved")
                }
                Err(e) => {
                    failed += 1;
                    warn!(label = %planned.label, error = %e, "pending launch failed");
                }
            }
        }

        let config = self.config.current();
        // Read the ledger first: a node registering in between is then
        // counted twice rather than not at all.
        let planned_capacity = self.label.as_ref().map_or(0, |l| self.ledger.planned_capacity(l));
        let snapshot = self.stats.snapshot(self.label.as_ref()).await;
        let quieting_down = self.stats.is_quieting_down().await;
        let accepting = match &self.label {
            Some(label) => self.stats.label_has_accepting_node(label).await,
            None => false,
        };

        let mut state = ProvisioningState::new(self.label.clone(), snapshot, planned_capacity)
            .with_quieting_down(quieting_down)
            .with_accepting_node(accepting);

        let mut decision = StrategyDecision::NeedsMoreEvaluation;
        for strategy in &self.strategies {
            decision = strategy.decide(&mut state, &config);
            debug!(label = ?self.label, strategy = strategy.name(), ?decision, "strategy evaluated");
            if decision == StrategyDecision::SatisfiedForNow {
                break;
            }
        }

        let mut launched = 0;
        for planned in state.take_pending_launches() {
            if self.ledger.record(planned) {
                launched += 1;
            }
        }

        TickReport {
            label: self.label.clone(),
            snapshot,
            planned_capacity,
            decision,
            launched,
            resolved: reaped.len(),
            failed,
        }
    }

    /// Tick every `interval` and on every suggested review until
    /// `shutdown` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(label = ?self.label, interval_ms = interval.as_millis() as u64, "node provisioner started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick().await;
                }
                _ = self.review.notified() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!(label = ?self.label, "node provisioner shutting down");
                    break;
                }
            }
        }
    }
}

struct ProvisionerSlot {
    provisioner: Arc<NodeProvisioner>,
    handle: Option<JoinHandle<()>>,
}

/// One [`NodeProvisioner`] per label, created on first use.
pub struct ProvisionerRegistry {
    stats: Arc<dyn LoadStatistics>,
    strategies: Vec<Arc<dyn CapacityDecider>>,
    config: SharedConfig,
    interval: Duration,
    provisioners: RwLock<HashMap<Option<Label>, ProvisionerSlot>>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
}

impl ProvisionerRegistry {
    pub fn new(
        stats: Arc<dyn LoadStatistics>,
        strategies: Vec<Arc<dyn CapacityDecider>>,
        config: SharedConfig,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            stats,
            strategies,
            config,
            interval,
            provisioners: RwLock::new(HashMap::new()),
            shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// The provisioner for `label`, created (and started, if the registry
    /// is running) on first use.
    pub async fn provisioner_for(&self, label: Option<&Label>) -> Arc<NodeProvisioner> {
        let key = label.cloned();
        if let Some(slot) = self.provisioners.read().await.get(&key) {
            return Arc::clone(&slot.provisioner);
        }

        let mut provisioners = self.provisioners.write().await;
        let slot = provisioners.entry(key).or_insert_with_key(|label| {
            debug!(?label, "creating node provisioner");
            ProvisionerSlot {
                provisioner: Arc::new(NodeProvisioner::new(
                    label.clone(),
                    Arc::clone(&self.stats),
                    self.strategies.clone(),
                    self.config.clone(),
                )),
                handle: None,
            }
        });
        if self.running.load(Ordering::SeqCst) && slot.handle.is_none() {
            slot.handle = Some(self.spawn_loop(&slot.provisioner));
        }
        Arc::clone(&slot.provisioner)
    }

    /// Start background loops for every provisioner, current and future.
    pub async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut provisioners = self.provisioners.write().await;
        for slot in provisioners.values_mut() {
            if slot.handle.is_none() {
                slot.handle = Some(self.spawn_loop(&slot.provisioner));
            }
        }
        info!(provisioners = provisioners.len(), "provisioner registry started");
    }

    /// Signal every loop to stop and wait for running ticks to finish.
    pub async fn stop_all(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut provisioners = self.provisioners.write().await;
            provisioners.values_mut().filter_map(|s| s.handle.take()).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "node provisioner task failed");
            }
        }
        info!("provisioner registry stopped");
    }

    /// Tick every known provisioner once, in label order.
    pub async fn tick_all(&self) -> Vec<TickReport> {
        let mut provisioners: Vec<_> = {
            let guard = self.provisioners.read().await;
            guard.values().map(|s| Arc::clone(&s.provisioner)).collect()
        };
        provisioners.sort_by(|a, b| a.label().cmp(&b.label()));

        let mut reports = Vec::with_capacity(provisioners.len());
        for provisioner in provisioners {
            reports.push(provisioner.tick().await);
        }
        reports
    }

    pub async fn labels(&self) -> Vec<Option<Label>> {
        let mut labels: Vec<_> = self.provisioners.read().await.keys().cloned().collect();
        labels.sort();
        labels
    }

    fn spawn_loop(&self, provisioner: &Arc<NodeProvisioner>) -> JoinHandle<()> {
        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(Arc::clone(provisioner).run(self.interval, shutdown))
    }
}
