//! Capacity strategy — decides whether a label needs another node.
//!
//! # Decision Algorithm
//!
//! ```text
//! skip if quieting down, disabled, unlabeled or excluded
//! skip if policy says so and the label already owns an accepting node
//!
//! available = max(available + connecting, defined) + planned
//! demand    = queue_length
//!
//! if available >= max_nodes_per_label:  SatisfiedForNow   (ceiling)
//! if available <  demand:               request one node, available += 1
//! if available >= demand:               SatisfiedForNow
//! else                                  NeedsMoreEvaluation
//! ```
//!
//! At most one node is requested per decision; further demand is picked up
//! by the next tick once the new node counts as planned capacity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use jobnodes_core::{Label, LoadSnapshot, ProvisionerConfig};

use crate::planned::PlannedCapacity;
use crate::task::NodeRequester;

/// Whether later strategies should still be consulted this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyDecision {
    NeedsMoreEvaluation,
    SatisfiedForNow,
}

/// Everything a strategy sees for one label during one tick.
#[derive(Debug, Clone)]
pub struct ProvisioningState {
    pub label: Option<Label>,
    pub snapshot: LoadSnapshot,
    /// Executors already promised by in-flight node creations.
    pub planned_capacity_snapshot: u32,
    pub quieting_down: bool,
    pub label_has_accepting_node: bool,
    pending_launches: Vec<PlannedCapacity>,
}

impl ProvisioningState {
    pub fn new(label: Option<Label>, snapshot: LoadSnapshot, planned_capacity_snapshot: u32) -> Self {
        Self {
            label,
            snapshot,
            planned_capacity_snapshot,
            quieting_down: false,
            label_has_accepting_node: false,
            pending_launches: Vec::new(),
        }
    }

    pub fn with_quieting_down(mut self, quieting_down: bool) -> Self {
        self.quieting_down = quieting_down;
        self
    }

    pub fn with_accepting_node(mut self, label_has_accepting_node: bool) -> Self {
        self.label_has_accepting_node = label_has_accepting_node;
        self
    }

    /// Record capacity requested during this tick.
    pub fn record_pending_launch(&mut self, planned: PlannedCapacity) {
        self.pending_launches.push(planned);
    }

    pub fn pending_launches(&self) -> &[PlannedCapacity] {
        &self.pending_launches
    }

    pub fn take_pending_launches(&mut self) -> Vec<PlannedCapacity> {
        std::mem::take(&mut self.pending_launches)
    }
}

/// A capacity decision step consulted by the scheduler on every tick.
pub trait CapacityDecider: Send + Sync {
    fn name(&self) -> &str;

    /// Decide for the label in `state`, recording any requested capacity
    /// into it. Must not block on node creation.
    fn decide(&self, state: &mut ProvisioningState, config: &Arc<ProvisionerConfig>) -> StrategyDecision;
}

/// Requests one node at a time while queued demand exceeds capacity.
pub struct OnDemandStrategy {
    requester: Arc<dyn NodeRequester>,
    label_locks: Mutex<HashMap<Label, Arc<Mutex<()>>>>,
}

impl OnDemandStrategy {
    pub fn new(requester: Arc<dyn NodeRequester>) -> Self {
        Self {
            requester,
            label_locks: Mutex::new(HashMap::new()),
        }
    }

    fn label_lock(&self, label: &Label) -> Arc<Mutex<()>> {
        let mut locks = self.label_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(label.clone()).or_default())
    }
}

impl CapacityDecider for OnDemandStrategy {
    fn name(&self) -> &str {
        "on-demand"
    }

    fn decide(&self, state: &mut ProvisioningState, config: &Arc<ProvisionerConfig>) -> StrategyDecision {
        if state.quieting_down || !config.enabled {
            return StrategyDecision::NeedsMoreEvaluation;
        }
        let Some(label) = state.label.clone() else {
            return StrategyDecision::NeedsMoreEvaluation;
        };
        if label.matches(&config.exclude_label_set()) {
            debug!(%label, "label excluded from on-demand provisioning");
            return StrategyDecision::NeedsMoreEvaluation;
        }
        if config.skip_if_label_has_accepting_node && state.label_has_accepting_node {
            debug!(%label, "label already has an accepting node");
            return StrategyDecision::NeedsMoreEvaluation;
        }

        let lock = self.label_lock(&label);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let snapshot = state.snapshot;
        let mut available = snapshot
            .existing_capacity()
            .saturating_add(state.planned_capacity_snapshot);
        let demand = snapshot.queue_length;

        debug!(
            %label,
            available_executors = snapshot.available_executors,
            connecting_executors = snapshot.connecting_executors,
            defined_executors = snapshot.defined_executors,
            planned = state.planned_capacity_snapshot,
            available,
            demand,
            "evaluating capacity"
        );

        if available >= config.max_nodes_per_label {
            debug!(%label, available, ceiling = config.max_nodes_per_label, "label at capacity ceiling");
            return StrategyDecision::SatisfiedForNow;
        }

        if available < demand {
            match self
                .requester
                .request_node(&label, config, config.executors_per_new_node)
            {
                Ok(planned) => {
                    info!(%label, available, demand, id = %planned.id, "requested new node");
                    state.record_pending_launch(planned);
                    available += 1;
                }
                Err(e) => {
                    error!(%label, error = %e, "failed to request node");
                }
            }
        }

        if available >= demand {
            StrategyDecision::SatisfiedForNow
        } else {
            StrategyDecision::NeedsMoreEvaluation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::{ProvisionError, ProvisionResult};

    /// Counts requests and optionally rejects them.
    #[derive(Default)]
    struct StubRequester {
        requests: AtomicU32,
        reject: bool,
    }

    impl NodeRequester for StubRequester {
        fn request_node(
            &self,
            label: &Label,
            _config: &Arc<ProvisionerConfig>,
            executors: u32,
        ) -> ProvisionResult<PlannedCapacity> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(ProvisionError::Submit("pool closed".to_string()));
            }
            let (_signals, planned) = PlannedCapacity::pending(label.clone(), executors);
            Ok(planned)
        }
    }

    fn enabled_config() -> Arc<ProvisionerConfig> {
        Arc::new(ProvisionerConfig {
            enabled: true,
            max_nodes_per_label: 5,
            ..ProvisionerConfig::default()
        })
    }

    fn snapshot(available: u32, connecting: u32, defined: u32, queue: u32) -> LoadSnapshot {
        LoadSnapshot {
            available_executors: available,
            connecting_executors: connecting,
            defined_executors: defined,
            queue_length: queue,
        }
    }

    fn strategy() -> (Arc<StubRequester>, OnDemandStrategy) {
        let requester = Arc::new(StubRequester::default());
        let strategy = OnDemandStrategy::new(requester.clone());
        (requester, strategy)
    }

    fn agent_state(snap: LoadSnapshot, planned: u32) -> ProvisioningState {
        ProvisioningState::new(Some(Label::from("agent")), snap, planned)
    }

    #[test]
    fn ceiling_is_satisfied_without_requests() {
        let (requester, strategy) = strategy();
        let config = enabled_config();

        for (snap, planned) in [
            (snapshot(5, 0, 0, 100), 0),
            (snapshot(0, 0, 5, 100), 0),
            (snapshot(2, 1, 0, 100), 2),
        ] {
            let mut state = agent_state(snap, planned);
            assert_eq!(strategy.decide(&mut state, &config), StrategyDecision::SatisfiedForNow);
            assert!(state.pending_launches().is_empty());
        }
        assert_eq!(requester.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn covered_demand_requests_nothing() {
        let (requester, strategy) = strategy();
        let mut state = agent_state(snapshot(2, 0, 2, 2), 0);

        assert_eq!(
            strategy.decide(&mut state, &enabled_config()),
            StrategyDecision::SatisfiedForNow
        );
        assert_eq!(requester.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn planned_capacity_covers_demand() {
        let (requester, strategy) = strategy();
        let mut state = agent_state(snapshot(0, 0, 0, 2), 2);

        assert_eq!(
            strategy.decide(&mut state, &enabled_config()),
            StrategyDecision::SatisfiedForNow
        );
        assert_eq!(requester.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exactly_one_request_per_tick() {
        let (requester, strategy) = strategy();
        let mut state = agent_state(snapshot(0, 0, 0, 3), 0);

        assert_eq!(
            strategy.decide(&mut state, &enabled_config()),
            StrategyDecision::NeedsMoreEvaluation
        );
        assert_eq!(requester.requests.load(Ordering::SeqCst), 1);
        assert_eq!(state.pending_launches().len(), 1);
        assert_eq!(state.pending_launches()[0].label, Label::from("agent"));
    }

    #[test]
    fn single_request_can_satisfy() {
        let (requester, strategy) = strategy();
        let mut state = agent_state(snapshot(0, 0, 0, 1), 0);

        assert_eq!(
            strategy.decide(&mut state, &enabled_config()),
            StrategyDecision::SatisfiedForNow
        );
        assert_eq!(requester.requests.load(Ordering::SeqCst), 1);
        assert_eq!(state.take_pending_launches().len(), 1);
        assert!(state.pending_launches().is_empty());
    }

    #[test]
    fn skipped_states_have_no_side_effects() {
        let (requester, strategy) = strategy();
        let busy = snapshot(0, 0, 0, 4);

        let disabled = Arc::new(ProvisionerConfig {
            enabled: false,
            ..(*enabled_config()).clone()
        });
        let excluded = Arc::new(ProvisionerConfig {
            exclude_labels: "master  agent".to_string(),
            ..(*enabled_config()).clone()
        });

        let cases = [
            (agent_state(busy, 0), disabled),
            (agent_state(busy, 0), excluded),
            (agent_state(busy, 0).with_quieting_down(true), enabled_config()),
            (ProvisioningState::new(None, busy, 0), enabled_config()),
        ];
        for (mut state, config) in cases {
            assert_eq!(
                strategy.decide(&mut state, &config),
                StrategyDecision::NeedsMoreEvaluation
            );
            assert!(state.pending_launches().is_empty());
        }
        assert_eq!(requester.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn accepting_node_policy() {
        let (requester, strategy) = strategy();
        let skip = Arc::new(ProvisionerConfig {
            skip_if_label_has_accepting_node: true,
            ..(*enabled_config()).clone()
        });

        let mut state = agent_state(snapshot(0, 0, 0, 2), 0).with_accepting_node(true);
        assert_eq!(strategy.decide(&mut state, &skip), StrategyDecision::NeedsMoreEvaluation);
        assert_eq!(requester.requests.load(Ordering::SeqCst), 0);

        // Default policy provisions regardless.
        let mut state = agent_state(snapshot(0, 0, 0, 2), 0).with_accepting_node(true);
        strategy.decide(&mut state, &enabled_config());
        assert_eq!(requester.requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_request_records_nothing() {
        let requester = Arc::new(StubRequester {
            reject: true,
            ..StubRequester::default()
        });
        let strategy = OnDemandStrategy::new(requester.clone());
        let mut state = agent_state(snapshot(0, 0, 0, 1), 0);

        assert_eq!(
            strategy.decide(&mut state, &enabled_config()),
            StrategyDecision::NeedsMoreEvaluation
        );
        assert_eq!(requester.requests.load(Ordering::SeqCst), 1);
        assert!(state.pending_launches().is_empty());
    }

    #[test]
    fn requests_configured_executors() {
        let (_requester, strategy) = strategy();
        let config = Arc::new(ProvisionerConfig {
            executors_per_new_node: 3,
            ..(*enabled_config()).clone()
        });
        let mut state = agent_state(snapshot(0, 0, 0, 1), 0);
        strategy.decide(&mut state, &config);
        assert_eq!(state.pending_launches()[0].executors, 3);
    }
}
