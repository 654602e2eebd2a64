//! Planned capacity and the pending-launch ledger.
//!
//! A [`PlannedCapacity`] is a promise that a node is being built. It
//! carries two cells: `future` settles as soon as the node descriptor
//! exists, `registration` once the host holds the node or never will.
//! The ledger counts a promise as capacity until its registration settles,
//! so later ticks do not ask for the same node again while registration
//! is still retrying.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use jobnodes_core::Label;

use crate::error::ProvisionError;
use crate::future::{node_future, NodeCompleter, NodeFuture, NodeOutcome};

/// Capacity promised by an in-flight node creation.
#[derive(Debug, Clone)]
pub struct PlannedCapacity {
    pub id: Uuid,
    pub label: Label,
    /// Executors the node will add.
    pub executors: u32,
    /// Settles with the node descriptor, before registration.
    pub future: NodeFuture,
    /// Settles once the node is registered or registration gave up.
    pub registration: NodeFuture,
}

/// Writer side of a [`PlannedCapacity`], held by the creating task.
#[derive(Debug, Clone)]
pub struct CreationSignals {
    pub published: NodeCompleter,
    pub registered: NodeCompleter,
}

impl CreationSignals {
    /// Settle every cell still open with `error`.
    pub fn fail(&self, error: Arc<ProvisionError>) {
        self.published.fail_shared(Arc::clone(&error));
        self.registered.fail_shared(error);
    }
}

impl PlannedCapacity {
    /// A fresh promise and the signals that settle it.
    pub fn pending(label: Label, executors: u32) -> (CreationSignals, Self) {
        let (published, future) = node_future();
        let (registered, registration) = node_future();
        let planned = Self {
            id: Uuid::new_v4(),
            label,
            executors,
            future,
            registration,
        };
        (CreationSignals { published, registered }, planned)
    }

    /// Whether the node is registered, or can no longer be.
    pub fn is_settled(&self) -> bool {
        self.registration.is_done()
    }

    /// The registration outcome, once settled.
    pub fn outcome(&self) -> Option<NodeOutcome> {
        if !self.is_settled() {
            return None;
        }
        // Signals dropped without settling.
        Some(
            self.registration
                .try_result()
                .unwrap_or_else(|| Err(Arc::new(ProvisionError::Abandoned))),
        )
    }
}

/// Entries recorded by a provisioner for its label(s).
#[derive(Debug, Default)]
pub struct PendingLedger {
    entries: Mutex<Vec<PlannedCapacity>>,
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a planned node. Returns `false` if the same entry is already
    /// recorded.
    pub fn record(&self, planned: PlannedCapacity) -> bool {
        let mut entries = self.lock();
        if entries.iter().any(|p| p.id == planned.id) {
            return false;
        }
        debug!(label = %planned.label, id = %planned.id, executors = planned.executors, "pending launch recorded");
        entries.push(planned);
        true
    }

    /// Executors promised for `label` by entries whose registration has not
    /// settled yet.
    pub fn planned_capacity(&self, label: &Label) -> u32 {
        self.lock()
            .iter()
            .filter(|p| &p.label == label && !p.is_settled())
            .map(|p| p.executors)
            .sum()
    }

    /// Remove and return every entry whose registration has settled.
    pub fn reap_resolved(&self) -> Vec<(PlannedCapacity, NodeOutcome)> {
        let mut entries = self.lock();
        let mut resolved = Vec::new();
        let mut i = 0;
        while i < entries.len() {
            if let Some(outcome) = entries[i].outcome() {
                resolved.push((entries.swap_remove(i), outcome));
            } else {
                i += 1;
            }
        }
        resolved
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PlannedCapacity>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::tests::test_node;

    fn agent(executors: u32) -> (CreationSignals, PlannedCapacity) {
        PlannedCapacity::pending(Label::from("agent"), executors)
    }

    #[test]
    fn records_each_entry_once() {
        let ledger = PendingLedger::new();
        let (_signals, planned) = agent(1);

        assert!(ledger.record(planned.clone()));
        assert!(!ledger.record(planned));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.planned_capacity(&Label::from("agent")), 1);
    }

    #[test]
    fn counts_until_registration_settles() {
        let ledger = PendingLedger::new();
        let (s1, p1) = agent(2);
        let (_s2, p2) = agent(1);
        let (_s3, p3) = PlannedCapacity::pending(Label::from("other"), 4);
        ledger.record(p1);
        ledger.record(p2);
        ledger.record(p3);
        assert_eq!(ledger.planned_capacity(&Label::from("agent")), 3);

        // Published but still registering: counted.
        s1.published.complete(test_node("agent-1"));
        assert_eq!(ledger.planned_capacity(&Label::from("agent")), 3);
        assert!(ledger.reap_resolved().is_empty());

        s1.registered.complete(test_node("agent-1"));
        assert_eq!(ledger.planned_capacity(&Label::from("agent")), 1);
        assert_eq!(ledger.planned_capacity(&Label::from("other")), 4);
    }

    #[test]
    fn reap_removes_settled_entries() {
        let ledger = PendingLedger::new();
        let (s1, p1) = agent(1);
        let (s2, p2) = agent(1);
        let (s3, p3) = agent(1);
        let (_s4, p4) = agent(1);
        for p in [p1, p2, p3, p4] {
            ledger.record(p);
        }

        s1.published.complete(test_node("agent-1"));
        s1.registered.complete(test_node("agent-1"));
        s2.published.complete(test_node("agent-2"));
        s2.fail(Arc::new(ProvisionError::Submit("registration gave up".to_string())));
        drop(s3);

        let reaped = ledger.reap_resolved();
        assert_eq!(reaped.len(), 3);
        assert_eq!(reaped.iter().filter(|(_, o)| o.is_ok()).count(), 1);
        assert!(reaped.iter().any(|(_, o)| matches!(o, Err(e) if matches!(**e, ProvisionError::Abandoned))));
        assert_eq!(ledger.len(), 1);
    }
}
