//! Compute slot of a node registered on the platform.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use tracing::{debug, info};

use jobnodes_core::{ComputeSlot, OfflineCause, SlotState};

use crate::error::{PlatformError, PlatformResult};

/// Connection state of one node.
///
/// Starts `Created` and accepting tasks. Every state change goes through
/// [`Computer::transition`], which rejects moves the slot state machine
/// does not allow.
#[derive(Debug)]
pub struct Computer {
    name: String,
    executors: u32,
    state: Mutex<SlotState>,
    accepting: AtomicBool,
    terminated_at: Mutex<Option<SystemTime>>,
    offline_cause: Mutex<Option<OfflineCause>>,
}

impl Computer {
    pub fn new(name: impl Into<String>, executors: u32) -> Self {
        Self {
            name: name.into(),
            executors,
            state: Mutex::new(SlotState::Created),
            accepting: AtomicBool::new(true),
            terminated_at: Mutex::new(None),
            offline_cause: Mutex::new(None),
        }
    }

    pub fn executors(&self) -> u32 {
        self.executors
    }

    pub fn state(&self) -> SlotState {
        *lock(&self.state)
    }

    pub fn is_online(&self) -> bool {
        self.state() == SlotState::Online
    }

    /// Move to `next`, failing on an illegal transition.
    pub fn transition(&self, next: SlotState) -> PlatformResult<()> {
        let mut state = lock(&self.state);
        if !state.can_transition_to(next) {
            return Err(PlatformError::Transition {
                node: self.name.clone(),
                from: *state,
                to: next,
            });
        }
        debug!(node = %self.name, from = ?*state, to = ?next, "slot transition");
        *state = next;
        Ok(())
    }

    pub fn terminated_at(&self) -> Option<SystemTime> {
        *lock(&self.terminated_at)
    }

    pub fn offline_cause(&self) -> Option<OfflineCause> {
        lock(&self.offline_cause).clone()
    }
}

impl ComputeSlot for Computer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_accepting_tasks(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    fn set_accepting_tasks(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    fn record_termination(&self) {
        *lock(&self.terminated_at) = Some(SystemTime::now());
    }

    fn disconnect(&self, cause: OfflineCause) {
        info!(node = %self.name, %cause, "slot taken offline");
        *lock(&self.offline_cause) = Some(cause);
        // Only a launching slot fails; others keep their state for teardown.
        let _ = self.transition(SlotState::Failed);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
