//! Interfaces the host platform provides to the engine.
//!
//! The engine never touches host internals directly. A host adapter
//! implements these traits over its own inventory, job engine and
//! connection handling.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HostResult;
use crate::listener::TaskListener;
use crate::types::{JobParameter, JobRef, NodeDescriptor, OfflineCause, RunResult};

/// The host's registry of worker nodes.
#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// Register a node. Hosts may fail this spuriously under concurrent
    /// registration, so callers retry.
    async fn add_node(&self, node: &NodeDescriptor) -> HostResult<()>;

    /// Remove a node by name.
    async fn remove_node(&self, name: &str) -> HostResult<()>;

    /// The compute slot of a registered node, if the host created one.
    async fn compute_slot(&self, name: &str) -> Option<Arc<dyn ComputeSlot>>;
}

/// The host's parameterized-job engine.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Look up a job by its full name.
    async fn find_job(&self, name: &str) -> Option<JobRef>;

    /// Queue a run. `None` means the host declined to schedule it.
    async fn schedule(
        &self,
        job: &JobRef,
        parameters: &[JobParameter],
    ) -> HostResult<Option<Arc<dyn JobRun>>>;
}

/// A single scheduled run of an external job.
#[async_trait]
pub trait JobRun: Send + Sync {
    /// Location of the run for display.
    fn url(&self) -> String;

    /// Wait until the run finishes.
    async fn wait(&self) -> HostResult<RunResult>;

    /// Current length of the run log in bytes.
    async fn log_length(&self) -> HostResult<u64>;

    /// Copy log bytes starting at `offset` into `listener`, returning the
    /// offset just past what was written.
    async fn write_log(&self, offset: u64, listener: &dyn TaskListener) -> HostResult<u64>;
}

/// Host-side connection handle of one node.
pub trait ComputeSlot: Send + Sync {
    fn name(&self) -> &str;

    fn is_accepting_tasks(&self) -> bool;

    fn set_accepting_tasks(&self, accepting: bool);

    /// Remember when the slot started terminating.
    fn record_termination(&self);

    /// Take the slot offline.
    fn disconnect(&self, cause: OfflineCause);
}
