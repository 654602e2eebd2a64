//! jobnodes-provision — capacity decisions and asynchronous node creation.
//!
//! Each label gets a [`NodeProvisioner`] that ticks periodically (or when a
//! review is suggested), reads the host's load snapshot and lets its
//! strategies decide whether another node is needed. Requested nodes are
//! built on a bounded worker pool; the decision loop only records the
//! returned [`PlannedCapacity`] and never waits for it.
//!
//! # Architecture
//!
//! ```text
//!  queue event ─▶ suggest_review_now
//!                        │
//!  interval ────────────▶│
//!                        ▼
//!               NodeProvisioner::tick
//!                 reap ledger ── LoadStatistics::snapshot
//!                        │
//!                        ▼
//!               OnDemandStrategy::decide ──▶ Provisioner::request_node
//!                        │                          │
//!                        ▼                          ▼ WorkerPool
//!               PendingLedger::record        NodeCreationTask::run
//!                        ▲                     build descriptor
//!                        │                     complete future
//!                        │                     register_with_retry
//!                        └── registration ◀─── settle registration
//! ```

pub mod error;
pub mod future;
pub mod planned;
pub mod pool;
pub mod retry;
pub mod scheduler;
pub mod strategy;
pub mod task;

pub use error::{ProvisionError, ProvisionResult};
pub use future::{node_future, NodeCompleter, NodeFuture, NodeOutcome};
pub use planned::{CreationSignals, PendingLedger, PlannedCapacity};
pub use pool::WorkerPool;
pub use retry::{register_with_retry, RetryPolicy};
pub use scheduler::{LoadStatistics, NodeProvisioner, ProvisionerRegistry, TickReport};
pub use strategy::{CapacityDecider, OnDemandStrategy, ProvisioningState, StrategyDecision};
pub use task::{build_descriptor, NodeCreationTask, NodeRequester, Provisioner};
