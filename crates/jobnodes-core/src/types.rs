//! Domain types shared by the provisioning engine.
//!
//! These describe labels, load snapshots, worker-node descriptors and the
//! launcher data attached to each node. Descriptors are serializable so a
//! host adapter can persist them in its own inventory format.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Label ──────────────────────────────────────────────────────────

/// Names a class of work that needs matching executors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this label is covered by the given exclusion set.
    pub fn matches(&self, set: &BTreeSet<Label>) -> bool {
        set.contains(self)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Parse a whitespace-separated label list into a set.
pub fn parse_label_set(value: &str) -> BTreeSet<Label> {
    value.split_whitespace().map(Label::from).collect()
}

// ── Load accounting ────────────────────────────────────────────────

/// Point-in-time executor accounting for one label, produced by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    /// Idle executors that can take work right now.
    pub available_executors: u32,
    /// Executors on nodes that are still coming online.
    pub connecting_executors: u32,
    /// Executors defined on all nodes of the label, online or not.
    pub defined_executors: u32,
    /// Queued items waiting for this label.
    pub queue_length: u32,
}

impl LoadSnapshot {
    /// Existing executor capacity, never undercounting defined executors
    /// that have not reported as available yet.
    pub fn existing_capacity(&self) -> u32 {
        let reporting = self
            .available_executors
            .saturating_add(self.connecting_executors);
        reporting.max(self.defined_executors)
    }
}

// ── Node descriptor ────────────────────────────────────────────────

/// Scheduling mode of a worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMode {
    /// Only runs work explicitly targeting its label.
    Exclusive,
    /// Accepts any work the host routes to it.
    Normal,
}

/// How long a node survives before the host may retire it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep the node forever.
    Always,
    /// Bring the node up when there is demand and retire it once it has
    /// been idle for `idle_delay`.
    Demand {
        in_demand_delay: Duration,
        idle_delay: Duration,
    },
}

/// Everything the launcher needs to drive the provisioning backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherSpec {
    pub git_url: String,
    pub revision: String,
    pub label: String,
    pub image: String,
    pub provision_job: String,
    pub decommission_job: String,
    pub git_revision: String,
}

/// A worker node created on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Unique inventory name (`<label>-<suffix>`).
    pub name: String,
    pub description: String,
    pub label: Label,
    pub mode: NodeMode,
    pub num_executors: u32,
    /// Work directory on the node.
    pub remote_fs: String,
    pub retention: RetentionPolicy,
    pub launcher: LauncherSpec,
}

// ── Jobs ───────────────────────────────────────────────────────────

/// A named string parameter passed to an external job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameter {
    pub name: String,
    pub value: String,
}

/// Handle to a parameterized job known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    /// Full name used for lookup.
    pub name: String,
    pub display_name: String,
}

/// Final status of an external job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Success,
    Unstable,
    Failure,
    Aborted,
}

impl RunResult {
    pub fn is_success(self) -> bool {
        matches!(self, RunResult::Success)
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunResult::Success => "SUCCESS",
            RunResult::Unstable => "UNSTABLE",
            RunResult::Failure => "FAILURE",
            RunResult::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

// ── Compute slots ──────────────────────────────────────────────────

/// Why a compute slot was taken offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineCause {
    /// Node creation or launch failed.
    LaunchFailed,
    /// Taken offline on request.
    UserRequest(String),
}

impl fmt::Display for OfflineCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfflineCause::LaunchFailed => f.write_str("launch failed"),
            OfflineCause::UserRequest(msg) => write!(f, "user request: {msg}"),
        }
    }
}

/// Lifecycle state of a node's compute slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Created,
    Launching,
    Online,
    Disconnecting,
    Removed,
    Failed,
}

impl SlotState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, next),
            (Created, Launching)
                | (Launching, Online)
                | (Launching, Failed)
                | (Online, Disconnecting)
                | (Disconnecting, Removed)
                | (Disconnecting, Online)
                // A failed slot may be relaunched or torn down.
                | (Failed, Launching)
                | (Failed, Disconnecting)
        )
    }
}
