//! jobnodes-core — shared vocabulary of the on-demand node engine.
//!
//! Holds the data model (labels, load snapshots, node descriptors), the
//! TOML-backed provisioner configuration, the label template resolver and
//! the traits a host platform implements so the engine can register nodes,
//! run external jobs and drive compute slots.
//!
//! # Architecture
//!
//! ```text
//! jobnodes-core
//!   ├── types     Label, LoadSnapshot, NodeDescriptor, LauncherSpec
//!   ├── config    ProvisionerConfig (TOML), SharedConfig
//!   ├── template  {label} / {<delim>:label} substitution
//!   ├── host      NodeInventory, JobRunner, JobRun, ComputeSlot
//!   └── listener  TaskListener sinks
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod listener;
pub mod template;
pub mod types;

pub use config::{ConfigFinding, ProvisionerConfig, Severity, SharedConfig};
pub use error::{ConfigError, HostError, HostResult};
pub use host::{ComputeSlot, JobRun, JobRunner, NodeInventory};
pub use listener::{BufferListener, TaskListener, TracingListener};
pub use template::resolve_label;
pub use types::*;
