//! jobnodes-host — in-memory host platform.
//!
//! Implements every interface the engine needs from a host: node
//! inventory, parameterized jobs, compute slots, the build queue and load
//! statistics. Jobs are scripted, and registration failures can be
//! injected, so whole provisioning scenarios run inside one process.
//!
//! # Architecture
//!
//! ```text
//! HostPlatform
//!   ├── NodeInventory    nodes: name → (NodeDescriptor, Computer)
//!   ├── JobRunner        jobs: name → JobScript, invocation log
//!   ├── LoadStatistics   derived from nodes + queue
//!   └── queue            QueueItem list, QueueListener fan-out
//!
//! connect_node     Created → Launching → Online | Failed   (JobLauncher::launch)
//! disconnect_node  Online → Disconnecting → Removed | Online (after_disconnect)
//! ```

pub mod computer;
pub mod error;
pub mod jobs;
pub mod platform;

pub use computer::Computer;
pub use error::{PlatformError, PlatformResult};
pub use jobs::{Invocation, JobScript, ScriptedRun};
pub use platform::{HostPlatform, NodeEntry};
