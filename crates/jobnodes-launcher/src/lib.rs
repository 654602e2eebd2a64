//! jobnodes-launcher — node launch and teardown through external jobs.
//!
//! The host calls [`NodeLifecycle::launch`] when a node's compute slot
//! connects and [`NodeLifecycle::after_disconnect`] once it went away.
//! [`JobLauncher`] implements both by running the node's provision and
//! decommission jobs, streaming their logs to the caller's listener.

pub mod error;
pub mod launcher;

pub use error::{LaunchError, LaunchResult};
pub use launcher::{JobLauncher, NodeLifecycle};
