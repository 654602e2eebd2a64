//! Launcher error types.

use jobnodes_core::{HostError, RunResult};
use thiserror::Error;

/// Result type alias for lifecycle actions.
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Errors raised while launching or tearing down a node.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("job '{job}' was not found")]
    JobNotFound { job: String },

    #[error("failed to schedule job '{job}': {source}")]
    Schedule {
        job: String,
        #[source]
        source: HostError,
    },

    #[error("failed waiting for job '{job}': {source}")]
    Wait {
        job: String,
        #[source]
        source: HostError,
    },

    #[error("job '{job}' finished with {result} ({url})")]
    JobFailed {
        job: String,
        url: String,
        result: RunResult,
    },

    #[error("failed to remove node {node}: {source}")]
    RemoveNode {
        node: String,
        #[source]
        source: HostError,
    },
}
