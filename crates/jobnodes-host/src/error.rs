//! Error types for the in-memory host platform.

use jobnodes_core::SlotState;
use jobnodes_launcher::LaunchError;
use thiserror::Error;

/// Result type alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors raised while driving nodes on the platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node {node} cannot move from {from:?} to {to:?}")]
    Transition {
        node: String,
        from: SlotState,
        to: SlotState,
    },

    #[error(transparent)]
    Launch(#[from] LaunchError),
}
