//! Provisioning error types.

use jobnodes_core::HostError;
use thiserror::Error;

/// Errors raised while requesting or creating a node.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("registration of node {node} failed after {attempts} attempts: {source}")]
    Registration {
        node: String,
        attempts: u32,
        #[source]
        source: HostError,
    },

    #[error("failed to submit node creation: {0}")]
    Submit(String),

    #[error("node creation was abandoned before producing a result")]
    Abandoned,

    #[error("host error: {0}")]
    Host(#[from] HostError),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
