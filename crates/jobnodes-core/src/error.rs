//! Error types for host collaborators and configuration loading.

use thiserror::Error;

/// Result type alias for host collaborator calls.
pub type HostResult<T> = Result<T, HostError>;

/// Errors reported by the host platform.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("node registration failed: {0}")]
    Registration(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node removal failed: {0}")]
    Removal(String),

    #[error("job scheduling failed: {0}")]
    Schedule(String),

    #[error("job run interrupted: {0}")]
    Interrupted(String),

    #[error("log read failed: {0}")]
    Io(String),
}

/// Errors raised while loading or checking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
