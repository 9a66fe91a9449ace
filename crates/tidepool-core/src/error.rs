//! Configuration error types

use thiserror::Error;

/// Result type for configuration building
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while building a [`crate::ClientConfig`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("At least one seed node is required")]
    NoSeedNodes,

    #[error("Invalid seed node endpoint '{endpoint}': {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("Duplicate seed node endpoint: {0}")]
    DuplicateEndpoint(String),

    #[error("Request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Dead timeout must be greater than zero")]
    ZeroDeadTimeout,
}
