//! Tidepool Core Library
//!
//! Core types and configuration for the Tidepool cluster client.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{ConfigError, ConfigResult};

/// Tidepool version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default per-attempt request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default connection-establishment timeout
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default liveness probe timeout
pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 2;

/// Default base time a node stays out of rotation after a failure
pub const DEFAULT_DEAD_TIMEOUT_SECS: u64 = 60;

/// Default retry attempt budget (excludes the first attempt)
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default window during which a recently successful node is not re-probed
pub const DEFAULT_PING_IDLE_WINDOW_SECS: u64 = 60;
