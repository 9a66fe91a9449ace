//! Tidepool Client - resilient request routing for multi-node clusters
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Tidepool Client                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌───────────────┐  ┌───────────────┐  ┌───────────────┐   │
//! │  │ ClusterClient │  │RetryCoordina- │  │    Sniffer    │   │
//! │  │  (pipeline)   │  │     tor       │  │               │   │
//! │  │ - Discovery   │  │ - Node select │  │ - Single      │   │
//! │  │   triggers    │  │ - Probe       │  │   flight      │   │
//! │  │ - Concurrency │  │ - Retry       │  │ - Reconcile   │   │
//! │  │   cap         │  │   budget      │  │   pool        │   │
//! │  └───────┬───────┘  └───────┬───────┘  └───────┬───────┘   │
//! │          │                  │                  │           │
//! │          │         ┌────────┴────────┐         │           │
//! │          └─────────┤    NodePool     ├─────────┘           │
//! │                    │ FailureTracker  │                     │
//! │                    └────────┬────────┘                     │
//! │                    ┌────────┴────────┐                     │
//! │                    │    Transport    │                     │
//! │                    │     (HTTP)      │                     │
//! │                    └─────────────────┘                     │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Round-robin routing** across the live node set
//! - **Failure quarantine**: failing nodes leave rotation with exponential backoff
//! - **Liveness probes**: cheap pings keep real attempts off likely-dead nodes
//! - **Retry budget**: attempt count and wall-clock bounds per logical request
//! - **Sniffing**: pool refresh from the cluster on startup, staleness or faults
//! - **Attempt observation**: per-attempt hook for metrics and tracing

mod error;
mod observer;
mod pipeline;
mod pool;
mod retry;
mod sniffer;
mod tracker;
mod transport;

pub use error::{
    ClientResult, RequestError, SniffError, SniffFailure, TransportError, TransportInitError,
};
pub use observer::{AttemptOutcome, ChannelObserver, NoopObserver, RequestObserver};
pub use pipeline::ClusterClient;
pub use pool::{InUseGuard, Node, NodeHealth, NodePool, PoolStats};
pub use retry::{RetryCoordinator, RetryPolicy};
pub use sniffer::{SniffReason, Sniffer};
pub use tracker::FailureTracker;
pub use transport::{AttemptTimeouts, HttpTransport, HttpTransportConfig, Transport};

// Re-export types from core
pub use tidepool_core::types::{
    ClusterSnapshot, DiscoveredNode, Method, NodeResponse, NodeRoles, RequestSpec,
};
pub use tidepool_core::{ClientConfig, ClientConfigBuilder, ConfigError};
