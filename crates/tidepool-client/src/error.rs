//! Client error types
//!
//! Two layers: [`TransportError`] classifies the outcome of a single
//! attempt against one node, [`RequestError`] is the terminal failure a
//! caller sees after the retry loop gives up. Retryable attempt failures
//! are absorbed by the loop and only surface inside the terminal error.

use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Result type for a whole logical request
pub type ClientResult<T> = std::result::Result<T, RequestError>;

/// Outcome classification for a single attempt against one node
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("connection to {endpoint} failed: {message}")]
    ConnectionFailure { endpoint: Url, message: String },

    #[error("request to {endpoint} timed out after {elapsed:?}")]
    RequestTimeout { endpoint: Url, elapsed: Duration },

    #[error("node {endpoint} answered with server error {status}")]
    ServerFault { endpoint: Url, status: u16 },

    #[error("request rejected by {endpoint} with status {status}")]
    ClientFault { endpoint: Url, status: u16 },
}

impl TransportError {
    /// Whether the retry loop may try another node after this failure
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::ClientFault { .. })
    }

    /// Whether this failure quarantines the node that produced it.
    ///
    /// A rejected request says nothing about node health.
    pub fn marks_dead(&self) -> bool {
        self.is_retryable()
    }

    /// Whether this failure counts as a connection fault for discovery triggers
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailure { .. } | TransportError::RequestTimeout { .. }
        )
    }

    /// The node the attempt was made against
    pub fn endpoint(&self) -> &Url {
        match self {
            TransportError::ConnectionFailure { endpoint, .. }
            | TransportError::RequestTimeout { endpoint, .. }
            | TransportError::ServerFault { endpoint, .. }
            | TransportError::ClientFault { endpoint, .. } => endpoint,
        }
    }
}

/// Terminal failure of a logical request
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("no eligible node remains after trying {} node(s)", .tried.len())]
    PoolExhausted {
        /// Endpoints tried during this request, in order
        tried: Vec<Url>,
        /// Attempt failures collected along the way
        failures: Vec<TransportError>,
    },

    #[error("retry budget exhausted after {attempts} attempt(s) in {elapsed:?}: {source}")]
    BudgetExceeded {
        attempts: u32,
        elapsed: Duration,
        tried: Vec<Url>,
        #[source]
        source: TransportError,
    },

    #[error("request not retryable: {source}")]
    Rejected {
        #[source]
        source: TransportError,
    },
}

impl RequestError {
    /// The last attempt failure behind this terminal error, if any
    pub fn last_error(&self) -> Option<&TransportError> {
        match self {
            RequestError::PoolExhausted { failures, .. } => failures.last(),
            RequestError::BudgetExceeded { source, .. } => Some(source),
            RequestError::Rejected { source } => Some(source),
        }
    }

    /// Whether this terminal failure should trigger a post-fault sniff
    pub fn is_connection_fault(&self) -> bool {
        match self {
            RequestError::PoolExhausted { .. } => true,
            RequestError::BudgetExceeded { source, .. } => source.is_connection_fault(),
            RequestError::Rejected { .. } => false,
        }
    }
}

/// Error while building the HTTP transport
#[derive(Error, Debug)]
#[error("failed to build HTTP transport: {0}")]
pub struct TransportInitError(pub String);

/// One failed discovery candidate
#[derive(Debug, Clone)]
pub struct SniffFailure {
    pub endpoint: Url,
    pub message: String,
}

/// Failure of a discovery refresh; the pool is left unchanged
#[derive(Error, Debug, Clone)]
pub enum SniffError {
    #[error("no candidate node available for discovery")]
    NoCandidates,

    #[error("discovery failed on all {} candidate(s)", .failures.len())]
    AllNodesFailed { failures: Vec<SniffFailure> },
}
