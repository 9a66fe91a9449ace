//! Transport layer for talking to individual cluster nodes
//!
//! The retry machinery treats "send bytes to a node" as a black box behind
//! the [`Transport`] trait. [`HttpTransport`] is the reqwest-backed default:
//! - Request and connection timeouts
//! - Connection pooling
//! - Status-code classification into the attempt failure taxonomy

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use tracing::debug;
use url::Url;

use tidepool_core::types::{ClusterSnapshot, Method, NodeResponse, RequestSpec};

use crate::error::{TransportError, TransportInitError};

/// Time bounds for a single attempt
#[derive(Debug, Clone, Copy)]
pub struct AttemptTimeouts {
    /// Bound on the whole attempt
    pub request: Duration,
    /// Bound on connection establishment within the attempt
    pub connect: Duration,
}

/// Sends requests, liveness probes and discovery calls to one node at a time
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dispatch a request to a node
    async fn send(
        &self,
        endpoint: &Url,
        request: &RequestSpec,
        timeouts: AttemptTimeouts,
    ) -> Result<NodeResponse, TransportError>;

    /// Lightweight liveness check, cheaper than a real request
    async fn ping(&self, endpoint: &Url, timeout: Duration) -> Result<(), TransportError>;

    /// Ask a node for the current cluster member list
    async fn sniff(&self, endpoint: &Url, timeout: Duration)
        -> Result<ClusterSnapshot, TransportError>;
}

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Connection-establishment timeout applied to every request
    pub connect_timeout: Duration,
    /// Idle connections kept per node
    pub pool_max_idle_per_host: usize,
    /// How long idle connections are kept around
    pub pool_idle_timeout: Duration,
    /// Enable TLS certificate verification
    pub verify_tls: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(90),
            verify_tls: true,
        }
    }
}

/// Default [`Transport`] over HTTP
pub struct HttpTransport {
    client: Client,
}

/// Path every node answers its member list on
const SNIFF_PATH: &str = "_cluster/nodes";

impl HttpTransport {
    /// Create a new transport with the given configuration
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportInitError> {
        let mut builder = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout);

        if !config.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| TransportInitError(e.to_string()))?;

        Ok(Self { client })
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Head => reqwest::Method::HEAD,
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn request_url(endpoint: &Url, path: &str) -> Result<Url, TransportError> {
        endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::ConnectionFailure {
                endpoint: endpoint.clone(),
                message: format!("invalid request path '{}': {}", path, e),
            })
    }

    fn classify(endpoint: &Url, error: reqwest::Error, elapsed: Duration) -> TransportError {
        if error.is_timeout() {
            TransportError::RequestTimeout {
                endpoint: endpoint.clone(),
                elapsed,
            }
        } else {
            TransportError::ConnectionFailure {
                endpoint: endpoint.clone(),
                message: error.to_string(),
            }
        }
    }

    fn classify_status(endpoint: &Url, status: u16) -> Option<TransportError> {
        match status {
            200..=399 => None,
            400..=499 => Some(TransportError::ClientFault {
                endpoint: endpoint.clone(),
                status,
            }),
            _ => Some(TransportError::ServerFault {
                endpoint: endpoint.clone(),
                status,
            }),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &Url,
        request: &RequestSpec,
        timeouts: AttemptTimeouts,
    ) -> Result<NodeResponse, TransportError> {
        let url = Self::request_url(endpoint, &request.path)?;
        let started = std::time::Instant::now();

        let mut builder = self
            .client
            .request(Self::method(request.method), url)
            .timeout(timeouts.request);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(endpoint, e, started.elapsed()))?;

        let status = response.status().as_u16();
        if let Some(error) = Self::classify_status(endpoint, status) {
            return Err(error);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify(endpoint, e, started.elapsed()))?;

        debug!(
            "{} {} -> {} ({} bytes) via {}",
            request.method,
            request.path,
            status,
            body.len(),
            endpoint
        );

        Ok(NodeResponse {
            status,
            body,
            endpoint: endpoint.clone(),
        })
    }

    async fn ping(&self, endpoint: &Url, timeout: Duration) -> Result<(), TransportError> {
        let started = std::time::Instant::now();

        let response = self
            .client
            .head(endpoint.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify(endpoint, e, started.elapsed()))?;

        let status = response.status().as_u16();
        match Self::classify_status(endpoint, status) {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    async fn sniff(
        &self,
        endpoint: &Url,
        timeout: Duration,
    ) -> Result<ClusterSnapshot, TransportError> {
        let url = Self::request_url(endpoint, SNIFF_PATH)?;
        let started = std::time::Instant::now();

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify(endpoint, e, started.elapsed()))?;

        let status = response.status().as_u16();
        if let Some(error) = Self::classify_status(endpoint, status) {
            return Err(error);
        }

        response
            .json::<ClusterSnapshot>()
            .await
            .map_err(|e| TransportError::ConnectionFailure {
                endpoint: endpoint.clone(),
                message: format!("malformed cluster snapshot: {}", e),
            })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_config_default() {
        let config = HttpTransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.verify_tls);
    }

    #[test]
    fn test_status_classification() {
        let endpoint: Url = "http://localhost:9200".parse().unwrap();
        assert!(HttpTransport::classify_status(&endpoint, 200).is_none());
        assert!(HttpTransport::classify_status(&endpoint, 304).is_none());
        assert!(matches!(
            HttpTransport::classify_status(&endpoint, 404),
            Some(TransportError::ClientFault { status: 404, .. })
        ));
        assert!(matches!(
            HttpTransport::classify_status(&endpoint, 503),
            Some(TransportError::ServerFault { status: 503, .. })
        ));
    }

    #[test]
    fn test_request_url_joins_relative_paths() {
        let endpoint: Url = "http://localhost:9200/".parse().unwrap();
        let url = HttpTransport::request_url(&endpoint, "/index/_search").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9200/index/_search");
    }
}
