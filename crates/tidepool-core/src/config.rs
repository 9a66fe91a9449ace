//! Client configuration
//!
//! Configuration is an immutable value built once and handed to the client
//! at construction. Optional timeouts are resolved to concrete values here,
//! not at the call sites that consume them.

use std::time::Duration;

use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DEAD_TIMEOUT_SECS, DEFAULT_MAX_RETRIES,
    DEFAULT_PING_IDLE_WINDOW_SECS, DEFAULT_PING_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS,
};

/// Resolved, immutable client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Initial node endpoints the pool is seeded with
    pub seed_nodes: Vec<Url>,
    /// Per-attempt request bound
    pub timeout: Duration,
    /// Liveness probe bound
    pub ping_timeout: Duration,
    /// Connection-establishment bound within `timeout`
    pub connect_timeout: Duration,
    /// Base time a node is taken out of rotation after a failure
    pub dead_timeout: Duration,
    /// Ceiling on the failure backoff; unbounded when `None`
    pub max_dead_timeout: Option<Duration>,
    /// Whole-request bound including retries
    pub max_retry_timeout: Duration,
    /// Retry attempt budget, excluding the first attempt
    pub max_retries: u32,
    /// Skip liveness probing and dead-node avoidance
    pub disable_pings: bool,
    /// Whether a failed probe consumes the retry budget
    pub ping_counts_toward_retries: bool,
    /// Nodes used successfully within this window are not re-probed
    pub ping_idle_window: Duration,
    /// Sniff the cluster state on first use
    pub sniff_on_startup: bool,
    /// Sniff the cluster state after a connection fault
    pub sniff_on_fault: bool,
    /// Re-sniff when the last snapshot is older than this
    pub sniff_lifespan: Option<Duration>,
    /// Bound on a single discovery call
    pub sniff_timeout: Duration,
    /// Cap on concurrently outstanding requests; `None` or 0 means unbounded
    pub max_concurrent_requests: Option<usize>,
}

impl ClientConfig {
    /// Start building a configuration
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Effective concurrency cap, with 0 normalized to unbounded
    pub fn concurrency_limit(&self) -> Option<usize> {
        match self.max_concurrent_requests {
            Some(0) | None => None,
            Some(n) => Some(n),
        }
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    seed_nodes: Vec<String>,
    timeout: Option<Duration>,
    ping_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    dead_timeout: Option<Duration>,
    max_dead_timeout: Option<Duration>,
    max_retry_timeout: Option<Duration>,
    max_retries: Option<u32>,
    disable_pings: bool,
    ping_counts_toward_retries: bool,
    ping_idle_window: Option<Duration>,
    sniff_on_startup: bool,
    sniff_on_fault: bool,
    sniff_lifespan: Option<Duration>,
    sniff_timeout: Option<Duration>,
    max_concurrent_requests: Option<usize>,
}

impl ClientConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a seed node endpoint
    pub fn seed_node(mut self, endpoint: impl Into<String>) -> Self {
        self.seed_nodes.push(endpoint.into());
        self
    }

    /// Add several seed node endpoints
    pub fn seed_nodes<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seed_nodes.extend(endpoints.into_iter().map(Into::into));
        self
    }

    /// Set the per-attempt request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the liveness probe timeout
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = Some(timeout);
        self
    }

    /// Set the connection-establishment timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the base dead timeout for failure backoff
    pub fn dead_timeout(mut self, timeout: Duration) -> Self {
        self.dead_timeout = Some(timeout);
        self
    }

    /// Set the ceiling on the failure backoff
    pub fn max_dead_timeout(mut self, timeout: Duration) -> Self {
        self.max_dead_timeout = Some(timeout);
        self
    }

    /// Set the whole-request bound including retries
    pub fn max_retry_timeout(mut self, timeout: Duration) -> Self {
        self.max_retry_timeout = Some(timeout);
        self
    }

    /// Set the retry attempt budget (excludes the first attempt)
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Disable liveness probing and dead-node avoidance
    pub fn disable_pings(mut self, disable: bool) -> Self {
        self.disable_pings = disable;
        self
    }

    /// Count failed probes toward the retry budget
    pub fn ping_counts_toward_retries(mut self, counts: bool) -> Self {
        self.ping_counts_toward_retries = counts;
        self
    }

    /// Set the window during which a recently-good node is not re-probed
    pub fn ping_idle_window(mut self, window: Duration) -> Self {
        self.ping_idle_window = Some(window);
        self
    }

    /// Sniff the cluster state on first use
    pub fn sniff_on_startup(mut self, sniff: bool) -> Self {
        self.sniff_on_startup = sniff;
        self
    }

    /// Sniff the cluster state after a connection fault
    pub fn sniff_on_fault(mut self, sniff: bool) -> Self {
        self.sniff_on_fault = sniff;
        self
    }

    /// Re-sniff when the last snapshot is older than this
    pub fn sniff_lifespan(mut self, lifespan: Duration) -> Self {
        self.sniff_lifespan = Some(lifespan);
        self
    }

    /// Set the bound on a single discovery call
    pub fn sniff_timeout(mut self, timeout: Duration) -> Self {
        self.sniff_timeout = Some(timeout);
        self
    }

    /// Cap concurrently outstanding requests (0 means unbounded)
    pub fn max_concurrent_requests(mut self, cap: usize) -> Self {
        self.max_concurrent_requests = Some(cap);
        self
    }

    /// Validate and resolve into an immutable [`ClientConfig`]
    pub fn build(self) -> ConfigResult<ClientConfig> {
        if self.seed_nodes.is_empty() {
            return Err(ConfigError::NoSeedNodes);
        }

        let mut seeds: Vec<Url> = Vec::with_capacity(self.seed_nodes.len());
        for endpoint in &self.seed_nodes {
            let url: Url = endpoint
                .parse()
                .map_err(|e: url::ParseError| ConfigError::InvalidEndpoint {
                    endpoint: endpoint.clone(),
                    message: e.to_string(),
                })?;
            if seeds.contains(&url) {
                return Err(ConfigError::DuplicateEndpoint(endpoint.clone()));
            }
            seeds.push(url);
        }

        let timeout = self.timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        if timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        let dead_timeout = self
            .dead_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_DEAD_TIMEOUT_SECS));
        if dead_timeout.is_zero() {
            return Err(ConfigError::ZeroDeadTimeout);
        }

        let ping_timeout = self
            .ping_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS));

        Ok(ClientConfig {
            seed_nodes: seeds,
            timeout,
            ping_timeout,
            connect_timeout: self
                .connect_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)),
            dead_timeout,
            max_dead_timeout: self.max_dead_timeout,
            // The whole-request bound falls back to the per-attempt bound.
            max_retry_timeout: self.max_retry_timeout.unwrap_or(timeout),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            disable_pings: self.disable_pings,
            ping_counts_toward_retries: self.ping_counts_toward_retries,
            ping_idle_window: self
                .ping_idle_window
                .unwrap_or(Duration::from_secs(DEFAULT_PING_IDLE_WINDOW_SECS)),
            sniff_on_startup: self.sniff_on_startup,
            sniff_on_fault: self.sniff_on_fault,
            sniff_lifespan: self.sniff_lifespan,
            sniff_timeout: self.sniff_timeout.unwrap_or(ping_timeout),
            max_concurrent_requests: self.max_concurrent_requests,
        })
    }
}
