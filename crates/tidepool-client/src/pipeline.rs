//! Request pipeline - the public entry point of the client
//!
//! Responsibilities:
//! - Wire configuration into pool, tracker, sniffer and retry loop
//! - Trigger discovery on startup, staleness and connection faults
//! - Enforce the global concurrency cap
//!
//! This is the only component that reads [`ClientConfig`] directly; every
//! other component receives just the parameters it needs.

use std::sync::Arc;

use tokio::sync::{OnceCell, Semaphore};
use tracing::{info, warn};

use tidepool_core::types::{NodeResponse, RequestSpec};
use tidepool_core::ClientConfig;

use crate::error::{ClientResult, SniffError, TransportInitError};
use crate::observer::{NoopObserver, RequestObserver};
use crate::pool::{NodePool, PoolStats};
use crate::retry::{RetryCoordinator, RetryPolicy};
use crate::sniffer::{SniffReason, Sniffer};
use crate::tracker::FailureTracker;
use crate::transport::{HttpTransport, HttpTransportConfig, Transport};

/// Resilient client for a multi-node cluster
pub struct ClusterClient {
    config: ClientConfig,
    pool: Arc<NodePool>,
    sniffer: Arc<Sniffer>,
    coordinator: RetryCoordinator,
    limiter: Option<Arc<Semaphore>>,
    startup_sniff: OnceCell<()>,
}

impl ClusterClient {
    /// Create a client over the given transport
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_observer(config, transport, Arc::new(NoopObserver))
    }

    /// Create a client that reports every attempt to the given observer
    pub fn with_observer(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn RequestObserver>,
    ) -> Self {
        let pool = Arc::new(NodePool::new(&config.seed_nodes, config.disable_pings));
        let tracker = FailureTracker::new(config.dead_timeout, config.max_dead_timeout);
        let sniffer = Arc::new(Sniffer::new(
            Arc::clone(&transport),
            Arc::clone(&pool),
            config.sniff_timeout,
        ));
        let coordinator = RetryCoordinator::new(
            Arc::clone(&pool),
            tracker,
            transport,
            observer,
            RetryPolicy::from_config(&config),
        );
        let limiter = config
            .concurrency_limit()
            .map(|slots| Arc::new(Semaphore::new(slots)));

        info!(
            "cluster client created with {} seed node(s)",
            config.seed_nodes.len()
        );

        Self {
            config,
            pool,
            sniffer,
            coordinator,
            limiter,
            startup_sniff: OnceCell::new(),
        }
    }

    /// Create a client over the default HTTP transport
    pub fn over_http(config: ClientConfig) -> Result<Self, TransportInitError> {
        let transport = HttpTransport::new(HttpTransportConfig {
            connect_timeout: config.connect_timeout,
            ..Default::default()
        })?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Send one logical request, retrying across nodes as needed
    pub async fn send(&self, request: &RequestSpec) -> ClientResult<NodeResponse> {
        let _permit = match &self.limiter {
            // The semaphore lives as long as the client and is never closed.
            Some(limiter) => limiter.acquire().await.ok(),
            None => None,
        };

        self.sniff_if_due().await;

        let result = self.coordinator.execute(request).await;

        if let Err(error) = &result {
            if self.config.sniff_on_fault && error.is_connection_fault() {
                if let Err(sniff_error) = self.sniffer.refresh(SniffReason::ConnectionFault).await
                {
                    warn!("post-fault sniff failed: {}", sniff_error);
                }
            }
        }

        result
    }

    /// Refresh the node pool from the cluster right now
    pub async fn refresh_topology(&self) -> Result<usize, SniffError> {
        self.sniffer.refresh(SniffReason::Requested).await
    }

    /// Aggregate pool health
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// All known node endpoints, in rotation order
    pub fn endpoints(&self) -> Vec<url::Url> {
        self.pool.endpoints()
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Discovery triggers evaluated before dispatching a request.
    ///
    /// A failed refresh is tolerated here: the request proceeds against
    /// the existing pool and fails fast only once no node is eligible.
    async fn sniff_if_due(&self) {
        if self.config.sniff_on_startup {
            self.startup_sniff
                .get_or_init(|| async {
                    let _ = self.sniffer.refresh(SniffReason::Startup).await;
                })
                .await;
        }

        if let Some(lifespan) = self.config.sniff_lifespan {
            let stale = match self.pool.last_sniff() {
                Some(at) => at.elapsed() > lifespan,
                None => true,
            };
            if stale {
                let _ = self.sniffer.refresh(SniffReason::Stale).await;
            }
        }
    }
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("pool", &self.pool)
            .field("max_retries", &self.config.max_retries)
            .finish()
    }
}
