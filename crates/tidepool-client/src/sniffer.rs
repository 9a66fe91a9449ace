//! Cluster topology discovery (sniffing)
//!
//! Asks live nodes for the current member list and reconciles the pool
//! against the answer. Refreshes are single-flight: while one is running,
//! concurrent triggers wait for it and observe its outcome instead of
//! issuing duplicate discovery calls.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{SniffError, SniffFailure};
use crate::pool::NodePool;
use crate::transport::Transport;

/// Why a refresh was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffReason {
    /// First use of the client
    Startup,
    /// The last snapshot outlived its configured lifespan
    Stale,
    /// A request just ended in a connection fault
    ConnectionFault,
    /// The caller asked for a refresh
    Requested,
}

impl fmt::Display for SniffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SniffReason::Startup => write!(f, "startup"),
            SniffReason::Stale => write!(f, "stale"),
            SniffReason::ConnectionFault => write!(f, "connection fault"),
            SniffReason::Requested => write!(f, "requested"),
        }
    }
}

/// Refreshes the node pool from a live cluster snapshot
pub struct Sniffer {
    transport: Arc<dyn Transport>,
    pool: Arc<NodePool>,
    timeout: Duration,
    /// Serializes refreshes; waiters coalesce onto the running one
    refresh_lock: tokio::sync::Mutex<()>,
    /// Bumped after every completed refresh
    generation: AtomicU64,
    /// Outcome of the most recent refresh, shared with coalesced waiters
    last_outcome: parking_lot::Mutex<Option<Result<usize, SniffError>>>,
}

impl Sniffer {
    pub fn new(transport: Arc<dyn Transport>, pool: Arc<NodePool>, timeout: Duration) -> Self {
        Self {
            transport,
            pool,
            timeout,
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            last_outcome: parking_lot::Mutex::new(None),
        }
    }

    /// Refresh the pool from the cluster; returns the discovered node count.
    ///
    /// On failure the pool is left unchanged and callers are expected to
    /// carry on with the existing, possibly stale, node set.
    pub async fn refresh(&self, reason: SniffReason) -> Result<usize, SniffError> {
        let observed = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != observed {
            // A refresh completed while this trigger waited; share its outcome.
            if let Some(outcome) = self.last_outcome.lock().clone() {
                debug!("sniff ({}) coalesced onto a concurrent refresh", reason);
                return outcome;
            }
        }

        info!("sniffing cluster state ({})", reason);
        let outcome = self.sniff_once().await;
        *self.last_outcome.lock() = Some(outcome.clone());
        self.generation.fetch_add(1, Ordering::Release);

        if let Err(error) = &outcome {
            warn!("cluster sniff ({}) failed: {}", reason, error);
        }
        outcome
    }

    async fn sniff_once(&self) -> Result<usize, SniffError> {
        let candidates = self.pool.sniff_candidates();
        if candidates.is_empty() {
            return Err(SniffError::NoCandidates);
        }

        let mut failures = Vec::new();
        for node in candidates {
            match self.transport.sniff(node.endpoint(), self.timeout).await {
                Ok(snapshot) if snapshot.is_empty() => {
                    warn!("node {} answered with an empty snapshot", node.endpoint());
                    failures.push(SniffFailure {
                        endpoint: node.endpoint().clone(),
                        message: "empty cluster snapshot".to_string(),
                    });
                }
                Ok(snapshot) => {
                    info!(
                        "discovered {} node(s) via {}",
                        snapshot.len(),
                        node.endpoint()
                    );
                    self.pool.reconcile(&snapshot);
                    self.pool.record_sniff(Instant::now());
                    return Ok(snapshot.len());
                }
                Err(error) => {
                    debug!("sniff candidate {} failed: {}", node.endpoint(), error);
                    failures.push(SniffFailure {
                        endpoint: node.endpoint().clone(),
                        message: error.to_string(),
                    });
                }
            }
        }

        Err(SniffError::AllNodesFailed { failures })
    }
}

impl fmt::Debug for Sniffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sniffer")
            .field("timeout", &self.timeout)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tidepool_core::types::{
        ClusterSnapshot, DiscoveredNode, NodeResponse, RequestSpec,
    };
    use url::Url;

    use crate::error::TransportError;
    use crate::transport::AttemptTimeouts;

    struct SniffOnlyTransport {
        calls: AtomicUsize,
        delay: Duration,
        result: Result<Vec<&'static str>, ()>,
    }

    #[async_trait]
    impl Transport for SniffOnlyTransport {
        async fn send(
            &self,
            endpoint: &Url,
            _request: &RequestSpec,
            _timeouts: AttemptTimeouts,
        ) -> Result<NodeResponse, TransportError> {
            Err(TransportError::ConnectionFailure {
                endpoint: endpoint.clone(),
                message: "not under test".to_string(),
            })
        }

        async fn ping(&self, _endpoint: &Url, _timeout: Duration) -> Result<(), TransportError> {
            Ok(())
        }

        async fn sniff(
            &self,
            endpoint: &Url,
            _timeout: Duration,
        ) -> Result<ClusterSnapshot, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.result {
                Ok(endpoints) => Ok(ClusterSnapshot::new(
                    endpoints
                        .iter()
                        .map(|e| DiscoveredNode::new(e.parse().unwrap()))
                        .collect(),
                )),
                Err(()) => Err(TransportError::ConnectionFailure {
                    endpoint: endpoint.clone(),
                    message: "sniff refused".to_string(),
                }),
            }
        }
    }

    fn pool(endpoints: &[&str]) -> Arc<NodePool> {
        let seeds: Vec<Url> = endpoints.iter().map(|e| e.parse().unwrap()).collect();
        Arc::new(NodePool::new(&seeds, false))
    }

    #[tokio::test]
    async fn test_refresh_reconciles_pool() {
        let pool = pool(&["http://seed:9200"]);
        let transport = Arc::new(SniffOnlyTransport {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            result: Ok(vec!["http://n1:9200", "http://n2:9200"]),
        });
        let sniffer = Sniffer::new(transport, Arc::clone(&pool), Duration::from_secs(1));

        let count = sniffer.refresh(SniffReason::Startup).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(pool.len(), 2);
        assert!(pool.last_sniff().is_some());
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_pool_unchanged() {
        let pool = pool(&["http://seed:9200"]);
        let transport = Arc::new(SniffOnlyTransport {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            result: Err(()),
        });
        let sniffer = Sniffer::new(transport, Arc::clone(&pool), Duration::from_secs(1));

        let result = sniffer.refresh(SniffReason::Stale).await;
        assert!(matches!(result, Err(SniffError::AllNodesFailed { .. })));
        assert_eq!(pool.endpoints(), vec!["http://seed:9200".parse::<Url>().unwrap()]);
        assert!(pool.last_sniff().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_coalesce_into_one_call() {
        let pool = pool(&["http://seed:9200"]);
        let transport = Arc::new(SniffOnlyTransport {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
            result: Ok(vec!["http://n1:9200", "http://n2:9200", "http://n3:9200"]),
        });
        let sniffer = Arc::new(Sniffer::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&pool),
            Duration::from_secs(1),
        ));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let sniffer = Arc::clone(&sniffer);
            tasks.push(tokio::spawn(async move {
                sniffer.refresh(SniffReason::ConnectionFault).await
            }));
        }

        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            assert_eq!(outcome, 3);
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_a_failed_candidate() {
        let pool = pool(&["http://seed:9200"]);
        let transport = Arc::new(SniffOnlyTransport {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            result: Ok(vec![]),
        });
        let sniffer = Sniffer::new(transport, Arc::clone(&pool), Duration::from_secs(1));

        let result = sniffer.refresh(SniffReason::Startup).await;
        assert!(matches!(result, Err(SniffError::AllNodesFailed { .. })));
        assert_eq!(pool.len(), 1);
    }
}
