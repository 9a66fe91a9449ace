//! The per-request attempt loop
//!
//! For one logical request: select a node, probe it when its liveness is
//! unknown, execute, and decide between returning and retrying elsewhere.
//! Probe failures are free; only executed attempts consume the retry
//! budget. The whole request is additionally bounded by a wall-clock
//! budget independent of the per-attempt timeout.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use tidepool_core::types::{NodeResponse, RequestSpec};
use tidepool_core::ClientConfig;

use crate::error::{ClientResult, RequestError, TransportError};
use crate::observer::{AttemptOutcome, RequestObserver};
use crate::pool::{Node, NodePool};
use crate::tracker::FailureTracker;
use crate::transport::{AttemptTimeouts, Transport};

/// Resolved parameters the attempt loop runs under
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-attempt request bound
    pub timeout: Duration,
    /// Connection-establishment bound within an attempt
    pub connect_timeout: Duration,
    /// Liveness probe bound
    pub ping_timeout: Duration,
    /// Whole-request bound including retries
    pub max_retry_timeout: Duration,
    /// Retry attempt budget, excluding the first attempt
    pub max_retries: u32,
    /// Skip probing entirely
    pub disable_pings: bool,
    /// Whether a failed probe consumes the retry budget
    pub ping_counts_toward_retries: bool,
    /// Nodes used successfully within this window are not re-probed
    pub ping_idle_window: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            timeout: config.timeout,
            connect_timeout: config.connect_timeout,
            ping_timeout: config.ping_timeout,
            max_retry_timeout: config.max_retry_timeout,
            max_retries: config.max_retries,
            disable_pings: config.disable_pings,
            ping_counts_toward_retries: config.ping_counts_toward_retries,
            ping_idle_window: config.ping_idle_window,
        }
    }
}

/// Book-keeping for one logical request, never shared across requests
struct AttemptContext {
    started: Instant,
    attempts: u32,
    tried: HashSet<Url>,
    tried_order: Vec<Url>,
    failures: Vec<TransportError>,
}

impl AttemptContext {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            attempts: 0,
            tried: HashSet::new(),
            tried_order: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn exclude(&mut self, endpoint: &Url) {
        if self.tried.insert(endpoint.clone()) {
            self.tried_order.push(endpoint.clone());
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

enum AttemptResult {
    Success(NodeResponse),
    Fatal(RequestError),
    Retry,
}

/// Drives the attempt loop for single logical requests
pub struct RetryCoordinator {
    pool: Arc<NodePool>,
    tracker: FailureTracker,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn RequestObserver>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(
        pool: Arc<NodePool>,
        tracker: FailureTracker,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn RequestObserver>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            tracker,
            transport,
            observer,
            policy,
        }
    }

    /// Run one logical request to completion
    pub async fn execute(&self, request: &RequestSpec) -> ClientResult<NodeResponse> {
        let mut ctx = AttemptContext::new();

        loop {
            let now = Instant::now();
            let node = match self.pool.select(&ctx.tried, now) {
                Some(node) => node,
                // Re-trying an already-tried endpoint is allowed only when
                // it is the single alive node left in the pool.
                None => match self.pool.single_alive_node() {
                    Some(node) => node,
                    None => {
                        return Err(RequestError::PoolExhausted {
                            tried: ctx.tried_order.clone(),
                            failures: ctx.failures.clone(),
                        })
                    }
                },
            };

            let _in_use = self.pool.begin_use(node.endpoint());

            if !self.policy.disable_pings && node.needs_ping(now, self.policy.ping_idle_window) {
                if !self.probe(&node, &mut ctx).await {
                    if let Some(fatal) = self.check_budget(&ctx) {
                        return Err(fatal);
                    }
                    continue;
                }
            }

            match self.attempt(&node, request, &mut ctx).await {
                AttemptResult::Success(response) => return Ok(response),
                AttemptResult::Fatal(error) => return Err(error),
                AttemptResult::Retry => {}
            }
        }
    }

    /// Liveness probe; returns whether the node may be used.
    ///
    /// A failed probe quarantines the node and excludes it from this
    /// request, but by default does not consume the retry budget.
    async fn probe(&self, node: &Arc<Node>, ctx: &mut AttemptContext) -> bool {
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.policy.ping_timeout,
            self.transport.ping(node.endpoint(), self.policy.ping_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::RequestTimeout {
                endpoint: node.endpoint().clone(),
                elapsed: started.elapsed(),
            }),
        };

        match result {
            Ok(()) => {
                debug!("probe of {} succeeded", node.endpoint());
                self.pool.mark_alive(node);
                true
            }
            Err(error) => {
                warn!("probe of {} failed: {}", node.endpoint(), error);
                self.tracker.on_failure(node, Instant::now());
                ctx.exclude(node.endpoint());
                ctx.failures.push(error);
                if self.policy.ping_counts_toward_retries {
                    ctx.attempts += 1;
                }
                false
            }
        }
    }

    /// One real execution attempt against the selected node
    async fn attempt(
        &self,
        node: &Arc<Node>,
        request: &RequestSpec,
        ctx: &mut AttemptContext,
    ) -> AttemptResult {
        let attempt_number = ctx.attempts + 1;
        let remaining = self
            .policy
            .max_retry_timeout
            .saturating_sub(ctx.elapsed())
            .max(Duration::from_millis(1));
        let bound = self.policy.timeout.min(remaining);

        let started = Instant::now();
        let timeouts = AttemptTimeouts {
            request: bound,
            connect: self.policy.connect_timeout,
        };
        let result = match tokio::time::timeout(
            bound,
            self.transport.send(node.endpoint(), request, timeouts),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::RequestTimeout {
                endpoint: node.endpoint().clone(),
                elapsed: started.elapsed(),
            }),
        };
        let attempt_elapsed = started.elapsed();

        ctx.attempts = attempt_number;
        ctx.exclude(node.endpoint());

        match result {
            Ok(response) => {
                self.tracker.on_success(node, Instant::now());
                self.notify(AttemptOutcome {
                    endpoint: node.endpoint().clone(),
                    attempt: attempt_number,
                    result: Ok(response.status),
                    elapsed: attempt_elapsed,
                });
                debug!(
                    "attempt {} on {} succeeded in {:?}",
                    attempt_number,
                    node.endpoint(),
                    attempt_elapsed
                );
                AttemptResult::Success(response)
            }
            Err(error) => {
                self.notify(AttemptOutcome {
                    endpoint: node.endpoint().clone(),
                    attempt: attempt_number,
                    result: Err(error.clone()),
                    elapsed: attempt_elapsed,
                });

                if error.marks_dead() {
                    self.tracker.on_failure(node, Instant::now());
                }
                if !error.is_retryable() {
                    return AttemptResult::Fatal(RequestError::Rejected { source: error });
                }

                warn!(
                    "attempt {} on {} failed: {}",
                    attempt_number,
                    node.endpoint(),
                    error
                );
                ctx.failures.push(error);
                match self.check_budget(ctx) {
                    Some(fatal) => AttemptResult::Fatal(fatal),
                    None => AttemptResult::Retry,
                }
            }
        }
    }

    /// Terminal error once the attempt count or elapsed time runs out
    fn check_budget(&self, ctx: &AttemptContext) -> Option<RequestError> {
        let elapsed = ctx.elapsed();
        if ctx.attempts <= self.policy.max_retries && elapsed < self.policy.max_retry_timeout {
            return None;
        }
        ctx.failures.last().map(|last| RequestError::BudgetExceeded {
            attempts: ctx.attempts,
            elapsed,
            tried: ctx.tried_order.clone(),
            source: last.clone(),
        })
    }

    fn notify(&self, outcome: AttemptOutcome) {
        let observer = Arc::clone(&self.observer);
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            observer.on_attempt(&outcome)
        }))
        .is_err()
        {
            debug!("request observer panicked on attempt {}", outcome.attempt);
        }
    }
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("policy", &self.policy)
            .finish()
    }
}
