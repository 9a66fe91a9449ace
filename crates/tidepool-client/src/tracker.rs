//! Failure accounting and dead-node backoff
//!
//! Every failed request pushes the node's `dead_until` deadline out by
//! `dead_timeout * 2^(failed_attempts - 1)`, clamped to `max_dead_timeout`
//! when configured. One success wipes the slate. Backoff is driven by
//! request outcomes only; probe results never touch the failure count.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::pool::Node;

/// Exponent clamp so an unbounded backoff cannot overflow
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Computes dead-until deadlines on failure and resets state on success
#[derive(Debug, Clone)]
pub struct FailureTracker {
    dead_timeout: Duration,
    max_dead_timeout: Option<Duration>,
}

impl FailureTracker {
    pub fn new(dead_timeout: Duration, max_dead_timeout: Option<Duration>) -> Self {
        Self {
            dead_timeout,
            max_dead_timeout,
        }
    }

    /// Record a failed request against a node; returns the new deadline
    pub fn on_failure(&self, node: &Node, now: Instant) -> Instant {
        let (dead_until, failed_attempts) = node.with_health(|health| {
            health.failed_attempts = health.failed_attempts.saturating_add(1);

            let exponent = (health.failed_attempts - 1).min(MAX_BACKOFF_EXPONENT);
            let mut backoff = self.dead_timeout.saturating_mul(1u32 << exponent);
            if let Some(max) = self.max_dead_timeout {
                backoff = backoff.min(max);
            }

            let dead_until = now + backoff;
            health.alive = false;
            health.dead_until = Some(dead_until);
            (dead_until, health.failed_attempts)
        });

        warn!(
            "node {} marked dead after {} failure(s), out of rotation for {:?}",
            node.endpoint(),
            failed_attempts,
            dead_until.saturating_duration_since(now)
        );
        dead_until
    }

    /// Record a successful request: back to full health
    pub fn on_success(&self, node: &Node, now: Instant) {
        node.with_health(|health| {
            health.alive = true;
            health.dead_until = None;
            health.failed_attempts = 0;
            health.last_used = Some(now);
        });
        debug!("node {} healthy", node.endpoint());
    }
}
