//! Attempt notification hook
//!
//! Observers see every completed attempt, success or failure, so callers
//! can record metrics or tracing. Observation is strictly one-way: a slow
//! or broken observer must never affect the retry loop.

use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use crate::error::TransportError;

/// Outcome of one completed attempt against one node
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    /// Node the attempt was dispatched to
    pub endpoint: Url,
    /// 1-based attempt number within the logical request
    pub attempt: u32,
    /// HTTP status on success, classified failure otherwise
    pub result: Result<u16, TransportError>,
    /// Wall time of this attempt alone
    pub elapsed: Duration,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Receives a notification after every completed attempt
pub trait RequestObserver: Send + Sync {
    fn on_attempt(&self, outcome: &AttemptOutcome);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RequestObserver for NoopObserver {
    fn on_attempt(&self, _outcome: &AttemptOutcome) {}
}

/// Forwards outcomes into a bounded channel.
///
/// Uses `try_send`: when the receiver lags, outcomes are dropped rather
/// than stalling the request path.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<AttemptOutcome>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AttemptOutcome>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl RequestObserver for ChannelObserver {
    fn on_attempt(&self, outcome: &AttemptOutcome) {
        let _ = self.tx.try_send(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(attempt: u32) -> AttemptOutcome {
        AttemptOutcome {
            endpoint: "http://localhost:9200".parse().unwrap(),
            attempt,
            result: Ok(200),
            elapsed: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_channel_observer_forwards_outcomes() {
        let (observer, mut rx) = ChannelObserver::new(8);
        observer.on_attempt(&outcome(1));
        observer.on_attempt(&outcome(2));

        assert_eq!(rx.recv().await.unwrap().attempt, 1);
        assert_eq!(rx.recv().await.unwrap().attempt, 2);
    }

    #[test]
    fn test_channel_observer_drops_when_full() {
        let (observer, mut rx) = ChannelObserver::new(1);
        observer.on_attempt(&outcome(1));
        observer.on_attempt(&outcome(2));

        assert_eq!(rx.try_recv().unwrap().attempt, 1);
        assert!(rx.try_recv().is_err());
    }
}
