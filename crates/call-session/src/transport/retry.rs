//! Bounded-retry wrapper for any signal transport.
//!
//! Each publish or subscribe is attempted up to `max_attempts` times with
//! exponential backoff (initial, 2x, 4x, ... capped at `max_backoff`). The
//! last error is returned once attempts are exhausted. The session state
//! machine never retries on its own.

use super::{SignalSubscription, SignalTransport, TransportError};
use crate::observability::metrics;
use crate::signal::Signal;

use async_trait::async_trait;
use common::types::CallId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Retry policy for transport operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the doubled delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// No retries: one attempt only.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based).
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff)
    }
}

/// Transport decorator that retries failed operations per a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryingTransport {
    inner: Arc<dyn SignalTransport>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    #[must_use]
    pub fn new(inner: Arc<dyn SignalTransport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        call_id: &CallId,
        mut attempt_fn: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, TransportError>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match attempt_fn().await {
                Ok(value) => {
                    metrics::record_publish_attempt("success");
                    return Ok(value);
                }
                Err(e) if attempt >= max_attempts => {
                    metrics::record_publish_attempt("exhausted");
                    warn!(
                        target: "call.transport",
                        call_id = %call_id,
                        operation = operation,
                        attempts = attempt,
                        error = %e,
                        "Transport operation failed, retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    metrics::record_publish_attempt("retry");
                    let backoff = self.policy.backoff_after(attempt);
                    warn!(
                        target: "call.transport",
                        call_id = %call_id,
                        operation = operation,
                        attempt = attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Transport operation failed, will retry"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl SignalTransport for RetryingTransport {
    async fn publish(&self, signal: &Signal) -> Result<(), TransportError> {
        self.with_retry("publish", &signal.call_id, || self.inner.publish(signal))
            .await
    }

    async fn subscribe(&self, call_id: &CallId) -> Result<SignalSubscription, TransportError> {
        self.with_retry("subscribe", call_id, || self.inner.subscribe(call_id))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signal::SessionDescription;
    use crate::transport::InMemorySignalBus;
    use common::types::PartyId;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` operations, then delegates to a bus.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        bus: InMemorySignalBus,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                bus: InMemorySignalBus::new(),
            }
        }

        fn fail_now(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) < self.failures
        }
    }

    #[async_trait]
    impl SignalTransport for Flaky {
        async fn publish(&self, signal: &Signal) -> Result<(), TransportError> {
            if self.fail_now() {
                return Err(TransportError::Publish("relay refused".to_string()));
            }
            self.bus.publish(signal).await
        }

        async fn subscribe(&self, call_id: &CallId) -> Result<SignalSubscription, TransportError> {
            if self.fail_now() {
                return Err(TransportError::Subscribe("relay refused".to_string()));
            }
            self.bus.subscribe(call_id).await
        }
    }

    fn signal() -> Signal {
        Signal::offer(
            CallId::from("call-1"),
            PartyId::from("alice"),
            PartyId::from("bob"),
            SessionDescription::offer("v=0"),
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_millis(2000),
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(250));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(500));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(1000));
        assert_eq!(policy.backoff_after(4), Duration::from_millis(2000));
        assert_eq!(policy.backoff_after(9), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_succeeds_after_transient_failures() {
        let flaky = Arc::new(Flaky::new(2));
        let transport = RetryingTransport::new(flaky.clone(), RetryPolicy::default());

        let started = tokio::time::Instant::now();
        transport.publish(&signal()).await.unwrap();

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        // 250ms + 500ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_exhausts_attempts() {
        let flaky = Arc::new(Flaky::new(u32::MAX));
        let transport = RetryingTransport::new(flaky.clone(), RetryPolicy::default());

        let result = transport.publish(&signal()).await;

        assert_eq!(
            result,
            Err(TransportError::Publish("relay refused".to_string()))
        );
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_is_retried() {
        let flaky = Arc::new(Flaky::new(1));
        let transport = RetryingTransport::new(flaky.clone(), RetryPolicy::default());

        let subscription = transport.subscribe(&CallId::from("call-1")).await.unwrap();

        assert_eq!(subscription.call_id().as_str(), "call-1");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_policy_makes_single_attempt() {
        let flaky = Arc::new(Flaky::new(1));
        let transport = RetryingTransport::new(flaky.clone(), RetryPolicy::none());

        assert!(transport.publish(&signal()).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }
}
