//! Retry and rate-limit governor.
//!
//! Wraps one logical transport call. Connection failures, HTTP 429 and HTTP
//! 5xx are retried with exponential backoff plus random jitter, honoring
//! `Retry-After` when the tracker sends it. Everything else goes straight back
//! to the caller for classification. Non-idempotent calls get exactly one
//! attempt.

use crate::classify::{ErrorKind, OperationError};
use crate::error::TransportFailure;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Whether a call is safe to repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Reads and direct field updates: repeating yields the same end state.
    Idempotent,
    /// Creates and comments: a retry could duplicate the effect.
    NonIdempotent,
}

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each time after.
    pub base_delay: Duration,
    /// Upper bound on computed backoff (a longer `Retry-After` still wins).
    pub max_delay: Duration,
    /// Random extra delay, as a fraction of the computed backoff.
    pub jitter: f64,
    /// Wall-clock limit across all attempts.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.5,
            deadline: None,
        }
    }
}

/// Progress through the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempt: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Delay before the next attempt.
    pub next_delay: Duration,
}

impl RetryState {
    fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Outcome of a governed call that did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError {
    /// Retryable failures used up the budget or the deadline.
    Exhausted(OperationError),
    /// A failure that retrying cannot fix; classify it.
    Fatal(TransportFailure),
}

/// Whether `failure` is worth another attempt.
#[must_use]
pub fn is_retryable(failure: &TransportFailure) -> bool {
    match failure {
        TransportFailure::ConnectionFailed { .. } => true,
        TransportFailure::HttpError { status, .. } => *status == 429 || *status >= 500,
        TransportFailure::MalformedResponse { .. } => false,
    }
}

impl RetryPolicy {
    /// A policy that never sleeps; useful in tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            deadline: None,
        }
    }

    /// Set the overall deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Backoff after `attempt` (1-based) without jitter, capped at `max_delay`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay before the attempt following `attempt`, given the failure it hit.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, failure: &TransportFailure) -> Duration {
        let backoff = self.backoff(attempt);
        let jitter = if self.jitter > 0.0 && !backoff.is_zero() {
            let ratio = rand::thread_rng().gen_range(0.0..=self.jitter);
            backoff.mul_f64(ratio)
        } else {
            Duration::ZERO
        };
        let delay = (backoff + jitter).min(self.max_delay.max(backoff));

        match failure {
            TransportFailure::HttpError {
                retry_after: Some(wait),
                ..
            } => delay.max(*wait),
            _ => delay,
        }
    }

    /// Run `call` under this policy.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Fatal`] for non-retryable failures (and for any
    /// failure of a non-idempotent call), and [`RetryError::Exhausted`] when
    /// the attempt budget or deadline runs out.
    pub async fn execute<T, F, Fut>(
        &self,
        idempotency: Idempotency,
        mut call: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportFailure>>,
    {
        let max_attempts = match idempotency {
            Idempotency::Idempotent => self.max_attempts.max(1),
            Idempotency::NonIdempotent => 1,
        };

        let attempts = async {
            let mut state = RetryState {
                attempt: 0,
                max_attempts,
                next_delay: Duration::ZERO,
            };
            loop {
                state.attempt += 1;
                let failure = match call().await {
                    Ok(value) => return Ok(value),
                    Err(failure) => failure,
                };

                if !is_retryable(&failure) || idempotency == Idempotency::NonIdempotent {
                    return Err(RetryError::Fatal(failure));
                }
                if state.exhausted() {
                    warn!(attempts = state.attempt, error = %failure, "Retry budget exhausted");
                    return Err(RetryError::Exhausted(exhausted_error(&failure, state.attempt)));
                }

                state.next_delay = self.delay_for(state.attempt, &failure);
                debug!(
                    attempt = state.attempt,
                    max_attempts = state.max_attempts,
                    delay_ms = u64::try_from(state.next_delay.as_millis()).unwrap_or(u64::MAX),
                    error = %failure,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(state.next_delay).await;
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, attempts)
                .await
                .unwrap_or_else(|_| {
                    warn!(deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX), "Retry deadline exceeded");
                    Err(RetryError::Exhausted(
                        OperationError::new(
                            ErrorKind::TransientNetwork,
                            "The tracker did not respond before the deadline",
                        )
                        .with_guidance(format!("Gave up after {deadline:?}"))
                        .with_suggestion("Retry later or raise the request timeout"),
                    ))
                }),
            None => attempts.await,
        }
    }
}

fn exhausted_error(failure: &TransportFailure, attempts: u32) -> OperationError {
    let error = if failure.status() == Some(429) {
        OperationError::new(
            ErrorKind::RateLimited,
            format!("Rate limited by the tracker after {attempts} attempts"),
        )
        .with_suggestion("Wait before retrying, or reduce the request rate")
    } else {
        OperationError::new(
            ErrorKind::TransientNetwork,
            format!("The tracker was unavailable after {attempts} attempts"),
        )
        .with_suggestion("Check the tracker's availability and retry later")
    };
    let error = error.with_guidance(failure.to_string());
    match failure.status() {
        Some(status) => error.with_status(status),
        None => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited(wait: Duration) -> TransportFailure {
        TransportFailure::HttpError {
            status: 429,
            body: String::new(),
            retry_after: Some(wait),
        }
    }

    #[rstest]
    #[case::connection(TransportFailure::connection("reset"), true)]
    #[case::rate_limited(TransportFailure::http(429, ""), true)]
    #[case::server_error(TransportFailure::http(502, ""), true)]
    #[case::not_found(TransportFailure::http(404, ""), false)]
    #[case::bad_request(TransportFailure::http(400, ""), false)]
    #[case::malformed(TransportFailure::MalformedResponse { message: "x".into() }, false)]
    fn test_is_retryable(#[case] failure: TransportFailure, #[case] expected: bool) {
        assert_eq!(is_retryable(&failure), expected);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_after_is_a_floor() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        let delay = policy.delay_for(1, &rate_limited(Duration::from_secs(2)));
        assert!(delay >= Duration::from_secs(2), "{delay:?}");
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1, &TransportFailure::connection("x"));
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_always_rate_limited_makes_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .execute(Idempotency::Idempotent, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportFailure::http(429, "")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(RetryError::Exhausted(error)) => {
                assert_eq!(error.kind, ErrorKind::RateLimited);
                assert!(error.retryable);
                assert_eq!(error.http_status, Some(429));
            }
            other => panic!("expected exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_after_budget_is_never_reached() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .execute(Idempotency::Idempotent, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(TransportFailure::connection("refused"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(RetryError::Exhausted(error)) => {
                assert_eq!(error.kind, ErrorKind::TransientNetwork);
                assert_eq!(error.http_status, None);
            }
            other => panic!("expected exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .execute(Idempotency::Idempotent, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TransportFailure::http(503, "busy"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .execute(Idempotency::Idempotent, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportFailure::http(404, "")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Fatal(f)) if f.status() == Some(404)));
    }

    #[tokio::test]
    async fn test_non_idempotent_call_is_attempted_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .execute(Idempotency::NonIdempotent, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportFailure::connection("reset")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Fatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_waits_for_retry_after() {
        let attempts = std::sync::Mutex::new(Vec::new());
        let result = RetryPolicy::immediate(3)
            .execute(Idempotency::Idempotent, || {
                let mut seen = attempts.lock().unwrap();
                seen.push(tokio::time::Instant::now());
                let first = seen.len() == 1;
                async move {
                    if first {
                        Err(rate_limited(Duration::from_secs(2)))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(()));
        let seen = attempts.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1] - seen[0] >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_total_time() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            jitter: 0.0,
            deadline: Some(Duration::from_secs(7)),
        };
        let result: Result<(), _> = policy
            .execute(Idempotency::Idempotent, || async {
                Err(TransportFailure::connection("down"))
            })
            .await;

        match result {
            Err(RetryError::Exhausted(error)) => {
                assert_eq!(error.kind, ErrorKind::TransientNetwork);
                assert!(error.summary.contains("deadline"));
            }
            other => panic!("expected deadline error, got {other:?}"),
        }
    }
}
