/// Retry classification, backoff policy and the bounded retry loop
///
/// The predicate decides whether a transport outcome is worth another try.
/// Registries serve manifests with eventual consistency right after a push, so
/// 404 is treated as transient alongside timeouts, 408, 429 and 5xx.
///
/// The policy bounds per-request retries inside the registry client:
/// - Attempt 1: Execute immediately
/// - Attempt 2: Wait 250ms
/// - Attempt 3: Wait 500ms
/// - Attempt 4: Wait 1s
///
/// Each wait is clamped to [200ms, 3s]; a server `Retry-After` replaces the
/// computed backoff but is clamped the same way.
use crate::registry::TransportError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_MIN_WAIT: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_RETRY: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_FACTOR: u32 = 2;

/// Result of classifying one transport outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retryable: bool,
    pub wait_hint: Option<Duration>,
}

impl RetryDecision {
    pub const fn retry(wait_hint: Option<Duration>) -> Self {
        Self {
            retryable: true,
            wait_hint,
        }
    }

    pub const fn terminal() -> Self {
        Self {
            retryable: false,
            wait_hint: None,
        }
    }
}

/// What a single request produced
#[derive(Debug, Clone, Copy)]
pub enum TransportOutcome<'a> {
    /// The server answered with a non-success status
    Status {
        code: u16,
        retry_after: Option<Duration>,
    },
    /// The request failed before or while reading a response
    Error(&'a TransportError),
}

/// Classify a transport outcome as retryable or terminal
pub fn classify(outcome: TransportOutcome<'_>) -> RetryDecision {
    match outcome {
        TransportOutcome::Status { code, retry_after } => classify_status(code, retry_after),
        TransportOutcome::Error(TransportError::Status {
            status,
            retry_after,
            ..
        }) => classify_status(*status, *retry_after),
        TransportOutcome::Error(TransportError::Timeout(_)) => RetryDecision::retry(None),
        TransportOutcome::Error(_) => RetryDecision::terminal(),
    }
}

fn classify_status(code: u16, retry_after: Option<Duration>) -> RetryDecision {
    match code {
        408 => RetryDecision::retry(None),
        429 => RetryDecision::retry(retry_after),
        404 => RetryDecision::retry(None),
        0 => RetryDecision::retry(None),
        c if c >= 500 => RetryDecision::retry(None),
        _ => RetryDecision::terminal(),
    }
}

/// Bounded exponential backoff driven by [`classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub max_retry: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_wait: DEFAULT_MIN_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
            max_retry: DEFAULT_MAX_RETRY,
        }
    }
}

impl RetryPolicy {
    /// Unclamped backoff before retry number `retry` (0-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = BACKOFF_FACTOR.saturating_pow(retry.min(16));
        BACKOFF_BASE.saturating_mul(factor)
    }

    /// Wait before retry number `retry` (0-based), or None to stop
    pub fn next_wait(&self, retry: u32, outcome: TransportOutcome<'_>) -> Option<Duration> {
        if retry >= self.max_retry {
            return None;
        }

        let decision = classify(outcome);
        if !decision.retryable {
            return None;
        }

        let wait = decision.wait_hint.unwrap_or_else(|| self.backoff(retry));
        Some(wait.clamp(self.min_wait, self.max_wait.max(self.min_wait)))
    }

    /// Total attempts allowed, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retry.saturating_add(1)
    }
}

/// Why [`retry_with_backoff`] gave up
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Error from the last attempt
    pub error: E,
    /// Attempts made, the failing one included
    pub attempts: u32,
    /// True when the budget ran out, false when the error was terminal
    pub exhausted: bool,
}

/// Run `operation` until it succeeds, the budget runs out, or `backoff` says stop.
///
/// `operation` receives the 1-based attempt number. `backoff` receives the
/// attempt number that just failed and its error, and returns the delay before
/// the next attempt or None for a terminal error. Dropping the returned future
/// abandons any in-flight attempt or sleep.
pub async fn retry_with_backoff<T, E, F, Fut, B>(
    mut operation: F,
    max_attempts: u32,
    mut backoff: B,
    description: &str,
) -> Result<(T, u32), RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    B: FnMut(u32, &E) -> Option<Duration>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!("'{}' succeeded on attempt {}", description, attempt);
                }
                return Ok((result, attempt));
            }
            Err(e) if attempt >= max_attempts => {
                tracing::debug!(
                    "'{}' failed after {} attempts: {}",
                    description,
                    attempt,
                    e
                );
                return Err(RetryFailure {
                    error: e,
                    attempts: attempt,
                    exhausted: true,
                });
            }
            Err(e) => match backoff(attempt, &e) {
                Some(wait) => {
                    tracing::warn!(
                        "'{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                        description,
                        attempt,
                        max_attempts,
                        e,
                        wait
                    );
                    sleep(wait).await;
                }
                None => {
                    tracing::debug!("'{}' failed with a terminal error: {}", description, e);
                    return Err(RetryFailure {
                        error: e,
                        attempts: attempt,
                        exhausted: false,
                    });
                }
            },
        }
    }
}
