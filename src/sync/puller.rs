use crate::artifact::Artifact;
use crate::error::{CancelReason, Result, SyncError};
use crate::sync::retry::retry_with_backoff;
use crate::sync::SyncTunables;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of a successful pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    /// Digest of the root manifest
    pub digest: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Runs one logical pull as a bounded sequence of attempts
#[derive(Debug, Clone, Default)]
pub struct Puller {
    tunables: SyncTunables,
}

impl Puller {
    pub fn new(tunables: SyncTunables) -> Self {
        Self { tunables }
    }

    pub fn tunables(&self) -> &SyncTunables {
        &self.tunables
    }

    /// Pull `artifact` into its destination, retrying transient failures.
    ///
    /// The whole sequence, waits included, is bounded by the deadline and
    /// stops as soon as `cancel` fires. Cancellation is never retried.
    pub async fn pull_with_retry(
        &self,
        cancel: &CancellationToken,
        artifact: &mut Artifact,
    ) -> Result<PullReport> {
        let started = Instant::now();
        let name = artifact.display_name();
        let deadline = self.tunables.deadline;
        let retry_interval = self.tunables.retry_interval;
        let attempt_counter = AtomicU32::new(0);

        tracing::debug!("Pulling {} into {}", name, artifact.path().display());

        let outcome = {
            let target: &Artifact = artifact;
            let attempts = &attempt_counter;

            let sequence = retry_with_backoff(
                move |attempt| {
                    attempts.store(attempt, Ordering::Relaxed);
                    target.fetch()
                },
                self.tunables.max_attempts,
                |_, e: &SyncError| {
                    let decision = e.retry_decision();
                    if !decision.retryable {
                        return None;
                    }
                    // Constant backoff; a longer server hint wins
                    Some(
                        decision
                            .wait_hint
                            .map_or(retry_interval, |hint| hint.max(retry_interval)),
                    )
                },
                &name,
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CancelReason::Cancelled),
                result = tokio::time::timeout(deadline, sequence) => {
                    result.map_err(|_| CancelReason::DeadlineExceeded(deadline))
                }
            }
        };

        match outcome {
            Err(reason) => Err(SyncError::Cancelled {
                coordinates: name,
                attempts: attempt_counter.load(Ordering::Relaxed),
                reason,
            }),
            Ok(Err(failure)) => Err(SyncError::PullFailed {
                coordinates: name,
                attempts: failure.attempts,
                exhausted: failure.exhausted,
                source: Box::new(failure.error),
            }),
            Ok(Ok((root, attempts))) => {
                artifact.record_pull();
                let elapsed = started.elapsed();

                tracing::info!(
                    "Pulled {} ({}) in {:?} after {} attempt(s)",
                    name,
                    root.digest,
                    elapsed,
                    attempts
                );

                Ok(PullReport {
                    digest: root.digest,
                    attempts,
                    elapsed,
                })
            }
        }
    }
}
