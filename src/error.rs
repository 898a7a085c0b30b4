use crate::registry::TransportError;
use crate::store::StoreError;
use crate::sync::retry::{classify, RetryDecision, TransportOutcome};
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`SyncError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed URL, missing url/path, unreadable config
    Configuration,
    /// Credential incomplete or inconsistent
    Credential,
    /// Transport failure the retry predicate considers transient
    TransientTransport,
    /// Transport failure the retry predicate considers permanent
    TerminalTransport,
    /// Copy reported success but the content is not verifiably present
    Verification,
    /// Local destination could not be written
    Storage,
    /// Cancelled or deadline exceeded
    Cancellation,
}

/// Why a pull sequence stopped before finishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The governing cancellation token fired
    Cancelled,
    /// The pull deadline elapsed
    DeadlineExceeded(Duration),
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "context cancelled"),
            CancelReason::DeadlineExceeded(d) => write!(f, "deadline of {:?} exceeded", d),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Pull of {coordinates} stopped after {attempts} attempt(s): {reason}")]
    Cancelled {
        coordinates: String,
        attempts: u32,
        reason: CancelReason,
    },

    #[error("Pull of {coordinates} failed after {attempts} attempt(s): {source}")]
    PullFailed {
        coordinates: String,
        attempts: u32,
        /// True when the attempt budget ran out, false when a terminal error stopped the sequence
        exhausted: bool,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Configuration(_) => ErrorKind::Configuration,
            SyncError::Credential(_) => ErrorKind::Credential,
            SyncError::Transport(e) => {
                if classify(TransportOutcome::Error(e)).retryable {
                    ErrorKind::TransientTransport
                } else {
                    ErrorKind::TerminalTransport
                }
            }
            SyncError::Verification(_) => ErrorKind::Verification,
            SyncError::Store(_) => ErrorKind::Storage,
            SyncError::Cancelled { .. } => ErrorKind::Cancellation,
            SyncError::PullFailed { source, .. } => source.kind(),
        }
    }

    /// Whether another attempt may succeed, and how long the server asked us to wait
    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            SyncError::Transport(e) => classify(TransportOutcome::Error(e)),
            SyncError::Verification(_) => RetryDecision::retry(None),
            _ => RetryDecision::terminal(),
        }
    }

    /// True for errors produced by a retry budget running out
    pub fn is_exhausted(&self) -> bool {
        matches!(self, SyncError::PullFailed { exhausted: true, .. })
    }

    /// Number of attempts recorded on pull-level errors
    pub fn attempts(&self) -> Option<u32> {
        match self {
            SyncError::Cancelled { attempts, .. } | SyncError::PullFailed { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> SyncError {
        SyncError::Transport(TransportError::Status {
            status: code,
            url: "https://ghcr.io/v2/owner/repo/manifests/1.0".to_string(),
            message: String::new(),
            retry_after: None,
        })
    }

    #[test]
    fn test_transport_kind_follows_predicate() {
        assert_eq!(status(503).kind(), ErrorKind::TransientTransport);
        assert_eq!(status(404).kind(), ErrorKind::TransientTransport);
        assert_eq!(status(401).kind(), ErrorKind::TerminalTransport);
        assert_eq!(
            SyncError::Transport(TransportError::Network("connection refused".into())).kind(),
            ErrorKind::TerminalTransport
        );
    }

    #[test]
    fn test_pull_failed_reports_inner_kind() {
        let err = SyncError::PullFailed {
            coordinates: "ghcr.io/owner/repo:1.0".to_string(),
            attempts: 3,
            exhausted: true,
            source: Box::new(status(404)),
        };
        assert_eq!(err.kind(), ErrorKind::TransientTransport);
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), Some(3));
        assert!(err.to_string().contains("ghcr.io/owner/repo:1.0"));
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn test_verification_is_retryable() {
        let err = SyncError::Verification("artifact not found after copy".into());
        assert!(err.retry_decision().retryable);
        assert!(!SyncError::Configuration("no URL set".into())
            .retry_decision()
            .retryable);
    }

    #[test]
    fn test_cancel_reason_display() {
        let err = SyncError::Cancelled {
            coordinates: "ghcr.io/owner/repo:1.0".to_string(),
            attempts: 1,
            reason: CancelReason::DeadlineExceeded(Duration::from_secs(60)),
        };
        assert_eq!(err.kind(), ErrorKind::Cancellation);
        assert!(err.to_string().contains("deadline of 60s exceeded"));
    }
}
