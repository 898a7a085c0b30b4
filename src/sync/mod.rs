//! Recurring sync engine
//!
//! - [`retry`]: retry predicate, backoff policy and the bounded retry loop
//! - [`Puller`]: one pull as a bounded sequence of attempts under a deadline
//! - [`SyncController`]: one background task per artifact, pulling on an interval

mod controller;
mod puller;
pub mod retry;

pub use controller::{start, SyncController};
pub use puller::{PullReport, Puller};

use crate::artifact::MINIMUM_INTERVAL;
use std::time::Duration;

/// Deadline for one pull, all attempts and waits included
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

/// Wait between pull attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Attempts per pull, the first one included
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Timing knobs for the puller and controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTunables {
    pub deadline: Duration,
    pub retry_interval: Duration,
    pub max_attempts: u32,
    pub minimum_interval: Duration,
}

impl Default for SyncTunables {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            minimum_interval: MINIMUM_INTERVAL,
        }
    }
}
