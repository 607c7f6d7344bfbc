//! Poll loop configuration.

use crate::utils::backoff::exponential_delay;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Default interval between polls.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
/// Default delay after a transient fetch failure.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);
/// Default number of event ids remembered by the dedup window.
pub const DEFAULT_WINDOW_CAPACITY: NonZeroUsize = match NonZeroUsize::new(10) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// How long to wait before retrying after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Always wait the same delay.
    Fixed(Duration),
    /// Double from `base` on every consecutive failure, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl BackoffPolicy {
    /// Delay before retry `attempt` (1-based).
    ///
    /// A server-provided `retry_after` is honoured when it is longer than
    /// the policy delay.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = match *self {
            BackoffPolicy::Fixed(delay) => delay,
            BackoffPolicy::Exponential { base, max } => exponential_delay(base, attempt, max),
        };
        retry_after.map_or(delay, |hint| delay.max(hint))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed(DEFAULT_BACKOFF)
    }
}

/// How the dedup window computes the new events of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupStrategy {
    /// Test every id of the batch against the window.
    #[default]
    FullScan,
    /// Stop at the first known id. Only correct when the API returns
    /// records strictly newest-first.
    StopAtFirstKnown,
}

/// Runtime configuration of a poll client.
///
/// Held in a [`ConfigStore`](super::ConfigStore); the loop re-reads it on
/// every iteration, so updates apply from the next poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Normal period between polls. Must not exceed the remote rate limit.
    pub interval: Duration,
    pub backoff: BackoffPolicy,
    pub window_capacity: NonZeroUsize,
    pub dedup: DedupStrategy,
    /// Upper bound for a single handler invocation; `None` waits forever.
    pub handler_timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            backoff: BackoffPolicy::default(),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            dedup: DedupStrategy::default(),
            handler_timeout: None,
        }
    }
}
