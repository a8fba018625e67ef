//! Fault tolerance of chunk-oriented steps: which errors may be skipped and
//! which writes may be retried.

use std::time::Duration;

use crate::BatchError;

/// Decides whether an item that failed may be discarded.
pub trait SkipPolicy {
    /// `skip_count` is the number of items already skipped by the step.
    fn should_skip(&self, error: &BatchError, skip_count: usize) -> bool;
}

/// Never skips anything: the first item error fails the step.
#[derive(Default)]
pub struct NeverSkipItemSkipPolicy;

impl SkipPolicy for NeverSkipItemSkipPolicy {
    fn should_skip(&self, _error: &BatchError, _skip_count: usize) -> bool {
        false
    }
}

/// Skips read and process errors until `skip_limit` items have been skipped.
///
/// Writes rejected by the target store are only skipped when
/// [`skip_write_rejections`](Self::skip_write_rejections) is enabled; the step
/// then rewrites the chunk item by item to isolate the rejected ones.
/// Source and connection errors are never skipped.
#[derive(Debug, Clone)]
pub struct LimitCheckingItemSkipPolicy {
    skip_limit: usize,
    skip_write_rejections: bool,
}

impl LimitCheckingItemSkipPolicy {
    pub fn new(skip_limit: usize) -> Self {
        Self {
            skip_limit,
            skip_write_rejections: false,
        }
    }

    pub fn skip_write_rejections(mut self, yes: bool) -> Self {
        self.skip_write_rejections = yes;
        self
    }

    pub fn skip_limit(&self) -> usize {
        self.skip_limit
    }
}

impl SkipPolicy for LimitCheckingItemSkipPolicy {
    fn should_skip(&self, error: &BatchError, skip_count: usize) -> bool {
        let skippable = match error {
            BatchError::MalformedRecord { .. }
            | BatchError::ItemReader(_)
            | BatchError::ItemProcessor(_) => true,
            BatchError::WriteRejected(_) => self.skip_write_rejections,
            _ => false,
        };
        skippable && skip_count < self.skip_limit
    }
}

/// Bounded retry of transient write failures with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included. `1` disables retries.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn new(max_attempts: usize, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            multiplier: 2,
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed with `error`.
    pub fn can_retry(&self, error: &BatchError, attempt: usize) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }

    /// Delay to wait before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}
