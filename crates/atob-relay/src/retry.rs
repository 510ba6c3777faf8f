//! Retry schedules for event-log reads and replicated writes.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
  /// Always wait `base_delay`.
  Fixed,
  /// Wait `base_delay * n` after the n-th failed attempt.
  Linear,
  /// Wait `base_delay * 2^(n-1)` after the n-th failed attempt.
  Exponential,
}

/// How many times to try an operation, how long each try may take, and how
/// long to wait between tries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts:        u32,
  pub base_delay:          Duration,
  pub per_attempt_timeout: Duration,
  pub backoff:             Backoff,
  /// Grow the per-attempt timeout linearly with the attempt number.
  pub escalate_timeout:    bool,
}

impl RetryPolicy {
  /// Broad queries: 5 attempts, linear 1 s backoff, escalating timeout.
  pub fn query() -> Self {
    Self {
      max_attempts:        5,
      base_delay:          Duration::from_millis(1000),
      per_attempt_timeout: Duration::from_secs(5),
      backoff:             Backoff::Linear,
      escalate_timeout:    true,
    }
  }

  /// Point lookups: 3 attempts, fixed 500 ms between them.
  pub fn lookup() -> Self {
    Self {
      max_attempts:        3,
      base_delay:          Duration::from_millis(500),
      per_attempt_timeout: Duration::from_secs(5),
      backoff:             Backoff::Fixed,
      escalate_timeout:    false,
    }
  }

  /// A single attempt with no waiting.
  pub fn once(timeout: Duration) -> Self {
    Self {
      max_attempts:        1,
      base_delay:          Duration::ZERO,
      per_attempt_timeout: timeout,
      backoff:             Backoff::Fixed,
      escalate_timeout:    false,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.per_attempt_timeout = timeout;
    self
  }

  /// Delay to wait after attempt `attempt` (zero-based) has failed.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    match self.backoff {
      Backoff::Fixed => self.base_delay,
      Backoff::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
      Backoff::Exponential => {
        self.base_delay.saturating_mul(2u32.checked_pow(attempt).unwrap_or(u32::MAX))
      }
    }
  }

  /// Timeout allowed for attempt `attempt` (zero-based).
  pub fn timeout_for(&self, attempt: u32) -> Duration {
    if self.escalate_timeout {
      self.per_attempt_timeout.saturating_mul(attempt.saturating_add(1))
    } else {
      self.per_attempt_timeout
    }
  }
}
