use std::time::Duration;

use atob_relay::{Backoff, RetryPolicy};

/// Tuning for the marketplace's reads and replicated writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketConfig {
  /// Page size for per-view log queries.
  pub page_size:         usize,
  /// Page size for the full refresh sweep.
  pub refresh_page_size: usize,
  /// Page size for per-package update lookups.
  pub lookup_limit:      usize,
  /// Base per-attempt timeout for log queries.
  pub query_timeout:     Duration,
  /// How long a read view waits for the log before serving the cache alone.
  pub fallback_after:    Duration,
  /// Republish schedule for completion events that no relay accepted.
  pub completion_retry:  RetryPolicy,
}

impl Default for MarketConfig {
  fn default() -> Self {
    Self {
      page_size:         100,
      refresh_page_size: 200,
      lookup_limit:      10,
      query_timeout:     Duration::from_secs(5),
      fallback_after:    Duration::from_secs(3),
      completion_retry:  RetryPolicy {
        max_attempts:        3,
        base_delay:          Duration::from_millis(1000),
        per_attempt_timeout: Duration::from_secs(5),
        backoff:             Backoff::Linear,
        escalate_timeout:    false,
      },
    }
  }
}
