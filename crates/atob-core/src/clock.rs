//! Injected wall-clock time.
//!
//! Everything that stamps or compares timestamps takes a [`Clock`] so that
//! expiry and latest-wins ordering can be tested without waiting.

use std::sync::atomic::{AtomicI64, Ordering};

/// A source of "now" as Unix seconds, the unit used on the event log.
pub trait Clock: Send + Sync {
  fn now(&self) -> i64;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> i64 { chrono::Utc::now().timestamp() }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicI64,
}

impl ManualClock {
  pub fn new(now: i64) -> Self { Self { now: AtomicI64::new(now) } }

  pub fn set(&self, now: i64) { self.now.store(now, Ordering::SeqCst); }

  pub fn advance(&self, secs: i64) { self.now.fetch_add(secs, Ordering::SeqCst); }
}

impl Clock for ManualClock {
  fn now(&self) -> i64 { self.now.load(Ordering::SeqCst) }
}
