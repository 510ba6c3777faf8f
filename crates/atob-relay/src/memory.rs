//! [`MemoryRelay`]: an in-process event log.
//!
//! Clones share storage, so several clients (one per identity) can publish
//! to and read from the same log. An unreachable relay fails every call,
//! which is how tests simulate an outage.

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use atob_core::{
  event::{Event, Filter},
  relay::{Relay, RelayError},
};

#[derive(Debug, Default)]
struct Shared {
  events:    Mutex<Vec<Event>>,
  reachable: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct MemoryRelay {
  url:    String,
  shared: Arc<Shared>,
}

impl MemoryRelay {
  pub fn new(url: impl Into<String>) -> Self {
    let shared = Shared { reachable: AtomicBool::new(true), ..Default::default() };
    Self { url: url.into(), shared: Arc::new(shared) }
  }

  /// A relay that refuses every connection.
  pub fn unreachable(url: impl Into<String>) -> Self {
    let relay = Self::new(url);
    relay.set_reachable(false);
    relay
  }

  pub fn set_reachable(&self, reachable: bool) {
    self.shared.reachable.store(reachable, Ordering::SeqCst);
  }

  /// Store `event` directly, bypassing reachability.
  pub fn insert(&self, event: Event) {
    let mut events = self.lock();
    if !events.iter().any(|e| e.id == event.id) {
      events.push(event);
    }
  }

  /// Every stored event, in arrival order.
  pub fn events(&self) -> Vec<Event> { self.lock().clone() }

  fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
    match self.shared.events.lock() {
      Ok(g) => g,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn check(&self) -> Result<(), RelayError> {
    if self.shared.reachable.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(RelayError::Connect { url: self.url.clone(), reason: "connection refused".into() })
    }
  }
}

impl Relay for MemoryRelay {
  fn url(&self) -> &str { &self.url }

  async fn publish(&self, event: &Event, _timeout: Duration) -> Result<(), RelayError> {
    self.check()?;
    self.insert(event.clone());
    Ok(())
  }

  /// Newest first, as a relay returns stored events.
  async fn query(&self, filter: &Filter, _timeout: Duration) -> Result<Vec<Event>, RelayError> {
    self.check()?;
    let mut matched: Vec<Event> =
      self.lock().iter().filter(|e| filter.matches(e)).cloned().collect();
    matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    if let Some(limit) = filter.limit {
      matched.truncate(limit);
    }
    Ok(matched)
  }

  async fn ping(&self, _timeout: Duration) -> Result<(), RelayError> { self.check() }
}
