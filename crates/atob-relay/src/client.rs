//! [`EventLogClient`]: best-effort access to a set of relays.
//!
//! No relay failure is ever returned from here. A failed publish becomes a
//! `failed: <reason>` outcome; a failed query leg contributes zero events.
//! The only hard error is an empty relay set.

use std::{collections::HashSet, fmt, time::Duration};

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use atob_core::{
  event::{Event, Filter},
  relay::Relay,
};

use crate::{Error, Result, keys::verify_event, retry::RetryPolicy};

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogConfig {
  pub publish_timeout:   Duration,
  /// Schedule for broad queries that retry while the result is empty.
  pub query:             RetryPolicy,
  /// Schedule for point lookups by event id.
  pub lookup:            RetryPolicy,
  pub health_timeout:    Duration,
  /// Drop events whose id or signature does not verify.
  pub verify_signatures: bool,
}

impl Default for EventLogConfig {
  fn default() -> Self {
    Self {
      publish_timeout:   Duration::from_secs(5),
      query:             RetryPolicy::query(),
      lookup:            RetryPolicy::lookup(),
      health_timeout:    Duration::from_secs(5),
      verify_signatures: true,
    }
  }
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// What one relay said about one published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
  pub relay:  String,
  /// `None` when accepted, otherwise the failure reason.
  pub failed: Option<String>,
}

impl PublishOutcome {
  pub fn is_ok(&self) -> bool { self.failed.is_none() }
}

impl fmt::Display for PublishOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.failed {
      None => f.write_str("ok"),
      Some(reason) => write!(f, "failed: {reason}"),
    }
  }
}

/// Number of relays that accepted.
pub fn accepted(outcomes: &[PublishOutcome]) -> usize {
  outcomes.iter().filter(|o| o.is_ok()).count()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
  pub url:       String,
  pub reachable: bool,
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct EventLogClient<R> {
  relays: Vec<R>,
  config: EventLogConfig,
}

impl<R: Relay> EventLogClient<R> {
  /// Fails only if `relays` is empty.
  pub fn new(relays: Vec<R>, config: EventLogConfig) -> Result<Self> {
    if relays.is_empty() {
      return Err(Error::NoRelays);
    }
    Ok(Self { relays, config })
  }

  pub fn config(&self) -> &EventLogConfig { &self.config }

  pub fn relays(&self) -> &[R] { &self.relays }

  /// Send `event` to every relay concurrently. One outcome per relay, in
  /// relay order.
  pub async fn publish(&self, event: &Event) -> Vec<PublishOutcome> {
    let timeout = self.config.publish_timeout;
    let legs = self.relays.iter().map(|relay| async move {
      let result = match tokio::time::timeout(timeout, relay.publish(event, timeout)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err("timeout".to_owned()),
      };
      if let Err(reason) = &result {
        debug!(relay = relay.url(), event = %event.id, %reason, "publish failed");
      }
      PublishOutcome { relay: relay.url().to_owned(), failed: result.err() }
    });
    let outcomes = join_all(legs).await;
    info!(
      event = %event.id,
      kind = event.kind,
      accepted = accepted(&outcomes),
      relays = outcomes.len(),
      "published event"
    );
    outcomes
  }

  /// Query every relay once, concurrently; merge and de-duplicate.
  async fn query_round(&self, filter: &Filter, timeout: Duration) -> Vec<Event> {
    let legs = self.relays.iter().map(|relay| async move {
      match tokio::time::timeout(timeout, relay.query(filter, timeout)).await {
        Ok(Ok(events)) => events,
        Ok(Err(e)) => {
          debug!(relay = relay.url(), error = %e, "query leg failed");
          Vec::new()
        }
        Err(_) => {
          debug!(relay = relay.url(), "query leg timed out");
          Vec::new()
        }
      }
    });

    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for event in join_all(legs).await.into_iter().flatten() {
      if !seen.insert(event.id.clone()) {
        continue;
      }
      if self.config.verify_signatures && !verify_event(&event) {
        warn!(event = %event.id, pubkey = %event.pubkey, "dropping event that fails verification");
        continue;
      }
      merged.push(event);
    }
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    merged
  }

  /// Run rounds under `policy` until one yields at least one event.
  pub async fn query_with(&self, filter: &Filter, policy: &RetryPolicy) -> Vec<Event> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
      let events = self.query_round(filter, policy.timeout_for(attempt)).await;
      if !events.is_empty() {
        debug!(count = events.len(), attempt = attempt + 1, "query returned events");
        return events;
      }
      if attempt + 1 < attempts {
        tokio::time::sleep(policy.delay_for(attempt)).await;
      }
    }
    debug!(attempts, "query returned nothing");
    Vec::new()
  }

  /// Events matching `filter`, newest first. An empty result is retried
  /// under the configured query policy before it is believed.
  pub async fn query(&self, filter: &Filter, timeout: Duration) -> Vec<Event> {
    let policy = self.config.query.clone().with_timeout(timeout);
    self.query_with(filter, &policy).await
  }

  /// A single round with no retry. For follow-up reads where emptiness is
  /// the common, expected answer.
  pub async fn query_once(&self, filter: &Filter, timeout: Duration) -> Vec<Event> {
    self.query_round(filter, timeout).await
  }

  /// Point lookup by event id under the lookup policy.
  pub async fn get_by_id(&self, id: &str, timeout: Duration) -> Option<Event> {
    let filter = Filter::new().id(id).limit(1);
    let policy = self.config.lookup.clone().with_timeout(timeout);
    self.query_with(&filter, &policy).await.into_iter().find(|e| e.id == id)
  }

  /// Whether the relay at `url` accepts a connection. Unknown urls are
  /// reported unreachable.
  pub async fn check_health(&self, url: &str) -> bool {
    let Some(relay) = self.relays.iter().find(|r| r.url() == url) else {
      return false;
    };
    self.ping(relay).await
  }

  async fn ping(&self, relay: &R) -> bool {
    let timeout = self.config.health_timeout;
    matches!(tokio::time::timeout(timeout, relay.ping(timeout)).await, Ok(Ok(())))
  }

  /// Reachability of every relay, checked concurrently.
  pub async fn relay_status(&self) -> Vec<RelayStatus> {
    let checks = self.relays.iter().map(|relay| async move {
      RelayStatus { url: relay.url().to_owned(), reachable: self.ping(relay).await }
    });
    join_all(checks).await
  }
}

#[cfg(test)]
mod tests {
  use atob_core::{
    event::{EventDraft, kinds},
    signer::Signer,
  };

  use super::*;
  use crate::{KeySigner, MemoryRelay};

  fn client(relays: Vec<MemoryRelay>) -> EventLogClient<MemoryRelay> {
    EventLogClient::new(relays, EventLogConfig::default()).unwrap()
  }

  fn signed(signer: &KeySigner, content: &str) -> Event {
    signer.sign(EventDraft::new(kinds::PACKAGE, 1_700_000_000, content)).unwrap()
  }

  #[test]
  fn empty_relay_set_is_an_error() {
    assert!(matches!(
      EventLogClient::<MemoryRelay>::new(vec![], EventLogConfig::default()),
      Err(Error::NoRelays)
    ));
  }

  #[tokio::test]
  async fn publish_reports_per_relay_outcomes() {
    let up = MemoryRelay::new("mem://up");
    let down = MemoryRelay::unreachable("mem://down");
    let c = client(vec![up.clone(), down]);

    let outcomes = c.publish(&signed(&KeySigner::generate(), "{}")).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].to_string(), "ok");
    assert!(outcomes[1].to_string().starts_with("failed: "));
    assert_eq!(accepted(&outcomes), 1);
    assert_eq!(up.events().len(), 1);
  }

  #[tokio::test]
  async fn query_merges_and_deduplicates() {
    let a = MemoryRelay::new("mem://a");
    let b = MemoryRelay::new("mem://b");
    let signer = KeySigner::generate();
    let shared = signed(&signer, "{\"n\":1}");
    a.insert(shared.clone());
    b.insert(shared);
    b.insert(signed(&signer, "{\"n\":2}"));

    let c = client(vec![a, b]);
    let events = c.query(&Filter::new().kind(kinds::PACKAGE), Duration::from_secs(1)).await;
    assert_eq!(events.len(), 2);
  }

  #[tokio::test]
  async fn forged_events_are_dropped() {
    let relay = MemoryRelay::new("mem://a");
    let mut forged = signed(&KeySigner::generate(), "{}");
    forged.content = "{\"evil\":true}".into();
    relay.insert(forged);
    relay.insert(signed(&KeySigner::generate(), "{\"ok\":true}"));

    let c = client(vec![relay]);
    let events = c.query_once(&Filter::new(), Duration::from_secs(1)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].content, "{\"ok\":true}");
  }

  #[tokio::test(start_paused = true)]
  async fn empty_query_retries_with_backoff() {
    let relay = MemoryRelay::unreachable("mem://down");
    let c = client(vec![relay]);

    let started = tokio::time::Instant::now();
    let events = c.query(&Filter::new(), Duration::from_secs(1)).await;
    assert!(events.is_empty());
    // Linear 1s backoff across 5 attempts: 1 + 2 + 3 + 4 seconds of waiting.
    assert_eq!(started.elapsed(), Duration::from_secs(10));
  }

  #[tokio::test(start_paused = true)]
  async fn query_recovers_when_a_relay_comes_back() {
    let relay = MemoryRelay::unreachable("mem://flaky");
    relay.insert(signed(&KeySigner::generate(), "{}"));
    let c = client(vec![relay.clone()]);

    let revive = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(1500)).await;
      relay.set_reachable(true);
    });
    let events = c.query(&Filter::new(), Duration::from_secs(1)).await;
    revive.await.unwrap();
    assert_eq!(events.len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn get_by_id_gives_up_after_lookup_attempts() {
    let c = client(vec![MemoryRelay::new("mem://a")]);
    let started = tokio::time::Instant::now();
    assert!(c.get_by_id("missing", Duration::from_secs(1)).await.is_none());
    assert_eq!(started.elapsed(), Duration::from_millis(1000));
  }

  #[tokio::test]
  async fn get_by_id_finds_event() {
    let relay = MemoryRelay::new("mem://a");
    let event = signed(&KeySigner::generate(), "{}");
    relay.insert(event.clone());
    let c = client(vec![relay]);
    assert_eq!(c.get_by_id(&event.id, Duration::from_secs(1)).await, Some(event));
  }

  #[tokio::test]
  async fn health_reflects_reachability() {
    let up = MemoryRelay::new("mem://up");
    let down = MemoryRelay::unreachable("mem://down");
    let c = client(vec![up, down]);

    assert!(c.check_health("mem://up").await);
    assert!(!c.check_health("mem://down").await);
    assert!(!c.check_health("mem://unknown").await);

    let status = c.relay_status().await;
    assert_eq!(status.iter().filter(|s| s.reachable).count(), 1);
  }
}
