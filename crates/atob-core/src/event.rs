//! Event-log wire types.
//!
//! The marketplace uses NIP-01 events as its unit of replication. An event is
//! immutable once signed: its `id` is the SHA-256 of the canonical
//! serialisation and its `sig` covers that id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};
use sha2::{Digest, Sha256};

// ─── Kinds ───────────────────────────────────────────────────────────────────

/// Event kinds published or read by the marketplace.
pub mod kinds {
  /// Profile metadata (NIP-01).
  pub const METADATA: u32 = 0;
  /// Generic deletion request (NIP-09).
  pub const DELETION: u32 = 5;
  /// A package offered for delivery.
  pub const PACKAGE: u32 = 30001;
  /// A status transition for a package.
  pub const DELIVERY: u32 = 30002;
}

// ─── Event ───────────────────────────────────────────────────────────────────

/// A signed event as stored on, and returned by, a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
  pub id:         String,
  pub pubkey:     String,
  pub created_at: i64,
  pub kind:       u32,
  pub tags:       Vec<Vec<String>>,
  pub content:    String,
  pub sig:        String,
}

impl Event {
  /// The first value of every tag named `name`, in tag order.
  pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    self
      .tags
      .iter()
      .filter(move |t| t.first().map(String::as_str) == Some(name))
      .filter_map(|t| t.get(1).map(String::as_str))
  }

  /// Whether `id` is the hash of the rest of the event.
  pub fn has_valid_id(&self) -> bool {
    compute_event_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)
      == self.id
  }
}

// ─── EventDraft ──────────────────────────────────────────────────────────────

/// An event before the signer has stamped it with a pubkey, id and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
  pub created_at: i64,
  pub kind:       u32,
  pub tags:       Vec<Vec<String>>,
  pub content:    String,
}

impl EventDraft {
  pub fn new(kind: u32, created_at: i64, content: impl Into<String>) -> Self {
    Self { created_at, kind, tags: Vec::new(), content: content.into() }
  }

  /// Append a `[name, value]` tag.
  pub fn tag(mut self, name: &str, value: impl Into<String>) -> Self {
    self.tags.push(vec![name.to_owned(), value.into()]);
    self
  }

  /// The id this draft will have once signed by `pubkey`.
  pub fn id_for(&self, pubkey: &str) -> String {
    compute_event_id(pubkey, self.created_at, self.kind, &self.tags, &self.content)
  }

  /// Assemble the final event. The signer is responsible for `sig`.
  pub fn into_event(self, pubkey: String, id: String, sig: String) -> Event {
    Event {
      id,
      pubkey,
      created_at: self.created_at,
      kind: self.kind,
      tags: self.tags,
      content: self.content,
      sig,
    }
  }
}

/// NIP-01 event id: hex SHA-256 of `[0, pubkey, created_at, kind, tags, content]`
/// serialised as compact JSON.
pub fn compute_event_id(
  pubkey: &str,
  created_at: i64,
  kind: u32,
  tags: &[Vec<String>],
  content: &str,
) -> String {
  let canonical = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
  hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

// ─── Filter ──────────────────────────────────────────────────────────────────

/// A relay subscription filter.
///
/// Empty lists mean "no constraint". Tag constraints serialise as `#<name>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
  pub ids:     Vec<String>,
  pub authors: Vec<String>,
  pub kinds:   Vec<u32>,
  pub tags:    BTreeMap<String, Vec<String>>,
  pub since:   Option<i64>,
  pub until:   Option<i64>,
  pub limit:   Option<usize>,
}

impl Filter {
  pub fn new() -> Self { Self::default() }

  pub fn id(mut self, id: impl Into<String>) -> Self {
    self.ids.push(id.into());
    self
  }

  pub fn author(mut self, pubkey: impl Into<String>) -> Self {
    self.authors.push(pubkey.into());
    self
  }

  pub fn kind(mut self, kind: u32) -> Self {
    self.kinds.push(kind);
    self
  }

  pub fn tag(mut self, name: &str, value: impl Into<String>) -> Self {
    self.tags.entry(name.to_owned()).or_default().push(value.into());
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  /// Whether `event` satisfies every constraint except `limit`.
  pub fn matches(&self, event: &Event) -> bool {
    if !self.ids.is_empty() && !self.ids.contains(&event.id) {
      return false;
    }
    if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
      return false;
    }
    if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
      return false;
    }
    if self.since.is_some_and(|s| event.created_at < s) {
      return false;
    }
    if self.until.is_some_and(|u| event.created_at > u) {
      return false;
    }
    self.tags.iter().all(|(name, wanted)| {
      event.tag_values(name).any(|v| wanted.iter().any(|w| w == v))
    })
  }
}

impl Serialize for Filter {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(None)?;
    if !self.ids.is_empty() {
      map.serialize_entry("ids", &self.ids)?;
    }
    if !self.authors.is_empty() {
      map.serialize_entry("authors", &self.authors)?;
    }
    if !self.kinds.is_empty() {
      map.serialize_entry("kinds", &self.kinds)?;
    }
    for (name, values) in &self.tags {
      map.serialize_entry(&format!("#{name}"), values)?;
    }
    if let Some(since) = self.since {
      map.serialize_entry("since", &since)?;
    }
    if let Some(until) = self.until {
      map.serialize_entry("until", &until)?;
    }
    if let Some(limit) = self.limit {
      map.serialize_entry("limit", &limit)?;
    }
    map.end()
  }
}
