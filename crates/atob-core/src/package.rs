//! Package and delivery-update records: the marketplace's unit of work.
//!
//! A package's literal `status` field travels with the record but is never
//! trusted on its own: readers call [`effective_status`], which ranks the
//! delivery and pickup timestamps above the literal field and applies the
//! 30-day expiry horizon.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Seconds after `created_at` at which a package expires.
pub const EXPIRY_SECS: i64 = 30 * 24 * 60 * 60;

/// Latest envelope timestamp accepted from the log (9999-12-31T23:59:59Z).
pub const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// Prefix of ids assigned to packages that never reached the event log.
pub const LOCAL_ID_PREFIX: &str = "local-";

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PackageStatus {
  #[default]
  Available,
  InTransit,
  Delivered,
  Expired,
}

/// Derive the status a package should be displayed and filtered by.
///
/// First match wins:
/// 1. a positive `delivery_time` → `Delivered`
/// 2. a positive `pickup_time` → `InTransit`
/// 3. `now` past `created_at + 30 days` → `Expired`
/// 4. otherwise the literal status
pub fn effective_status(
  literal: PackageStatus,
  pickup_time: Option<i64>,
  delivery_time: Option<i64>,
  created_at: i64,
  now: i64,
) -> PackageStatus {
  if delivery_time.is_some_and(|t| t > 0) {
    return PackageStatus::Delivered;
  }
  if pickup_time.is_some_and(|t| t > 0) {
    return PackageStatus::InTransit;
  }
  if now > created_at.saturating_add(EXPIRY_SECS) {
    return PackageStatus::Expired;
  }
  literal
}

// ─── Package ─────────────────────────────────────────────────────────────────

/// The canonical package record, as cached locally and as carried (minus
/// `id`) in creation-event content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
  pub id:              String,
  pub title:           String,
  #[serde(rename = "pickupLocation")]
  pub pickup_location: String,
  pub destination:     String,
  /// Asking price, kept as the free-text amount the creator typed.
  pub cost:            String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description:     Option<String>,
  #[serde(default)]
  pub status:          PackageStatus,
  /// Creator identity.
  pub pubkey:          String,
  pub created_at:      i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub courier_pubkey:  Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pickup_time:     Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub delivery_time:   Option<i64>,
}

impl Package {
  /// Build a fresh `Available` package from creator input.
  pub fn new(id: String, input: NewPackage, pubkey: String, created_at: i64) -> Self {
    Self {
      id,
      title: input.title,
      pickup_location: input.pickup_location,
      destination: input.destination,
      cost: input.cost,
      description: input.description.filter(|d| !d.trim().is_empty()),
      status: PackageStatus::Available,
      pubkey,
      created_at,
      courier_pubkey: None,
      pickup_time: None,
      delivery_time: None,
    }
  }

  pub fn effective_status(&self, now: i64) -> PackageStatus {
    effective_status(
      self.status,
      self.pickup_time,
      self.delivery_time,
      self.created_at,
      now,
    )
  }

  pub fn expires_at(&self) -> i64 { self.created_at.saturating_add(EXPIRY_SECS) }

  /// Whether this package was cached under a locally generated id.
  pub fn is_local_only(&self) -> bool { self.id.starts_with(LOCAL_ID_PREFIX) }

  /// The most recent pickup or delivery timestamp this record carries.
  pub fn last_transition_at(&self) -> Option<i64> {
    match (self.pickup_time, self.delivery_time) {
      (Some(p), Some(d)) => Some(p.max(d)),
      (p, d) => p.or(d),
    }
  }

  /// Overwrite the mutable status fields with those asserted by `content`.
  pub fn apply_delivery(&mut self, content: &DeliveryContent) {
    self.status = content.status;
    self.courier_pubkey = content.courier_pubkey.clone();
    self.pickup_time = content.pickup_time;
    self.delivery_time = content.delivery_time;
  }
}

/// Generate an id for a package that could not be published.
pub fn local_package_id() -> String {
  format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

// ─── NewPackage ──────────────────────────────────────────────────────────────

/// Creator input to package creation. Status, identity and timestamps are
/// always assigned by the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPackage {
  pub title:           String,
  #[serde(rename = "pickupLocation")]
  pub pickup_location: String,
  pub destination:     String,
  pub cost:            String,
  #[serde(default)]
  pub description:     Option<String>,
}

impl NewPackage {
  /// Reject input that would produce an event other peers cannot parse.
  pub fn validate(&self) -> Result<()> {
    let required = [
      ("title", &self.title),
      ("pickupLocation", &self.pickup_location),
      ("destination", &self.destination),
      ("cost", &self.cost),
    ];
    for (name, value) in required {
      if value.trim().is_empty() {
        return Err(Error::MissingField(name));
      }
    }
    Ok(())
  }
}

// ─── Delivery updates ────────────────────────────────────────────────────────

/// Content of a delivery-update event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryContent {
  pub package_id:     String,
  pub status:         PackageStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub courier_pubkey: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pickup_time:    Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub delivery_time:  Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub update_id:      Option<String>,
}

impl DeliveryContent {
  /// The status fields a package record currently carries.
  pub fn from_package(pkg: &Package) -> Self {
    Self {
      package_id:     pkg.id.clone(),
      status:         pkg.status,
      courier_pubkey: pkg.courier_pubkey.clone(),
      pickup_time:    pkg.pickup_time,
      delivery_time:  pkg.delivery_time,
      update_id:      None,
    }
  }
}

/// A parsed delivery-update fact: its content plus the envelope fields that
/// order it against other updates for the same package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryUpdate {
  pub event_id:   String,
  pub author:     String,
  pub created_at: i64,
  pub content:    DeliveryContent,
}

impl DeliveryUpdate {
  pub fn package_id(&self) -> &str { &self.content.package_id }

  /// Latest-wins ordering: later `created_at` wins; equal timestamps fall
  /// back to the larger event id so the outcome never depends on arrival
  /// order.
  pub fn supersedes(&self, other: &DeliveryUpdate) -> bool {
    (self.created_at, &self.event_id) > (other.created_at, &other.event_id)
  }
}
