//! Turning log events into domain records.
//!
//! Every function validates the whole shape before constructing anything.
//! A failure describes the one event it was given; callers filtering a page
//! of events simply skip the `Err`s.

use serde_json::{Map, Value};

use crate::{
  ParseError,
  event::{Event, kinds},
  package::{DeliveryContent, DeliveryUpdate, MAX_TIMESTAMP, Package, PackageStatus},
  profile::ProfileMetadata,
};

type Result<T> = std::result::Result<T, ParseError>;

fn expect_kind(event: &Event, expected: u32) -> Result<()> {
  if event.kind != expected {
    return Err(ParseError::WrongKind { expected, found: event.kind });
  }
  Ok(())
}

fn envelope_time(event: &Event) -> Result<i64> {
  if !(0..=MAX_TIMESTAMP).contains(&event.created_at) {
    return Err(ParseError::InvalidTimestamp(event.created_at));
  }
  Ok(event.created_at)
}

fn object(event: &Event) -> Result<Map<String, Value>> {
  let trimmed = event.content.trim();
  if trimmed.is_empty() {
    return Err(ParseError::EmptyContent);
  }
  if !trimmed.starts_with('{') {
    return Err(ParseError::NotJson("content does not start with '{'".into()));
  }
  match serde_json::from_str::<Value>(trimmed) {
    Ok(Value::Object(map)) => Ok(map),
    Ok(_) => Err(ParseError::NotJson("content is not an object".into())),
    Err(e) => Err(ParseError::NotJson(e.to_string())),
  }
}

fn required_str(obj: &Map<String, Value>, field: &'static str) -> Result<String> {
  match obj.get(field) {
    Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
    Some(Value::String(_)) | Some(Value::Null) | None => Err(ParseError::MissingField(field)),
    Some(_) => Err(ParseError::InvalidField { field }),
  }
}

fn optional_str(obj: &Map<String, Value>, field: &'static str) -> Result<Option<String>> {
  match obj.get(field) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) if s.is_empty() => Ok(None),
    Some(Value::String(s)) => Ok(Some(s.clone())),
    Some(_) => Err(ParseError::InvalidField { field }),
  }
}

fn optional_time(obj: &Map<String, Value>, field: &'static str) -> Result<Option<i64>> {
  match obj.get(field) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::Number(n)) => n
      .as_i64()
      .or_else(|| n.as_f64().map(|f| f as i64))
      .map(Some)
      .ok_or(ParseError::InvalidField { field }),
    Some(_) => Err(ParseError::InvalidField { field }),
  }
}

fn status(obj: &Map<String, Value>) -> Result<Option<PackageStatus>> {
  match obj.get("status") {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) => s
      .parse::<PackageStatus>()
      .map(Some)
      .map_err(|_| ParseError::InvalidStatus(s.clone())),
    Some(_) => Err(ParseError::InvalidField { field: "status" }),
  }
}

/// Parse a creation event into a [`Package`].
///
/// Identity, creator and creation time come from the event envelope, never
/// from the content. `cost` may be written as a string or a number.
pub fn parse_package(event: &Event) -> Result<Package> {
  expect_kind(event, kinds::PACKAGE)?;
  let created_at = envelope_time(event)?;
  let obj = object(event)?;

  let title = required_str(&obj, "title")?;
  let pickup_location = required_str(&obj, "pickupLocation")?;
  let destination = required_str(&obj, "destination")?;
  let cost = match obj.get("cost") {
    Some(Value::Number(n)) => n.to_string(),
    _ => required_str(&obj, "cost")?,
  };

  Ok(Package {
    id: event.id.clone(),
    title,
    pickup_location,
    destination,
    cost,
    description: optional_str(&obj, "description")?,
    status: status(&obj)?.unwrap_or_default(),
    pubkey: event.pubkey.clone(),
    created_at,
    courier_pubkey: optional_str(&obj, "courier_pubkey")?,
    pickup_time: optional_time(&obj, "pickup_time")?,
    delivery_time: optional_time(&obj, "delivery_time")?,
  })
}

/// Parse a delivery-update event.
pub fn parse_delivery(event: &Event) -> Result<DeliveryUpdate> {
  expect_kind(event, kinds::DELIVERY)?;
  let created_at = envelope_time(event)?;
  let obj = object(event)?;

  let package_id = required_str(&obj, "package_id")?;
  let status = status(&obj)?.ok_or(ParseError::MissingField("status"))?;

  Ok(DeliveryUpdate {
    event_id:   event.id.clone(),
    author:     event.pubkey.clone(),
    created_at,
    content:    DeliveryContent {
      package_id,
      status,
      courier_pubkey: optional_str(&obj, "courier_pubkey")?,
      pickup_time: optional_time(&obj, "pickup_time")?,
      delivery_time: optional_time(&obj, "delivery_time")?,
      update_id: optional_str(&obj, "update_id")?,
    },
  })
}

/// The event ids a deletion request targets.
pub fn parse_deletion(event: &Event) -> Result<Vec<String>> {
  expect_kind(event, kinds::DELETION)?;
  let targets: Vec<String> = event
    .tag_values("e")
    .filter(|id| !id.is_empty())
    .map(str::to_owned)
    .collect();
  if targets.is_empty() {
    return Err(ParseError::NoDeletionTarget);
  }
  Ok(targets)
}

pub fn parse_metadata(event: &Event) -> Result<ProfileMetadata> {
  expect_kind(event, kinds::METADATA)?;
  let obj = object(event)?;
  serde_json::from_value(Value::Object(obj)).map_err(|e| ParseError::NotJson(e.to_string()))
}
