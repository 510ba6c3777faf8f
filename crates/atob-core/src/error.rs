//! Error types for `atob-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("package not found: {0}")]
  PackageNotFound(String),

  #[error("missing required field: {0}")]
  MissingField(&'static str),

  #[error("storage error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a single event from the log could not be turned into a domain record.
///
/// Parse failures are per-event: callers drop the offending event and carry
/// on with the rest of the page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
  #[error("event kind {found} is not {expected}")]
  WrongKind { expected: u32, found: u32 },

  #[error("event content is empty")]
  EmptyContent,

  #[error("event content is not a JSON object: {0}")]
  NotJson(String),

  #[error("missing or empty field: {0}")]
  MissingField(&'static str),

  #[error("field {field} has the wrong type")]
  InvalidField { field: &'static str },

  #[error("unknown package status: {0:?}")]
  InvalidStatus(String),

  #[error("event timestamp {0} is out of range")]
  InvalidTimestamp(i64),

  #[error("deletion event references no event id")]
  NoDeletionTarget,
}
