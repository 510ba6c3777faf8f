//! The `Relay` trait: one event-log endpoint.
//!
//! Implemented by the WebSocket transport and by an in-memory fake in
//! `atob-relay`. The multi-endpoint client is built on top of this.

use std::{future::Future, time::Duration};

use thiserror::Error;

use crate::event::{Event, Filter};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
  #[error("could not connect to {url}: {reason}")]
  Connect { url: String, reason: String },

  #[error("relay {0} timed out")]
  Timeout(String),

  #[error("relay {url} rejected event: {reason}")]
  Rejected { url: String, reason: String },

  #[error("relay {url} protocol error: {reason}")]
  Protocol { url: String, reason: String },
}

/// A single event-log endpoint.
pub trait Relay: Send + Sync {
  fn url(&self) -> &str;

  /// Send `event` and wait for the endpoint's acknowledgement.
  fn publish<'a>(
    &'a self,
    event: &'a Event,
    timeout: Duration,
  ) -> impl Future<Output = Result<(), RelayError>> + Send + 'a;

  /// Collect stored events matching `filter`. Events received before
  /// `timeout` elapses are returned even if the endpoint never signalled the
  /// end of stored events.
  fn query<'a>(
    &'a self,
    filter: &'a Filter,
    timeout: Duration,
  ) -> impl Future<Output = Result<Vec<Event>, RelayError>> + Send + 'a;

  /// Check that the endpoint is reachable.
  fn ping(&self, timeout: Duration) -> impl Future<Output = Result<(), RelayError>> + Send + '_;
}
