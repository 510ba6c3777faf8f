//! Event signing.

use thiserror::Error;

use crate::event::{Event, EventDraft};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignError {
  #[error("no signing key available")]
  NoKey,

  #[error("signing failed: {0}")]
  Failed(String),
}

/// Holds the acting identity's key and signs drafts with it.
pub trait Signer: Send + Sync {
  /// Hex x-only public key of the acting identity.
  fn pubkey(&self) -> &str;

  /// Stamp `draft` with the pubkey, id and signature.
  fn sign(&self, draft: EventDraft) -> Result<Event, SignError>;
}
