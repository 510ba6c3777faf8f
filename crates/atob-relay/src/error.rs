//! Error type for `atob-relay`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The client was built with an empty endpoint set.
  #[error("no relays configured")]
  NoRelays,

  #[error("invalid secret key: {0}")]
  InvalidKey(String),

  #[error(transparent)]
  Sign(#[from] atob_core::signer::SignError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
