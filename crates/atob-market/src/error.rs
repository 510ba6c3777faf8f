//! Error type for `atob-market`.

use thiserror::Error;

use atob_core::{package::PackageStatus, signer::SignError};

#[derive(Debug, Error)]
pub enum Error {
  #[error("package not found: {0}")]
  NotFound(String),

  #[error("package {id} is already claimed by {courier}")]
  AlreadyClaimed { id: String, courier: String },

  #[error("cannot {action} package {id} while it is {status}")]
  InvalidTransition {
    id:     String,
    status: PackageStatus,
    action: &'static str,
  },

  #[error("only the creator may delete package {0}")]
  NotCreator(String),

  #[error("only the assigned courier may complete package {0}")]
  NotCourier(String),

  #[error("invalid package: {0}")]
  InvalidPackage(String),

  #[error("signing failed: {0}")]
  Signing(#[from] SignError),

  #[error("no relays configured")]
  NoRelays,

  #[error("cache error: {0}")]
  Cache(#[from] atob_core::Error),
}

impl From<atob_relay::Error> for Error {
  fn from(e: atob_relay::Error) -> Self {
    match e {
      atob_relay::Error::NoRelays => Self::NoRelays,
      atob_relay::Error::Sign(e) => Self::Signing(e),
      atob_relay::Error::InvalidKey(reason) => Self::Signing(SignError::Failed(reason)),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
