//! BIP-340 schnorr signing and verification of events.

use std::str::FromStr as _;

use secp256k1::{All, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, schnorr};

use atob_core::{
  event::{Event, EventDraft},
  signer::{SignError, Signer},
};

use crate::{Error, Result};

/// A [`Signer`] holding one secp256k1 secret key in memory.
pub struct KeySigner {
  secp:    Secp256k1<All>,
  keypair: Keypair,
  pubkey:  String,
}

impl std::fmt::Debug for KeySigner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("KeySigner").field("pubkey", &self.pubkey).finish_non_exhaustive()
  }
}

impl KeySigner {
  fn from_secret(secret: SecretKey) -> Self {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, &secret);
    let (xonly, _parity) = keypair.x_only_public_key();
    Self { secp, keypair, pubkey: hex::encode(xonly.serialize()) }
  }

  /// A fresh random identity.
  pub fn generate() -> Self {
    Self::from_secret(SecretKey::new(&mut secp256k1::rand::thread_rng()))
  }

  /// Load a 32-byte secret key from hex.
  pub fn from_hex(secret: &str) -> Result<Self> {
    let bytes = hex::decode(secret.trim()).map_err(|e| Error::InvalidKey(e.to_string()))?;
    let secret = SecretKey::from_slice(&bytes).map_err(|e| Error::InvalidKey(e.to_string()))?;
    Ok(Self::from_secret(secret))
  }

  /// The secret key as hex, for persisting a generated identity.
  pub fn secret_hex(&self) -> String { hex::encode(self.keypair.secret_bytes()) }
}

fn digest(id: &str) -> Option<Message> {
  let bytes: [u8; 32] = hex::decode(id).ok()?.try_into().ok()?;
  Some(Message::from_digest(bytes))
}

impl Signer for KeySigner {
  fn pubkey(&self) -> &str { &self.pubkey }

  fn sign(&self, draft: EventDraft) -> Result<Event, SignError> {
    let id = draft.id_for(&self.pubkey);
    let msg = digest(&id).ok_or_else(|| SignError::Failed(format!("bad event id {id}")))?;
    let sig = self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
    Ok(draft.into_event(self.pubkey.clone(), id, sig.to_string()))
  }
}

/// Whether `event`'s id matches its contents and its signature verifies
/// against its pubkey.
pub fn verify_event(event: &Event) -> bool {
  if !event.has_valid_id() {
    return false;
  }
  let (Some(msg), Ok(pubkey), Ok(sig)) = (
    digest(&event.id),
    XOnlyPublicKey::from_str(&event.pubkey),
    schnorr::Signature::from_str(&event.sig),
  ) else {
    return false;
  };
  Secp256k1::verification_only().verify_schnorr(&sig, &msg, &pubkey).is_ok()
}
