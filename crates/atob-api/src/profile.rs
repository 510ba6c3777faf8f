//! Handlers for `/profile` and `/relays`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/profile` | This identity |
//! | `GET`  | `/profile/{pubkey}` | Any identity |
//! | `PUT`  | `/profile` | Body: [`ProfileMetadata`] |
//! | `GET`  | `/relays` | Reachability per relay |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use serde::Serialize;

use atob_core::{
  cache::KvStore,
  profile::{Profile, ProfileMetadata},
  relay::Relay,
  signer::Signer,
};
use atob_market::Marketplace;

use crate::{
  error::ApiError,
  packages::{OutcomeView, outcome_views},
};

/// `GET /profile`
pub async fn mine<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
) -> Result<Json<Profile>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  Ok(Json(market.get_profile(None).await?))
}

/// `GET /profile/{pubkey}`
pub async fn get_one<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
  Path(pubkey): Path<String>,
) -> Result<Json<Profile>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  if pubkey.len() != 64 || !pubkey.bytes().all(|b| b.is_ascii_hexdigit()) {
    return Err(ApiError::BadRequest(format!("not a hex public key: {pubkey}")));
  }
  Ok(Json(market.get_profile(Some(&pubkey)).await?))
}

/// `PUT /profile`
pub async fn update<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
  Json(meta): Json<ProfileMetadata>,
) -> Result<Json<Vec<OutcomeView>>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let outcomes = market.update_profile(meta).await?;
  Ok(Json(outcome_views(outcomes)))
}

#[derive(Debug, Serialize)]
pub struct RelayView {
  pub url:       String,
  pub reachable: bool,
}

/// `GET /relays`
pub async fn relays<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
) -> Json<Vec<RelayView>>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let status = market.relay_status().await;
  Json(
    status
      .into_iter()
      .map(|s| RelayView { url: s.url, reachable: s.reachable })
      .collect(),
  )
}
