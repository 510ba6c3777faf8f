//! Cache maintenance endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/refresh` | Pull latest statuses from the log |
//! | `POST` | `/verify` | Heal cached statuses without the log |
//! | `GET`  | `/export` | Shared packages collection as JSON |
//! | `POST` | `/import` | Body: exported packages; returns `{"added":n}` |

use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Serialize;

use atob_core::{
  cache::{HealReport, KvStore},
  package::Package,
  relay::Relay,
  signer::Signer,
};
use atob_market::{Marketplace, RefreshReport};

use crate::error::ApiError;

/// `POST /refresh`
pub async fn refresh<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
) -> Result<Json<RefreshReport>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  Ok(Json(market.force_status_refresh().await?))
}

/// `POST /verify`
pub async fn verify<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
) -> Result<Json<HealReport>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  Ok(Json(market.verify_package_statuses().await?))
}

/// `GET /export`
pub async fn export<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
) -> Result<Json<Vec<Package>>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  Ok(Json(market.export_packages().await?))
}

#[derive(Debug, Serialize)]
pub struct Imported {
  pub added: usize,
}

/// `POST /import`
pub async fn import<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
  Json(packages): Json<Vec<Package>>,
) -> Result<Json<Imported>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let added = market.import_packages(packages).await?;
  Ok(Json(Imported { added }))
}
