//! Handlers for `/packages` and `/deliveries` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/packages` | Browse view |
//! | `POST`   | `/packages` | Body: [`NewPackage`]; returns 201 |
//! | `GET`    | `/packages/{id}` | 404 if neither cache nor log knows it |
//! | `POST`   | `/packages/{id}/pickup` | Claim as courier |
//! | `POST`   | `/packages/{id}/complete` | Courier marks delivered |
//! | `POST`   | `/packages/{id}/confirm` | Recipient marks delivered |
//! | `DELETE` | `/packages/{id}` | Creator withdraws an available package |
//! | `GET`    | `/deliveries` | Packages this identity is carrying |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Serialize;

use atob_core::{
  cache::KvStore,
  package::{NewPackage, Package, PackageStatus},
  relay::Relay,
  signer::Signer,
};
use atob_market::{Marketplace, Transition};
use atob_relay::PublishOutcome;

use crate::error::ApiError;

// ─── Response bodies ─────────────────────────────────────────────────────────

/// A package as stored, plus the status it should be shown with.
#[derive(Debug, Serialize)]
pub struct PackageView {
  #[serde(flatten)]
  pub package:          Package,
  pub effective_status: PackageStatus,
  pub expires_at:       i64,
}

impl PackageView {
  pub fn new(package: Package, now: i64) -> Self {
    Self {
      effective_status: package.effective_status(now),
      expires_at: package.expires_at(),
      package,
    }
  }
}

/// What one relay said about a broadcast.
#[derive(Debug, Serialize)]
pub struct OutcomeView {
  pub relay:  String,
  pub ok:     bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

impl From<PublishOutcome> for OutcomeView {
  fn from(o: PublishOutcome) -> Self {
    Self { ok: o.is_ok(), relay: o.relay, reason: o.failed }
  }
}

pub fn outcome_views(outcomes: Vec<PublishOutcome>) -> Vec<OutcomeView> {
  outcomes.into_iter().map(OutcomeView::from).collect()
}

#[derive(Debug, Serialize)]
pub struct TransitionView {
  pub package:    PackageView,
  pub replicated: bool,
  pub relays:     Vec<OutcomeView>,
}

impl TransitionView {
  fn new(t: Transition, now: i64) -> Self {
    Self {
      replicated: t.replicated(),
      package:    PackageView::new(t.package, now),
      relays:     outcome_views(t.outcomes),
    }
  }
}

fn views<K, R, G>(market: &Marketplace<K, R, G>, packages: Vec<Package>) -> Vec<PackageView>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let now = market.now();
  packages.into_iter().map(|p| PackageView::new(p, now)).collect()
}

// ─── Views ───────────────────────────────────────────────────────────────────

/// `GET /packages`
pub async fn list<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
) -> Result<Json<Vec<PackageView>>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let packages = market.get_packages().await?;
  Ok(Json(views(&market, packages)))
}

/// `GET /deliveries`
pub async fn deliveries<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
) -> Result<Json<Vec<PackageView>>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let packages = market.get_my_deliveries().await?;
  Ok(Json(views(&market, packages)))
}

/// `GET /packages/{id}`
pub async fn get_one<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
  Path(id): Path<String>,
) -> Result<Json<PackageView>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let package = market
    .get_package_by_id(&id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("package {id} not found")))?;
  Ok(Json(PackageView::new(package, market.now())))
}

// ─── Transitions ─────────────────────────────────────────────────────────────

/// `POST /packages`
pub async fn create<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
  Json(body): Json<NewPackage>,
) -> Result<impl IntoResponse, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let created = market.create_package(body).await?;
  Ok((StatusCode::CREATED, Json(TransitionView::new(created, market.now()))))
}

/// `POST /packages/{id}/pickup`
pub async fn pickup<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
  Path(id): Path<String>,
) -> Result<Json<TransitionView>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let picked = market.pickup_package(&id).await?;
  Ok(Json(TransitionView::new(picked, market.now())))
}

/// `POST /packages/{id}/complete`
pub async fn complete<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
  Path(id): Path<String>,
) -> Result<Json<TransitionView>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let done = market.complete_delivery(&id).await?;
  Ok(Json(TransitionView::new(done, market.now())))
}

/// `POST /packages/{id}/confirm`
pub async fn confirm<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
  Path(id): Path<String>,
) -> Result<Json<TransitionView>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let done = market.confirm_delivery(&id).await?;
  Ok(Json(TransitionView::new(done, market.now())))
}

/// `DELETE /packages/{id}`
pub async fn delete<K, R, G>(
  State(market): State<Arc<Marketplace<K, R, G>>>,
  Path(id): Path<String>,
) -> Result<Json<Vec<OutcomeView>>, ApiError>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  let outcomes = market.delete_package(&id).await?;
  Ok(Json(outcome_views(outcomes)))
}
