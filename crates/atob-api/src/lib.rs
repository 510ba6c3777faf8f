//! JSON REST API for A to ₿.
//!
//! Exposes an axum [`Router`] backed by one [`Marketplace`]: one identity,
//! its cache and its relays. Auth and TLS are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", atob_api::api_router(market.clone()))
//! ```

pub mod error;
pub mod packages;
pub mod profile;
pub mod sync;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use tower_http::trace::TraceLayer;

use atob_core::{cache::KvStore, relay::Relay, signer::Signer};
use atob_market::Marketplace;

pub use error::ApiError;

/// Build a fully-materialised API router for `market`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<K, R, G>(market: Arc<Marketplace<K, R, G>>) -> Router<()>
where
  K: KvStore + 'static,
  R: Relay + 'static,
  G: Signer + 'static,
{
  Router::new()
    // Packages
    .route(
      "/packages",
      get(packages::list::<K, R, G>).post(packages::create::<K, R, G>),
    )
    .route(
      "/packages/{id}",
      get(packages::get_one::<K, R, G>).delete(packages::delete::<K, R, G>),
    )
    .route("/packages/{id}/pickup", post(packages::pickup::<K, R, G>))
    .route("/packages/{id}/complete", post(packages::complete::<K, R, G>))
    .route("/packages/{id}/confirm", post(packages::confirm::<K, R, G>))
    .route("/deliveries", get(packages::deliveries::<K, R, G>))
    // Cache maintenance
    .route("/refresh", post(sync::refresh::<K, R, G>))
    .route("/verify", post(sync::verify::<K, R, G>))
    .route("/export", get(sync::export::<K, R, G>))
    .route("/import", post(sync::import::<K, R, G>))
    // Profiles and relays
    .route("/profile", get(profile::mine::<K, R, G>).put(profile::update::<K, R, G>))
    .route("/profile/{pubkey}", get(profile::get_one::<K, R, G>))
    .route("/relays", get(profile::relays::<K, R, G>))
    .layer(TraceLayer::new_for_http())
    .with_state(market)
}

#[cfg(test)]
mod tests {
  use super::*;

  use atob_core::{cache::MemoryKv, clock::ManualClock};
  use atob_market::MarketConfig;
  use atob_relay::{EventLogClient, EventLogConfig, KeySigner, MemoryRelay};
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  type TestMarket = Marketplace<MemoryKv, MemoryRelay, KeySigner>;

  fn market(relay: &MemoryRelay) -> Arc<TestMarket> {
    let log = EventLogClient::new(vec![relay.clone()], EventLogConfig::default()).unwrap();
    Arc::new(Marketplace::new(
      MemoryKv::new(),
      log,
      KeySigner::generate(),
      Arc::new(ManualClock::new(1_700_000_000)),
      MarketConfig::default(),
    ))
  }

  async fn call(
    market: &Arc<TestMarket>,
    method: &str,
    uri: &str,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(v) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    let resp = api_router(market.clone())
      .oneshot(builder.body(body).unwrap())
      .await
      .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
  }

  fn books() -> Value {
    json!({
      "title": "Books",
      "pickupLocation": "12 A Street",
      "destination": "34 B Avenue",
      "cost": "5000",
    })
  }

  // ── Packages ────────────────────────────────────────────────────────────────

  #[tokio::test(start_paused = true)]
  async fn create_returns_201_and_lists() {
    let relay = MemoryRelay::new("mem://log");
    let m = market(&relay);

    let (status, body) = call(&m, "POST", "/packages", Some(books())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["replicated"], true);
    assert_eq!(body["package"]["effective_status"], "available");
    assert_eq!(body["package"]["pickupLocation"], "12 A Street");
    let id = body["package"]["id"].as_str().unwrap().to_owned();

    let (status, body) = call(&m, "GET", "/packages", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(&m, "GET", &format!("/packages/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Books");
  }

  #[tokio::test(start_paused = true)]
  async fn missing_fields_are_rejected() {
    let relay = MemoryRelay::new("mem://log");
    let m = market(&relay);
    let mut input = books();
    input["title"] = json!("");
    let (status, body) = call(&m, "POST", "/packages", Some(input)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("title"));
  }

  #[tokio::test(start_paused = true)]
  async fn unknown_package_is_404() {
    let relay = MemoryRelay::new("mem://log");
    let m = market(&relay);
    let (status, body) = call(&m, "GET", "/packages/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
  }

  #[tokio::test(start_paused = true)]
  async fn transitions_map_to_status_codes() {
    let relay = MemoryRelay::new("mem://log");
    let creator = market(&relay);
    let courier = market(&relay);

    let (_, body) = call(&creator, "POST", "/packages", Some(books())).await;
    let id = body["package"]["id"].as_str().unwrap().to_owned();

    let (status, _) = call(&courier, "DELETE", &format!("/packages/{id}"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&courier, "POST", &format!("/packages/{id}/pickup"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["package"]["effective_status"], "in_transit");

    let (status, _) = call(&creator, "DELETE", &format!("/packages/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&courier, "GET", "/deliveries", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(&courier, "POST", &format!("/packages/{id}/complete"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["package"]["effective_status"], "delivered");
  }

  // ── Profiles, relays, maintenance ───────────────────────────────────────────

  #[tokio::test(start_paused = true)]
  async fn profile_and_relays() {
    let relay = MemoryRelay::new("mem://log");
    let m = market(&relay);

    let (status, body) = call(&m, "GET", "/profile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "atob_user");

    let (status, _) = call(&m, "PUT", "/profile", Some(json!({ "name": "ada" }))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&m, "GET", &format!("/profile/{}", m.pubkey()), None).await;
    assert_eq!(body["name"], "ada");

    let (status, _) = call(&m, "GET", "/profile/xyz", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&m, "GET", "/relays", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["reachable"], true);
  }

  #[tokio::test(start_paused = true)]
  async fn export_import_and_refresh() {
    let relay = MemoryRelay::new("mem://log");
    let source = market(&relay);
    call(&source, "POST", "/packages", Some(books())).await;

    let (status, exported) = call(&source, "GET", "/export", None).await;
    assert_eq!(status, StatusCode::OK);

    let target = market(&relay);
    let (status, body) = call(&target, "POST", "/import", Some(exported)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 1);

    let (status, body) = call(&target, "POST", "/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checked"], 1);

    let (status, body) = call(&target, "POST", "/verify", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["packages"], 0);
  }
}
