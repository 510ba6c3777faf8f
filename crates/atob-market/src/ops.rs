//! State-transition operations.
//!
//! Each operation writes the local cache first and then broadcasts a fact to
//! the event log. A broadcast that no relay accepts is logged, never rolled
//! back. Signing failures are returned after the local write has landed.

use tracing::{info, warn};

use atob_core::{
  cache::{KvStore, StatusFix},
  facts,
  package::{DeliveryContent, NewPackage, Package, PackageStatus, local_package_id},
  relay::Relay,
  signer::Signer,
};
use atob_relay::{PublishOutcome, accepted};

use crate::{Error, Marketplace, Result};

/// A package as written locally, plus what each relay said about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
  pub package:  Package,
  pub outcomes: Vec<PublishOutcome>,
}

impl Transition {
  fn local(package: Package) -> Self { Self { package, outcomes: Vec::new() } }

  /// Whether any relay accepted the broadcast.
  pub fn replicated(&self) -> bool { accepted(&self.outcomes) > 0 }
}

impl<K: KvStore, R: Relay, G: Signer> Marketplace<K, R, G> {
  /// Publish a new package and cache it.
  ///
  /// The package is cached under its event id when at least one relay
  /// accepts it, otherwise under a `local-` id.
  pub async fn create_package(&self, input: NewPackage) -> Result<Transition> {
    input.validate().map_err(|e| Error::InvalidPackage(e.to_string()))?;
    let now = self.now();
    let mut pkg = Package::new(String::new(), input, self.pubkey().to_owned(), now);

    let draft = facts::creation_draft(&pkg)?;
    let signed = self.signer.sign(draft);
    let outcomes = match &signed {
      Ok(event) => self.log.publish(event).await,
      Err(_) => Vec::new(),
    };

    pkg.id = match &signed {
      Ok(event) if accepted(&outcomes) > 0 => event.id.clone(),
      _ => local_package_id(),
    };
    self.cache.save(pkg.clone()).await?;
    info!(id = %pkg.id, title = %pkg.title, replicated = !pkg.is_local_only(), "package created");

    signed?;
    Ok(Transition { package: pkg, outcomes })
  }

  /// Claim `id` as courier.
  pub async fn pickup_package(&self, id: &str) -> Result<Transition> {
    let pkg = self
      .get_package_by_id(id)
      .await?
      .ok_or_else(|| Error::NotFound(id.to_owned()))?;
    let me = self.pubkey();
    let now = self.now();
    let status = pkg.effective_status(now);

    match pkg.courier_pubkey.as_deref() {
      Some(courier) if courier != me => {
        return Err(Error::AlreadyClaimed { id: id.to_owned(), courier: courier.to_owned() });
      }
      Some(_) if status == PackageStatus::InTransit => return Ok(Transition::local(pkg)),
      _ => {}
    }
    if status != PackageStatus::Available {
      return Err(Error::InvalidTransition { id: id.to_owned(), status, action: "pick up" });
    }

    let picked = self.cache.transition_to_in_transit(id, Some(pkg), now).await?;
    info!(id, courier = me, "package picked up");

    let content = DeliveryContent {
      update_id: Some(uuid::Uuid::new_v4().to_string()),
      ..DeliveryContent::from_package(&picked)
    };
    let outcomes = self.replicate(facts::delivery_draft(&content, now)?).await?;
    Ok(Transition { package: picked, outcomes })
  }

  /// Mark a package this identity is carrying as delivered.
  pub async fn complete_delivery(&self, id: &str) -> Result<Transition> {
    let record = self
      .cache
      .get_delivery(id)
      .await?
      .ok_or_else(|| Error::NotFound(id.to_owned()))?;
    if record.courier_pubkey.as_deref() != Some(self.pubkey()) {
      return Err(Error::NotCourier(id.to_owned()));
    }
    let now = self.now();
    let status = record.effective_status(now);
    if status != PackageStatus::InTransit {
      return Err(Error::InvalidTransition { id: id.to_owned(), status, action: "complete" });
    }

    let delivered = self.cache.transition_to_delivered(id, now).await?;
    info!(id, "delivery completed");
    self.publish_completion(delivered).await
  }

  /// Recipient-side confirmation that `id` arrived.
  ///
  /// Unlike [`complete_delivery`](Self::complete_delivery) the caller need
  /// not be the courier; the package only has to be in transit.
  pub async fn confirm_delivery(&self, id: &str) -> Result<Transition> {
    let pkg = self
      .get_package_by_id(id)
      .await?
      .ok_or_else(|| Error::NotFound(id.to_owned()))?;
    let now = self.now();
    let status = pkg.effective_status(now);
    if status != PackageStatus::InTransit {
      return Err(Error::InvalidTransition { id: id.to_owned(), status, action: "confirm" });
    }

    let delivered = Package {
      status: PackageStatus::Delivered,
      delivery_time: Some(now),
      ..pkg
    };
    self.cache.record_delivery(delivered.clone()).await?;
    self
      .cache
      .apply_fixes(&[StatusFix {
        id:             delivered.id.clone(),
        status:         PackageStatus::Delivered,
        courier_pubkey: delivered.courier_pubkey.clone(),
        pickup_time:    delivered.pickup_time,
        delivery_time:  delivered.delivery_time,
      }])
      .await?;
    info!(id, recipient = self.pubkey(), "delivery confirmed");
    self.publish_completion(delivered).await
  }

  /// Broadcast a delivered update for `pkg`, keeping whatever courier and
  /// pickup data the latest remote update carries, and republish under the
  /// completion policy until some relay accepts.
  async fn publish_completion(&self, pkg: Package) -> Result<Transition> {
    let now = pkg.delivery_time.unwrap_or_else(|| self.now());
    let base = match self.latest_remote_update(&pkg.id).await {
      Some(update) => update.content,
      None => DeliveryContent::from_package(&pkg),
    };
    let content = DeliveryContent {
      package_id:     pkg.id.clone(),
      status:         PackageStatus::Delivered,
      courier_pubkey: base.courier_pubkey.or_else(|| pkg.courier_pubkey.clone()),
      pickup_time:    base.pickup_time.or(pkg.pickup_time),
      delivery_time:  Some(now),
      update_id:      Some(uuid::Uuid::new_v4().to_string()),
    };
    let event = self.signer.sign(facts::delivery_draft(&content, now)?)?;

    let policy = &self.config.completion_retry;
    let attempts = policy.max_attempts.max(1);
    let mut outcomes = Vec::new();
    for attempt in 0..attempts {
      outcomes = self.log.publish(&event).await;
      if accepted(&outcomes) > 0 {
        break;
      }
      warn!(id = %pkg.id, attempt = attempt + 1, "no relay accepted completion");
      if attempt + 1 < attempts {
        tokio::time::sleep(policy.delay_for(attempt)).await;
      }
    }
    Ok(Transition { package: pkg, outcomes })
  }

  /// Withdraw an available package this identity created.
  pub async fn delete_package(&self, id: &str) -> Result<Vec<PublishOutcome>> {
    let pkg = self
      .get_package_by_id(id)
      .await?
      .ok_or_else(|| Error::NotFound(id.to_owned()))?;
    if pkg.pubkey != self.pubkey() {
      return Err(Error::NotCreator(id.to_owned()));
    }
    let status = pkg.effective_status(self.now());
    if status != PackageStatus::Available {
      return Err(Error::InvalidTransition { id: id.to_owned(), status, action: "delete" });
    }

    self.cache.remove(id).await?;
    info!(id, "package deleted");
    if pkg.is_local_only() {
      return Ok(Vec::new());
    }
    self.replicate(facts::deletion_draft(id, self.now())).await
  }
}
