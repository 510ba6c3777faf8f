//! Profiles and relay diagnostics.

use std::collections::HashSet;

use tracing::{debug, info};

use atob_core::{
  cache::KvStore,
  event::{Filter, kinds},
  facts,
  package::PackageStatus,
  parse,
  profile::{Profile, ProfileMetadata},
  relay::Relay,
  signer::Signer,
};
use atob_relay::{PublishOutcome, RelayStatus};

use crate::{Marketplace, Result, reconcile};

impl<K: KvStore, R: Relay, G: Signer> Marketplace<K, R, G> {
  /// Resolve the profile of `pubkey`, or of this identity when `None`.
  ///
  /// Missing metadata falls back to defaults. The delivery count is the
  /// number of distinct packages whose latest update from this identity
  /// says delivered.
  pub async fn get_profile(&self, pubkey: Option<&str>) -> Result<Profile> {
    let pubkey = pubkey.unwrap_or(self.pubkey());
    let timeout = self.config.query_timeout;

    let metadata_filter = Filter::new().kind(kinds::METADATA).author(pubkey).limit(1);
    let delivery_filter = Filter::new()
      .kind(kinds::DELIVERY)
      .author(pubkey)
      .limit(self.config.refresh_page_size);

    let remote = self
      .within_fallback("profile", async {
        tokio::join!(
          self.log.query_once(&metadata_filter, timeout),
          self.log.query_once(&delivery_filter, timeout),
        )
      })
      .await;
    let (meta_events, delivery_events) = remote.unwrap_or_default();

    let meta = meta_events.iter().find_map(|e| match parse::parse_metadata(e) {
      Ok(meta) => Some(meta),
      Err(err) => {
        debug!(event = %e.id, error = %err, "skipping unparseable metadata");
        None
      }
    });

    let mut delivered: HashSet<String> =
      reconcile::latest_updates(reconcile::parse_updates(&delivery_events))
        .into_values()
        .filter(|u| u.content.status == PackageStatus::Delivered)
        .map(|u| u.content.package_id)
        .collect();
    if pubkey == self.pubkey() {
      let now = self.now();
      delivered.extend(
        self
          .cache
          .list_my_deliveries()
          .await?
          .into_iter()
          .filter(|p| p.effective_status(now) == PackageStatus::Delivered)
          .map(|p| p.id),
      );
    }

    Ok(Profile::resolve(pubkey, meta, delivered.len()))
  }

  /// Publish new profile metadata for this identity.
  pub async fn update_profile(&self, meta: ProfileMetadata) -> Result<Vec<PublishOutcome>> {
    let outcomes = self.replicate(facts::metadata_draft(&meta, self.now())?).await?;
    info!(name = meta.name.as_deref().unwrap_or_default(), "profile updated");
    Ok(outcomes)
  }

  /// Reachability of every configured relay.
  pub async fn relay_status(&self) -> Vec<RelayStatus> { self.log.relay_status().await }
}
