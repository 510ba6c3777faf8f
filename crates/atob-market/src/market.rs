//! The [`Marketplace`] handle shared by the read views and the operations.

use std::sync::Arc;

use tracing::{info, warn};

use atob_core::{
  cache::{HealReport, KvStore, LocalCache},
  clock::Clock,
  event::EventDraft,
  package::{Package, PackageStatus},
  relay::Relay,
  signer::Signer,
};
use atob_relay::{EventLogClient, EventLogConfig, PublishOutcome, accepted};

use crate::{MarketConfig, Result, reconcile};

/// One identity's view of the marketplace: its local cache, the shared
/// event log, and the key it signs with.
pub struct Marketplace<K, R, G> {
  pub(crate) cache:  LocalCache<K>,
  pub(crate) log:    EventLogClient<R>,
  pub(crate) signer: G,
  pub(crate) clock:  Arc<dyn Clock>,
  pub(crate) config: MarketConfig,
}

impl<K: KvStore, R: Relay, G: Signer> Marketplace<K, R, G> {
  /// The cache is scoped to `signer`'s public key.
  pub fn new(
    kv: K,
    log: EventLogClient<R>,
    signer: G,
    clock: Arc<dyn Clock>,
    config: MarketConfig,
  ) -> Self {
    let cache = LocalCache::new(kv, signer.pubkey());
    Self { cache, log, signer, clock, config }
  }

  /// Build the event-log client too. Fails if `relays` is empty.
  pub fn with_relays(
    kv: K,
    relays: Vec<R>,
    log_config: EventLogConfig,
    signer: G,
    clock: Arc<dyn Clock>,
    config: MarketConfig,
  ) -> Result<Self> {
    let log = EventLogClient::new(relays, log_config)?;
    Ok(Self::new(kv, log, signer, clock, config))
  }

  /// The acting identity.
  pub fn pubkey(&self) -> &str { self.signer.pubkey() }

  pub fn cache(&self) -> &LocalCache<K> { &self.cache }

  pub fn log(&self) -> &EventLogClient<R> { &self.log }

  pub fn config(&self) -> &MarketConfig { &self.config }

  pub fn now(&self) -> i64 { self.clock.now() }

  /// The status `pkg` should be shown with right now.
  pub fn get_effective_status(&self, pkg: &Package) -> PackageStatus {
    pkg.effective_status(self.now())
  }

  /// Write derived statuses of `merged` back into the cache.
  pub(crate) async fn heal(&self, merged: &[Package]) -> Result<HealReport> {
    let fixes = reconcile::healing_fixes(merged, self.now());
    let report = self.cache.apply_fixes(&fixes).await?;
    if report.total() > 0 {
      info!(
        packages = report.packages,
        deliveries = report.deliveries,
        "healed cached package statuses"
      );
    }
    Ok(report)
  }

  /// Sign `draft` and broadcast it once. Signing failures propagate; relay
  /// failures only show up in the outcomes.
  pub(crate) async fn replicate(&self, draft: EventDraft) -> Result<Vec<PublishOutcome>> {
    let event = self.signer.sign(draft)?;
    let outcomes = self.log.publish(&event).await;
    if accepted(&outcomes) == 0 {
      warn!(event = %event.id, kind = event.kind, "no relay accepted event; kept locally only");
    }
    Ok(outcomes)
  }
}
