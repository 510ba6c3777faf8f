//! Read views: browse, my deliveries, single package, and the refresh sweeps.
//!
//! Every view reads the cache first, then races its event-log reads against
//! `fallback_after`. Reads that miss the deadline count as empty, so when the
//! log is slow or unreachable the view is built from the cache alone under
//! the same rules.

use std::{collections::HashSet, future::Future};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use atob_core::{
  cache::{HealReport, KvStore, StatusFix},
  event::{Filter, kinds},
  package::{DeliveryUpdate, Package},
  parse,
  relay::Relay,
  signer::Signer,
};

use crate::{
  Marketplace, Result,
  reconcile::{self, RemoteFacts},
};

/// Result of a full refresh sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
  /// Package ids known to the cache.
  pub checked: usize,
  /// Of those, how many had at least one update on the log.
  pub updated: usize,
  pub healed:  HealReport,
}

/// Run `leg` until `deadline`, logging when it runs out.
async fn within_deadline<T>(
  deadline: Instant,
  what: &str,
  leg: impl Future<Output = T>,
) -> Option<T> {
  match tokio::time::timeout_at(deadline, leg).await {
    Ok(value) => Some(value),
    Err(_) => {
      warn!(view = what, "event log did not answer in time; using cached data");
      None
    }
  }
}

/// Deletion requests targeting any of `ids`, or `None` when there are none.
fn deletion_filter<'a>(ids: impl IntoIterator<Item = &'a str>) -> Option<Filter> {
  let mut ids = ids.into_iter().peekable();
  ids.peek()?;
  Some(ids.fold(Filter::new().kind(kinds::DELETION), |f, id| f.tag("e", id)))
}

impl<K: KvStore, R: Relay, G: Signer> Marketplace<K, R, G> {
  /// Run `leg` but give up after `fallback_after`.
  pub(crate) async fn within_fallback<T>(
    &self,
    what: &str,
    leg: impl Future<Output = T>,
  ) -> Option<T> {
    within_deadline(Instant::now() + self.config.fallback_after, what, leg).await
  }

  // ── Remote legs ───────────────────────────────────────────────────────

  /// Creation events, recent delivery updates, and deletions for every id
  /// in `known` or on the creation page.
  ///
  /// The three reads run side by side and each is cut off at the fallback
  /// deadline on its own, so a slow or empty creation page never holds back
  /// the updates for packages already cached.
  async fn fetch_market_facts(&self, known: &HashSet<String>) -> RemoteFacts {
    let deadline = Instant::now() + self.config.fallback_after;
    let timeout = self.config.query_timeout;

    let creation_filter = Filter::new().kind(kinds::PACKAGE).limit(self.config.page_size);
    let update_filter = Filter::new().kind(kinds::DELIVERY).limit(self.config.page_size);
    let known_deletions = deletion_filter(known.iter().map(String::as_str));

    let (events, updates, mut deletions) = tokio::join!(
      within_deadline(deadline, "packages", self.log.query(&creation_filter, timeout)),
      within_deadline(deadline, "package updates", self.log.query_once(&update_filter, timeout)),
      async {
        match &known_deletions {
          Some(filter) => {
            within_deadline(deadline, "deletions", self.log.query_once(filter, timeout))
              .await
              .unwrap_or_default()
          }
          None => Vec::new(),
        }
      },
    );
    let packages = reconcile::parse_packages(&events.unwrap_or_default());

    let discovered = packages.iter().map(|p| p.id.as_str()).filter(|id| !known.contains(*id));
    if let Some(filter) = deletion_filter(discovered) {
      let more = within_deadline(deadline, "deletions", self.log.query_once(&filter, timeout)).await;
      deletions.extend(more.unwrap_or_default());
    }

    RemoteFacts {
      updates: reconcile::parse_updates(&updates.unwrap_or_default()),
      deletions: reconcile::parse_deletions(&deletions),
      packages,
    }
  }

  /// Updates authored by this courier, the latest update for each package
  /// they touched, and creation events for packages not cached here.
  ///
  /// Cached ids are looked up alongside the courier's own updates, so they
  /// still refresh when that query comes back empty.
  async fn fetch_courier_facts(&self, cached: &HashSet<String>) -> RemoteFacts {
    let deadline = Instant::now() + self.config.fallback_after;
    let timeout = self.config.query_timeout;

    let mine_filter = Filter::new()
      .kind(kinds::DELIVERY)
      .author(self.pubkey())
      .limit(self.config.page_size);
    let cached_filter = self.updates_filter(cached.iter().map(String::as_str));

    let (mine, mut updates) = tokio::join!(
      within_deadline(deadline, "deliveries", self.log.query(&mine_filter, timeout)),
      async {
        match &cached_filter {
          Some(filter) => {
            within_deadline(deadline, "delivery updates", self.log.query_once(filter, timeout))
              .await
              .unwrap_or_default()
          }
          None => Vec::new(),
        }
      },
    );
    let mine = reconcile::parse_updates(&mine.unwrap_or_default());

    let mut missing: Vec<&str> = Vec::new();
    for update in &mine {
      let id = update.package_id();
      if !cached.contains(id) && !missing.contains(&id) {
        missing.push(id);
      }
    }

    let mut packages = Vec::new();
    if let Some(update_filter) = self.updates_filter(missing.iter().copied()) {
      let package_filter =
        missing.iter().fold(Filter::new().kind(kinds::PACKAGE), |f, id| f.id(*id));
      let (more, found) = tokio::join!(
        within_deadline(deadline, "delivery updates", self.log.query_once(&update_filter, timeout)),
        within_deadline(deadline, "packages", self.log.query_once(&package_filter, timeout)),
      );
      updates.extend(more.unwrap_or_default());
      packages = found.unwrap_or_default();
    }

    let mut all_updates = reconcile::parse_updates(&updates);
    all_updates.extend(mine);
    RemoteFacts {
      packages:  reconcile::parse_packages(&packages),
      updates:   all_updates,
      deletions: Vec::new(),
    }
  }

  /// Delivery updates for any of `ids`, or `None` when there are none.
  fn updates_filter<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Option<Filter> {
    let mut ids = ids.into_iter().peekable();
    ids.peek()?;
    let base = Filter::new().kind(kinds::DELIVERY).limit(self.config.page_size);
    Some(ids.fold(base, |f, id| f.tag("package_id", id)))
  }

  async fn fetch_updates_for(&self, id: &str) -> Vec<DeliveryUpdate> {
    let filter = Filter::new()
      .kind(kinds::DELIVERY)
      .tag("package_id", id)
      .limit(self.config.lookup_limit);
    let events = self.log.query_once(&filter, self.config.query_timeout).await;
    reconcile::parse_updates(&events)
  }

  /// The latest update on the log for `id`, if the log answers in time.
  pub(crate) async fn latest_remote_update(&self, id: &str) -> Option<DeliveryUpdate> {
    let updates = self.within_fallback("latest update", self.fetch_updates_for(id)).await?;
    reconcile::latest_updates(updates).remove(id)
  }

  // ── Views ─────────────────────────────────────────────────────────────

  /// Packages the viewer should see when browsing: everything available,
  /// plus the viewer's own creations and in-flight deliveries.
  pub async fn get_packages(&self) -> Result<Vec<Package>> {
    let local_packages = self.cache.list_packages().await?;
    let local_deliveries = self.cache.list_deliveries().await?;
    let known: HashSet<String> =
      local_packages.iter().chain(&local_deliveries).map(|p| p.id.clone()).collect();

    let remote = self.fetch_market_facts(&known).await;
    debug!(
      local = local_packages.len() + local_deliveries.len(),
      remote = remote.packages.len(),
      updates = remote.updates.len(),
      "merging package view"
    );

    let merged = reconcile::merge(local_deliveries, local_packages, remote);
    self.heal(&merged).await?;

    let (viewer, now) = (self.pubkey(), self.now());
    Ok(merged.into_iter().filter(|p| reconcile::market_visible(p, viewer, now)).collect())
  }

  /// Packages the viewer is currently carrying.
  pub async fn get_my_deliveries(&self) -> Result<Vec<Package>> {
    let local = self.cache.list_my_deliveries().await?;
    let cached: HashSet<String> = local.iter().map(|p| p.id.clone()).collect();

    let remote = self.fetch_courier_facts(&cached).await;

    let merged = reconcile::merge(local, Vec::new(), remote);
    self.heal(&merged).await?;

    let (viewer, now) = (self.pubkey(), self.now());
    Ok(merged.into_iter().filter(|p| reconcile::courier_visible(p, viewer, now)).collect())
  }

  /// One package with its latest known status, from the cache or the log.
  pub async fn get_package_by_id(&self, id: &str) -> Result<Option<Package>> {
    let local = self.cache.get_by_id(id).await?;
    if local.as_ref().is_some_and(Package::is_local_only) {
      return Ok(local);
    }

    let remote = self
      .within_fallback("package", async {
        let base = match &local {
          Some(_) => None,
          None => self
            .log
            .get_by_id(id, self.config.query_timeout)
            .await
            .and_then(|e| parse::parse_package(&e).ok()),
        };
        (base, self.fetch_updates_for(id).await)
      })
      .await;

    let (remote_base, updates) = remote.unwrap_or_default();
    let Some(mut pkg) = local.or(remote_base) else {
      return Ok(None);
    };
    if let Some(update) = reconcile::latest_updates(updates).get(id) {
      reconcile::apply_update(&mut pkg, update);
    }
    self.heal(std::slice::from_ref(&pkg)).await?;
    Ok(Some(pkg))
  }

  /// Authoritative sweep: for every cached package id, take the latest
  /// update on the whole log and overwrite the cached status where it
  /// differs.
  pub async fn force_status_refresh(&self) -> Result<RefreshReport> {
    let packages = self.cache.list_all_packages().await?;
    let deliveries = self.cache.list_deliveries().await?;
    let ids: HashSet<String> = packages.iter().chain(&deliveries).map(|p| p.id.clone()).collect();
    if ids.is_empty() {
      return Ok(RefreshReport::default());
    }

    let events = self
      .log
      .query(
        &Filter::new().kind(kinds::DELIVERY).limit(self.config.refresh_page_size),
        self.config.query_timeout,
      )
      .await;
    let latest = reconcile::latest_updates(reconcile::parse_updates(&events));

    let fixes: Vec<StatusFix> = latest
      .values()
      .filter(|u| ids.contains(u.package_id()))
      .map(|u| StatusFix {
        id:             u.package_id().to_owned(),
        status:         u.content.status,
        courier_pubkey: u.content.courier_pubkey.clone(),
        pickup_time:    u.content.pickup_time,
        delivery_time:  u.content.delivery_time,
      })
      .collect();
    let healed = self.cache.apply_fixes(&fixes).await?;

    let report = RefreshReport { checked: ids.len(), updated: fixes.len(), healed };
    info!(
      checked = report.checked,
      updated = report.updated,
      healed = healed.total(),
      "status refresh finished"
    );
    Ok(report)
  }

  /// Heal every cached package to its derived status, without the log.
  pub async fn verify_package_statuses(&self) -> Result<HealReport> {
    let packages = self.cache.list_all_packages().await?;
    let deliveries = self.cache.list_deliveries().await?;
    let all = reconcile::union([deliveries, packages]);
    self.heal(&all).await
  }

  /// The shared packages collection, for moving to another cache.
  pub async fn export_packages(&self) -> Result<Vec<Package>> {
    Ok(self.cache.list_all_packages().await?)
  }

  /// Add exported packages whose ids this cache has not seen.
  pub async fn import_packages(&self, packages: Vec<Package>) -> Result<usize> {
    let added = self.cache.import_packages(packages).await?;
    info!(added, "imported packages");
    Ok(added)
  }
}
