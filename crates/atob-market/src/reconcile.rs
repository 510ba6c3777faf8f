//! Pure merge rules: turning cached records and log facts into one view.
//!
//! Nothing here performs I/O. The marketplace gathers inputs (cache
//! collections, parsed remote facts), calls into this module, and writes
//! the resulting fixes back.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use atob_core::{
  cache::StatusFix,
  event::Event,
  package::{DeliveryUpdate, Package, PackageStatus},
  parse,
};

// ─── Parsing pages ───────────────────────────────────────────────────────────

/// Parse every creation event, dropping the ones that do not parse.
pub fn parse_packages(events: &[Event]) -> Vec<Package> {
  events
    .iter()
    .filter_map(|e| match parse::parse_package(e) {
      Ok(pkg) => Some(pkg),
      Err(err) => {
        debug!(event = %e.id, error = %err, "skipping unparseable package event");
        None
      }
    })
    .collect()
}

pub fn parse_updates(events: &[Event]) -> Vec<DeliveryUpdate> {
  events
    .iter()
    .filter_map(|e| match parse::parse_delivery(e) {
      Ok(update) => Some(update),
      Err(err) => {
        debug!(event = %e.id, error = %err, "skipping unparseable delivery event");
        None
      }
    })
    .collect()
}

/// A deletion request: who asked, and which creation events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
  pub author:  String,
  pub targets: Vec<String>,
}

pub fn parse_deletions(events: &[Event]) -> Vec<Deletion> {
  events
    .iter()
    .filter_map(|e| {
      parse::parse_deletion(e)
        .map(|targets| Deletion { author: e.pubkey.clone(), targets })
        .ok()
    })
    .collect()
}

/// Facts fetched from the event log for one view.
#[derive(Debug, Clone, Default)]
pub struct RemoteFacts {
  pub packages:  Vec<Package>,
  pub updates:   Vec<DeliveryUpdate>,
  pub deletions: Vec<Deletion>,
}

// ─── Merge steps ─────────────────────────────────────────────────────────────

/// Latest update per package id. Input order does not matter.
pub fn latest_updates(
  updates: impl IntoIterator<Item = DeliveryUpdate>,
) -> HashMap<String, DeliveryUpdate> {
  let mut latest: HashMap<String, DeliveryUpdate> = HashMap::new();
  for update in updates {
    match latest.get(update.package_id()) {
      Some(current) if !update.supersedes(current) => {}
      _ => {
        latest.insert(update.package_id().to_owned(), update);
      }
    }
  }
  latest
}

/// Concatenate sources in priority order, keeping the first record per id.
pub fn union(sources: impl IntoIterator<Item = Vec<Package>>) -> Vec<Package> {
  let mut seen = HashSet::new();
  sources
    .into_iter()
    .flatten()
    .filter(|p| seen.insert(p.id.clone()))
    .collect()
}

/// Overwrite the status fields of `pkg` with `update`, unless `pkg` already
/// records a pickup or delivery newer than the update.
///
/// Returns whether the update was applied.
pub fn apply_update(pkg: &mut Package, update: &DeliveryUpdate) -> bool {
  if pkg.id != update.package_id() {
    return false;
  }
  if pkg.last_transition_at().is_some_and(|t| t > update.created_at) {
    return false;
  }
  pkg.apply_delivery(&update.content);
  true
}

/// Ids whose creation event was deleted by the package's own creator.
pub fn deleted_ids(packages: &[Package], deletions: &[Deletion]) -> HashSet<String> {
  let creators: HashMap<&str, &str> =
    packages.iter().map(|p| (p.id.as_str(), p.pubkey.as_str())).collect();
  deletions
    .iter()
    .flat_map(|d| d.targets.iter().map(move |t| (d.author.as_str(), t.as_str())))
    .filter(|(author, target)| creators.get(target) == Some(author))
    .map(|(_, target)| target.to_owned())
    .collect()
}

/// The full per-view merge.
///
/// 1. union: local deliveries, local packages, remote packages
/// 2. drop packages their creator deleted
/// 3. apply the latest update per id
pub fn merge(
  local_deliveries: Vec<Package>,
  local_packages: Vec<Package>,
  remote: RemoteFacts,
) -> Vec<Package> {
  let mut merged = union([local_deliveries, local_packages, remote.packages]);

  let deleted = deleted_ids(&merged, &remote.deletions);
  if !deleted.is_empty() {
    debug!(count = deleted.len(), "hiding packages deleted by their creator");
    merged.retain(|p| !deleted.contains(&p.id));
  }

  let latest = latest_updates(remote.updates);
  for pkg in &mut merged {
    if let Some(update) = latest.get(&pkg.id) {
      apply_update(pkg, update);
    }
  }
  merged
}

// ─── Healing and visibility ──────────────────────────────────────────────────

/// One fix per package, asserting its derived status. The cache skips
/// records whose stored status already matches.
pub fn healing_fixes(packages: &[Package], now: i64) -> Vec<StatusFix> {
  packages
    .iter()
    .map(|p| StatusFix {
      id:             p.id.clone(),
      status:         p.effective_status(now),
      courier_pubkey: p.courier_pubkey.clone(),
      pickup_time:    p.pickup_time,
      delivery_time:  p.delivery_time,
    })
    .collect()
}

/// The browse view: available packages plus the viewer's own creations and
/// in-flight work.
pub fn market_visible(pkg: &Package, viewer: &str, now: i64) -> bool {
  pkg.effective_status(now) == PackageStatus::Available
    || pkg.pubkey == viewer
    || pkg.courier_pubkey.as_deref() == Some(viewer)
}

/// The courier view: only active deliveries.
pub fn courier_visible(pkg: &Package, viewer: &str, now: i64) -> bool {
  pkg.courier_pubkey.as_deref() == Some(viewer)
    && pkg.effective_status(now) == PackageStatus::InTransit
}

#[cfg(test)]
mod tests {
  use atob_core::{
    event::{EventDraft, kinds},
    package::{DeliveryContent, NewPackage},
  };

  use super::*;

  const NOW: i64 = 1_700_000_000;
  const DAY: i64 = 24 * 60 * 60;

  fn pkg(id: &str, creator: &str, created_at: i64) -> Package {
    Package::new(
      id.into(),
      NewPackage {
        title:           "Books".into(),
        pickup_location: "A St".into(),
        destination:     "B Ave".into(),
        cost:            "5000".into(),
        description:     None,
      },
      creator.into(),
      created_at,
    )
  }

  fn update(
    event_id: &str,
    package_id: &str,
    status: PackageStatus,
    created_at: i64,
  ) -> DeliveryUpdate {
    DeliveryUpdate {
      event_id: event_id.into(),
      author: "k2".into(),
      created_at,
      content: DeliveryContent {
        package_id:     package_id.into(),
        status,
        courier_pubkey: Some("k2".into()),
        pickup_time:    Some(100),
        delivery_time:  (status == PackageStatus::Delivered).then_some(created_at),
        update_id:      None,
      },
    }
  }

  fn remote_updates(updates: Vec<DeliveryUpdate>) -> RemoteFacts {
    RemoteFacts { updates, ..Default::default() }
  }

  #[test]
  fn applying_the_same_update_twice_is_idempotent() {
    let u = update("e1", "p1", PackageStatus::InTransit, 100);
    let mut once = pkg("p1", "k1", NOW - DAY);
    apply_update(&mut once, &u);
    let mut twice = once.clone();
    apply_update(&mut twice, &u);
    assert_eq!(once, twice);

    let merged_once = merge(vec![], vec![pkg("p1", "k1", NOW - DAY)], remote_updates(vec![u.clone()]));
    let merged_twice =
      merge(vec![], vec![pkg("p1", "k1", NOW - DAY)], remote_updates(vec![u.clone(), u]));
    assert_eq!(merged_once, merged_twice);
  }

  #[test]
  fn conflicting_updates_resolve_to_latest_in_any_order() {
    let transit = update("e1", "p1", PackageStatus::InTransit, 100);
    let delivered = update("e2", "p1", PackageStatus::Delivered, 200);

    for order in [
      vec![transit.clone(), delivered.clone()],
      vec![delivered.clone(), transit.clone()],
    ] {
      let merged = merge(vec![], vec![pkg("p1", "k1", NOW - DAY)], remote_updates(order));
      assert_eq!(merged[0].status, PackageStatus::Delivered);
      assert_eq!(merged[0].effective_status(NOW), PackageStatus::Delivered);
    }
  }

  #[test]
  fn equal_timestamps_break_ties_by_event_id() {
    let a = update("aaa", "p1", PackageStatus::InTransit, 100);
    let b = update("bbb", "p1", PackageStatus::Delivered, 100);
    let forward = latest_updates(vec![a.clone(), b.clone()]);
    let backward = latest_updates(vec![b, a]);
    assert_eq!(forward["p1"].event_id, "bbb");
    assert_eq!(backward["p1"].event_id, "bbb");
  }

  #[test]
  fn local_record_wins_on_duplicate_id() {
    let mut local = pkg("p1", "k1", NOW);
    local.title = "Local title".into();
    let remote = RemoteFacts { packages: vec![pkg("p1", "k1", NOW)], ..Default::default() };
    let merged = merge(vec![], vec![local], remote);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].title, "Local title");
  }

  #[test]
  fn delivery_record_wins_over_package_record() {
    let mut delivery = pkg("p1", "k1", NOW);
    delivery.status = PackageStatus::InTransit;
    delivery.pickup_time = Some(NOW);
    let merged = merge(vec![delivery], vec![pkg("p1", "k1", NOW)], RemoteFacts::default());
    assert_eq!(merged[0].status, PackageStatus::InTransit);
  }

  #[test]
  fn stale_update_does_not_regress_local_completion() {
    let mut local = pkg("p1", "k1", NOW - DAY);
    local.status = PackageStatus::Delivered;
    local.pickup_time = Some(100);
    local.delivery_time = Some(300);

    let merged = merge(
      vec![local],
      vec![],
      remote_updates(vec![update("e1", "p1", PackageStatus::InTransit, 100)]),
    );
    assert_eq!(merged[0].status, PackageStatus::Delivered);
    assert_eq!(merged[0].delivery_time, Some(300));
  }

  #[test]
  fn package_without_update_keeps_fields() {
    let merged = merge(
      vec![],
      vec![pkg("p1", "k1", NOW), pkg("p2", "k1", NOW)],
      remote_updates(vec![update("e1", "p2", PackageStatus::InTransit, 100)]),
    );
    assert_eq!(merged[0].status, PackageStatus::Available);
    assert!(merged[0].courier_pubkey.is_none());
    assert_eq!(merged[1].status, PackageStatus::InTransit);
  }

  #[test]
  fn only_creator_deletions_hide_packages() {
    let remote = RemoteFacts {
      packages: vec![pkg("p1", "k1", NOW), pkg("p2", "k1", NOW)],
      deletions: vec![
        Deletion { author: "k1".into(), targets: vec!["p1".into()] },
        Deletion { author: "mallory".into(), targets: vec!["p2".into()] },
      ],
      ..Default::default()
    };
    let ids: Vec<_> = merge(vec![], vec![], remote).into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["p2".to_string()]);
  }

  #[test]
  fn malformed_events_are_skipped_not_fatal() {
    let good = EventDraft::new(
      kinds::PACKAGE,
      NOW,
      r#"{"title":"Books","pickupLocation":"A St","destination":"B Ave","cost":"5000"}"#,
    )
    .into_event("k1".into(), "good".into(), String::new());
    let bad = EventDraft::new(kinds::PACKAGE, NOW, "definitely not json").into_event(
      "k1".into(),
      "bad".into(),
      String::new(),
    );
    let parsed = parse_packages(&[bad.clone(), good, bad]);
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].id, "good");
  }

  #[test]
  fn expired_packages_leave_the_market_view() {
    let old = pkg("p1", "k1", NOW - 31 * DAY);
    assert_eq!(old.effective_status(NOW), PackageStatus::Expired);
    assert!(!market_visible(&old, "k3", NOW));
    // The creator still sees their own package.
    assert!(market_visible(&old, "k1", NOW));
  }

  #[test]
  fn courier_view_is_in_transit_only() {
    let mut p = pkg("p1", "k1", NOW);
    p.courier_pubkey = Some("k2".into());
    p.pickup_time = Some(NOW);
    assert!(courier_visible(&p, "k2", NOW));
    assert!(!courier_visible(&p, "k3", NOW));
    p.delivery_time = Some(NOW + 1);
    assert!(!courier_visible(&p, "k2", NOW));
  }

  #[test]
  fn healing_asserts_derived_status() {
    let mut p = pkg("p1", "k1", NOW - 31 * DAY);
    let fixes = healing_fixes(std::slice::from_ref(&p), NOW);
    assert_eq!(fixes[0].status, PackageStatus::Expired);

    p.pickup_time = Some(NOW - 40 * DAY);
    let fixes = healing_fixes(&[p], NOW);
    assert_eq!(fixes[0].status, PackageStatus::InTransit);
  }
}
