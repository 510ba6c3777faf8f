//! The local cache: two JSON collections of packages over a key-value store.
//!
//! The **packages** collection holds what this identity should see as ambient
//! (its own creations, imported and reconciled packages). The **deliveries**
//! collection holds every package picked up through this cache, whoever the
//! courier was.
//!
//! Each collection is one JSON array under a fixed key, shadowed by a backup
//! key. Every read restores the primary from the backup when the primary is
//! empty or unreadable, and copies a good primary over the backup afterwards.

use std::{
  collections::{HashMap, HashSet},
  convert::Infallible,
  future::Future,
  sync::Mutex,
};

use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  package::{Package, PackageStatus},
};

pub const PACKAGES_KEY: &str = "shared_packages_v1";
pub const PACKAGES_BACKUP_KEY: &str = "shared_packages_backup_v1";
pub const DELIVERIES_KEY: &str = "my_deliveries_v2";
pub const DELIVERIES_BACKUP_KEY: &str = "my_deliveries_backup_v2";

/// Key under which the binary persists a generated identity key.
pub const SECRET_KEY_KEY: &str = "nostr_private_key";

// ─── KvStore ─────────────────────────────────────────────────────────────────

/// Durable string key-value storage.
///
/// Backends: `atob-store-sqlite::SqliteKv` and [`MemoryKv`].
pub trait KvStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get(
    &self,
    key: String,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  fn set(
    &self,
    key: String,
    value: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn remove(&self, key: String) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

/// In-process [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryKv {
  entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
  pub fn new() -> Self { Self::default() }

  fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> T {
    let mut guard = match self.entries.lock() {
      Ok(g) => g,
      Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard)
  }
}

impl KvStore for MemoryKv {
  type Error = Infallible;

  async fn get(&self, key: String) -> Result<Option<String>, Infallible> {
    Ok(self.with(|m| m.get(&key).cloned()))
  }

  async fn set(&self, key: String, value: String) -> Result<(), Infallible> {
    self.with(|m| m.insert(key, value));
    Ok(())
  }

  async fn remove(&self, key: String) -> Result<(), Infallible> {
    self.with(|m| m.remove(&key));
    Ok(())
  }
}

fn store_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> Error {
  Error::Store(Box::new(e))
}

// ─── Collections ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
  Packages,
  Deliveries,
}

impl Collection {
  fn key(self) -> &'static str {
    match self {
      Self::Packages => PACKAGES_KEY,
      Self::Deliveries => DELIVERIES_KEY,
    }
  }

  fn backup_key(self) -> &'static str {
    match self {
      Self::Packages => PACKAGES_BACKUP_KEY,
      Self::Deliveries => DELIVERIES_BACKUP_KEY,
    }
  }
}

/// A status correction to write into every collection holding `id`.
///
/// `None` fields leave the cached value untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFix {
  pub id:             String,
  pub status:         PackageStatus,
  pub courier_pubkey: Option<String>,
  pub pickup_time:    Option<i64>,
  pub delivery_time:  Option<i64>,
}

impl StatusFix {
  fn apply(&self, pkg: &mut Package) -> bool {
    if pkg.status == self.status {
      return false;
    }
    pkg.status = self.status;
    if let Some(courier) = &self.courier_pubkey {
      pkg.courier_pubkey = Some(courier.clone());
    }
    if let Some(t) = self.pickup_time {
      pkg.pickup_time = Some(t);
    }
    if let Some(t) = self.delivery_time {
      pkg.delivery_time = Some(t);
    }
    true
  }
}

/// How many cached records a healing pass rewrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HealReport {
  pub packages:   usize,
  pub deliveries: usize,
}

impl HealReport {
  pub fn total(&self) -> usize { self.packages + self.deliveries }
}

// ─── LocalCache ──────────────────────────────────────────────────────────────

/// Identity-scoped package cache.
///
/// Read-modify-write sequences are serialised by an internal lock so that
/// concurrent operations in one process never lose each other's writes.
pub struct LocalCache<K> {
  kv:         K,
  owner:      String,
  write_lock: tokio::sync::Mutex<()>,
}

impl<K: KvStore> LocalCache<K> {
  /// A cache acting on behalf of `owner` (a hex pubkey).
  pub fn new(kv: K, owner: impl Into<String>) -> Self {
    Self { kv, owner: owner.into(), write_lock: tokio::sync::Mutex::new(()) }
  }

  pub fn owner(&self) -> &str { &self.owner }

  pub fn kv(&self) -> &K { &self.kv }

  // ── Raw collection access ─────────────────────────────────────────────

  async fn read_backup(&self, col: Collection) -> Result<Option<(String, Vec<Package>)>> {
    let Some(raw) = self.kv.get(col.backup_key().to_owned()).await.map_err(store_err)? else {
      return Ok(None);
    };
    match serde_json::from_str::<Vec<Package>>(&raw) {
      Ok(list) => Ok(Some((raw, list))),
      Err(e) => {
        warn!(key = col.backup_key(), error = %e, "cache backup is unreadable");
        Ok(None)
      }
    }
  }

  async fn read(&self, col: Collection) -> Result<Vec<Package>> {
    let primary = self.kv.get(col.key().to_owned()).await.map_err(store_err)?;

    let parsed = match primary.as_deref() {
      Some(raw) if !raw.trim().is_empty() => match serde_json::from_str::<Vec<Package>>(raw) {
        Ok(list) => Some(list),
        Err(e) => {
          warn!(key = col.key(), error = %e, "cache collection is unreadable");
          None
        }
      },
      _ => None,
    };

    match (parsed, primary) {
      (Some(list), Some(raw)) => {
        self.kv.set(col.backup_key().to_owned(), raw).await.map_err(store_err)?;
        Ok(list)
      }
      _ => match self.read_backup(col).await? {
        Some((raw, list)) => {
          info!(key = col.key(), count = list.len(), "restored cache collection from backup");
          self.kv.set(col.key().to_owned(), raw).await.map_err(store_err)?;
          Ok(list)
        }
        None => Ok(Vec::new()),
      },
    }
  }

  async fn write(&self, col: Collection, list: &[Package]) -> Result<()> {
    let raw = serde_json::to_string(list)?;
    self.kv.set(col.key().to_owned(), raw).await.map_err(store_err)?;
    debug!(key = col.key(), count = list.len(), "cache collection written");
    Ok(())
  }

  fn upsert(list: &mut Vec<Package>, pkg: Package) {
    match list.iter_mut().find(|p| p.id == pkg.id) {
      Some(slot) => *slot = pkg,
      None => list.push(pkg),
    }
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  /// The packages collection minus anything this identity has picked up.
  pub async fn list_packages(&self) -> Result<Vec<Package>> {
    let mine: HashSet<String> =
      self.list_my_deliveries().await?.into_iter().map(|p| p.id).collect();
    let mut packages = self.read(Collection::Packages).await?;
    packages.retain(|p| !mine.contains(&p.id));
    Ok(packages)
  }

  /// The packages collection as stored.
  pub async fn list_all_packages(&self) -> Result<Vec<Package>> {
    self.read(Collection::Packages).await
  }

  /// Every delivery record, whoever the courier.
  pub async fn list_deliveries(&self) -> Result<Vec<Package>> {
    self.read(Collection::Deliveries).await
  }

  /// Delivery records where this identity is the courier.
  pub async fn list_my_deliveries(&self) -> Result<Vec<Package>> {
    let mut deliveries = self.read(Collection::Deliveries).await?;
    deliveries.retain(|p| p.courier_pubkey.as_deref() == Some(self.owner.as_str()));
    Ok(deliveries)
  }

  /// The delivery record for `id`, if this cache holds one.
  pub async fn get_delivery(&self, id: &str) -> Result<Option<Package>> {
    Ok(self.read(Collection::Deliveries).await?.into_iter().find(|p| p.id == id))
  }

  /// Look up `id`, preferring the delivery record.
  pub async fn get_by_id(&self, id: &str) -> Result<Option<Package>> {
    if let Some(pkg) = self.read(Collection::Deliveries).await?.into_iter().find(|p| p.id == id) {
      return Ok(Some(pkg));
    }
    Ok(self.read(Collection::Packages).await?.into_iter().find(|p| p.id == id))
  }

  // ── Writes ────────────────────────────────────────────────────────────

  /// Insert or replace `pkg` in the packages collection.
  pub async fn save(&self, pkg: Package) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    let mut packages = self.read(Collection::Packages).await?;
    Self::upsert(&mut packages, pkg);
    self.write(Collection::Packages, &packages).await
  }

  /// Insert or replace `pkg` in the deliveries collection.
  pub async fn record_delivery(&self, pkg: Package) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    let mut deliveries = self.read(Collection::Deliveries).await?;
    Self::upsert(&mut deliveries, pkg);
    self.write(Collection::Deliveries, &deliveries).await
  }

  /// Remove `id` from both collections. Returns whether anything was removed.
  pub async fn remove(&self, id: &str) -> Result<bool> {
    let _guard = self.write_lock.lock().await;
    let mut removed = false;
    for col in [Collection::Packages, Collection::Deliveries] {
      let mut list = self.read(col).await?;
      let before = list.len();
      list.retain(|p| p.id != id);
      if list.len() != before {
        removed = true;
        self.write(col, &list).await?;
      }
    }
    Ok(removed)
  }

  /// Move `id` into the deliveries collection as in transit with this
  /// identity as courier.
  ///
  /// The record is taken from the cache if present, otherwise from
  /// `supplemental` (typically the package as resolved from the event log).
  pub async fn transition_to_in_transit(
    &self,
    id: &str,
    supplemental: Option<Package>,
    at: i64,
  ) -> Result<Package> {
    let _guard = self.write_lock.lock().await;
    let mut packages = self.read(Collection::Packages).await?;
    let mut deliveries = self.read(Collection::Deliveries).await?;

    let base = deliveries
      .iter()
      .find(|p| p.id == id)
      .or_else(|| packages.iter().find(|p| p.id == id))
      .cloned()
      .or(supplemental)
      .ok_or_else(|| Error::PackageNotFound(id.to_owned()))?;

    let pkg = Package {
      status: PackageStatus::InTransit,
      courier_pubkey: Some(self.owner.clone()),
      pickup_time: Some(at),
      delivery_time: None,
      ..base
    };

    let before = packages.len();
    packages.retain(|p| p.id != id);
    if packages.len() != before {
      self.write(Collection::Packages, &packages).await?;
    }
    Self::upsert(&mut deliveries, pkg.clone());
    self.write(Collection::Deliveries, &deliveries).await?;
    Ok(pkg)
  }

  /// Mark the delivery record for `id` delivered at `at`.
  pub async fn transition_to_delivered(&self, id: &str, at: i64) -> Result<Package> {
    let _guard = self.write_lock.lock().await;
    let mut deliveries = self.read(Collection::Deliveries).await?;
    let pkg = deliveries
      .iter_mut()
      .find(|p| p.id == id)
      .ok_or_else(|| Error::PackageNotFound(id.to_owned()))?;
    pkg.status = PackageStatus::Delivered;
    pkg.delivery_time = Some(at);
    let updated = pkg.clone();
    self.write(Collection::Deliveries, &deliveries).await?;
    Ok(updated)
  }

  /// Write each fix into whichever collections hold its id, skipping records
  /// whose cached status already matches.
  pub async fn apply_fixes(&self, fixes: &[StatusFix]) -> Result<HealReport> {
    let mut report = HealReport::default();
    if fixes.is_empty() {
      return Ok(report);
    }
    let by_id: HashMap<&str, &StatusFix> = fixes.iter().map(|f| (f.id.as_str(), f)).collect();

    let _guard = self.write_lock.lock().await;
    for col in [Collection::Packages, Collection::Deliveries] {
      let mut list = self.read(col).await?;
      let mut changed = 0;
      for pkg in &mut list {
        if let Some(fix) = by_id.get(pkg.id.as_str()) {
          if fix.apply(pkg) {
            changed += 1;
          }
        }
      }
      if changed > 0 {
        self.write(col, &list).await?;
      }
      match col {
        Collection::Packages => report.packages = changed,
        Collection::Deliveries => report.deliveries = changed,
      }
    }
    Ok(report)
  }

  /// Add packages whose ids are not yet in the packages collection.
  pub async fn import_packages(&self, incoming: Vec<Package>) -> Result<usize> {
    let _guard = self.write_lock.lock().await;
    let mut packages = self.read(Collection::Packages).await?;
    let mut seen: HashSet<String> = packages.iter().map(|p| p.id.clone()).collect();
    let mut added = 0;
    for pkg in incoming {
      if seen.insert(pkg.id.clone()) {
        packages.push(pkg);
        added += 1;
      }
    }
    if added > 0 {
      self.write(Collection::Packages, &packages).await?;
    }
    Ok(added)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::package::NewPackage;

  fn pkg(id: &str) -> Package {
    Package::new(
      id.into(),
      NewPackage {
        title:           "Books".into(),
        pickup_location: "A St".into(),
        destination:     "B Ave".into(),
        cost:            "5000".into(),
        description:     None,
      },
      "creator".into(),
      1_000,
    )
  }

  fn cache() -> LocalCache<MemoryKv> { LocalCache::new(MemoryKv::new(), "me") }

  #[tokio::test]
  async fn save_then_get() {
    let c = cache();
    c.save(pkg("p1")).await.unwrap();
    c.save(pkg("p2")).await.unwrap();
    assert_eq!(c.list_packages().await.unwrap().len(), 2);
    assert_eq!(c.get_by_id("p2").await.unwrap().unwrap().id, "p2");
    assert!(c.get_by_id("nope").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn save_replaces_same_id() {
    let c = cache();
    c.save(pkg("p1")).await.unwrap();
    let mut updated = pkg("p1");
    updated.title = "More books".into();
    c.save(updated).await.unwrap();
    let all = c.list_all_packages().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "More books");
  }

  #[tokio::test]
  async fn primary_cleared_is_restored_from_backup() {
    let c = cache();
    c.save(pkg("p1")).await.unwrap();
    // A read copies the primary into the backup.
    c.list_all_packages().await.unwrap();

    c.kv().remove(PACKAGES_KEY.into()).await.unwrap();
    let restored = c.list_all_packages().await.unwrap();
    assert_eq!(restored.len(), 1);
    assert!(c.kv().get(PACKAGES_KEY.into()).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn corrupt_primary_falls_back_to_backup() {
    let c = cache();
    c.save(pkg("p1")).await.unwrap();
    c.list_all_packages().await.unwrap();

    c.kv().set(PACKAGES_KEY.into(), "{garbage".into()).await.unwrap();
    assert_eq!(c.list_all_packages().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn corrupt_without_backup_reads_empty() {
    let c = cache();
    c.kv().set(DELIVERIES_KEY.into(), "not json".into()).await.unwrap();
    assert!(c.list_deliveries().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn pickup_moves_package_into_my_deliveries() {
    let c = cache();
    c.save(pkg("p1")).await.unwrap();

    let picked = c.transition_to_in_transit("p1", None, 2_000).await.unwrap();
    assert_eq!(picked.status, PackageStatus::InTransit);
    assert_eq!(picked.courier_pubkey.as_deref(), Some("me"));
    assert_eq!(picked.pickup_time, Some(2_000));

    assert!(c.list_packages().await.unwrap().is_empty());
    assert_eq!(c.list_my_deliveries().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn pickup_of_uncached_package_uses_supplemental() {
    let c = cache();
    assert!(matches!(
      c.transition_to_in_transit("p9", None, 1).await,
      Err(Error::PackageNotFound(_))
    ));
    let picked = c.transition_to_in_transit("p9", Some(pkg("p9")), 1).await.unwrap();
    assert_eq!(picked.title, "Books");
  }

  #[tokio::test]
  async fn list_packages_hides_my_deliveries_only() {
    let c = cache();
    c.save(pkg("p1")).await.unwrap();
    c.save(pkg("p2")).await.unwrap();
    let mut theirs = pkg("p2");
    theirs.courier_pubkey = Some("someone-else".into());
    c.record_delivery(theirs).await.unwrap();
    let mut mine = pkg("p1");
    mine.courier_pubkey = Some("me".into());
    c.record_delivery(mine).await.unwrap();

    let visible: Vec<String> = c.list_packages().await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(visible, vec!["p2".to_string()]);
    assert_eq!(c.list_deliveries().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn delivered_requires_delivery_record() {
    let c = cache();
    c.save(pkg("p1")).await.unwrap();
    assert!(c.transition_to_delivered("p1", 5).await.is_err());

    c.transition_to_in_transit("p1", None, 3).await.unwrap();
    let done = c.transition_to_delivered("p1", 5).await.unwrap();
    assert_eq!(done.status, PackageStatus::Delivered);
    assert_eq!(done.delivery_time, Some(5));
    assert_eq!(done.pickup_time, Some(3));
  }

  #[tokio::test]
  async fn fixes_touch_both_collections_once() {
    let c = cache();
    c.save(pkg("p1")).await.unwrap();
    let mut d = pkg("p1");
    d.courier_pubkey = Some("other".into());
    c.record_delivery(d).await.unwrap();

    let fix = StatusFix {
      id:             "p1".into(),
      status:         PackageStatus::Delivered,
      courier_pubkey: None,
      pickup_time:    None,
      delivery_time:  Some(9),
    };
    let report = c.apply_fixes(std::slice::from_ref(&fix)).await.unwrap();
    assert_eq!(report, HealReport { packages: 1, deliveries: 1 });

    let healed = c.get_by_id("p1").await.unwrap().unwrap();
    assert_eq!(healed.delivery_time, Some(9));
    assert_eq!(healed.courier_pubkey.as_deref(), Some("other"));

    let again = c.apply_fixes(&[fix]).await.unwrap();
    assert_eq!(again.total(), 0);
  }

  #[tokio::test]
  async fn remove_clears_both_collections() {
    let c = cache();
    c.save(pkg("p1")).await.unwrap();
    assert!(c.remove("p1").await.unwrap());
    assert!(!c.remove("p1").await.unwrap());
    assert!(c.get_by_id("p1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn import_skips_known_ids() {
    let c = cache();
    c.save(pkg("p1")).await.unwrap();
    let added = c.import_packages(vec![pkg("p1"), pkg("p2"), pkg("p2")]).await.unwrap();
    assert_eq!(added, 1);
    assert_eq!(c.list_all_packages().await.unwrap().len(), 2);
  }
}
