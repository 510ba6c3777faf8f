//! Background status refresh.
//!
//! A [`RefreshTask`] owns a spawned sweep (one-shot or periodic) and cancels
//! it when dropped, so a refresh never outlives the view that started it.

use std::{sync::Arc, time::Duration};

use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, warn};

use atob_core::{cache::KvStore, relay::Relay, signer::Signer};

use crate::{Marketplace, RefreshReport};

/// Handle to a spawned refresh.
#[derive(Debug)]
pub struct RefreshTask {
  cancel: Option<oneshot::Sender<()>>,
  handle: Option<JoinHandle<Option<RefreshReport>>>,
}

impl RefreshTask {
  /// Stop the sweep. A sweep already writing to the cache finishes its
  /// current write; the next one never starts.
  pub fn cancel(&mut self) {
    if let Some(tx) = self.cancel.take() {
      let _ = tx.send(());
    }
  }

  /// Wait for the task to end and return the last finished sweep, if any.
  pub async fn join(mut self) -> Option<RefreshReport> {
    let handle = self.handle.take()?;
    match handle.await {
      Ok(report) => report,
      Err(e) => {
        warn!(error = %e, "refresh task panicked");
        None
      }
    }
  }

  pub fn is_finished(&self) -> bool {
    self.handle.as_ref().is_none_or(JoinHandle::is_finished)
  }
}

impl Drop for RefreshTask {
  fn drop(&mut self) { self.cancel(); }
}

async fn sweep<K, R, G>(market: &Marketplace<K, R, G>) -> Option<RefreshReport>
where
  K: KvStore,
  R: Relay,
  G: Signer,
{
  match market.force_status_refresh().await {
    Ok(report) => Some(report),
    Err(e) => {
      warn!(error = %e, "status refresh failed");
      None
    }
  }
}

/// Run one [`force_status_refresh`](Marketplace::force_status_refresh) in
/// the background.
pub fn spawn_refresh<K, R, G>(market: Arc<Marketplace<K, R, G>>) -> RefreshTask
where
  K: KvStore + 'static,
  R: Relay + 'static,
  G: Signer + 'static,
{
  let (tx, mut rx) = oneshot::channel();
  let handle = tokio::spawn(async move {
    tokio::select! {
      report = sweep(&market) => report,
      _ = &mut rx => {
        debug!("status refresh cancelled");
        None
      }
    }
  });
  RefreshTask { cancel: Some(tx), handle: Some(handle) }
}

/// Sweep immediately and then every `every` until cancelled.
pub fn spawn_periodic_refresh<K, R, G>(
  market: Arc<Marketplace<K, R, G>>,
  every: Duration,
) -> RefreshTask
where
  K: KvStore + 'static,
  R: Relay + 'static,
  G: Signer + 'static,
{
  let (tx, mut rx) = oneshot::channel();
  let handle = tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last = None;
    loop {
      tokio::select! {
        _ = &mut rx => {
          debug!("periodic refresh cancelled");
          return last;
        }
        _ = ticker.tick() => {
          tokio::select! {
            report = sweep(&market) => {
              if report.is_some() {
                last = report;
              }
            }
            _ = &mut rx => {
              debug!("periodic refresh cancelled mid-sweep");
              return last;
            }
          }
        }
      }
    }
  });
  RefreshTask { cancel: Some(tx), handle: Some(handle) }
}
