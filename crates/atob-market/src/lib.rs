//! Marketplace reconciliation for A to ₿.
//!
//! A [`Marketplace`] combines one identity's local cache with the shared
//! event log. Views merge both sources under latest-wins rules, heal the
//! cache toward the derived status, and fall back to the cache alone when
//! the log does not answer within `fallback_after`. Operations write the
//! cache first and replicate to the log second.

// We intentionally use native `async fn` in trait impls (stabilised in Rust
// 1.75). Suppress the advisory lint about `Send` bounds on the returned
// futures.
#![allow(async_fn_in_trait)]

mod config;
mod market;
mod ops;
mod profile;
mod refresh;
mod views;

pub mod error;
pub mod reconcile;

pub use config::MarketConfig;
pub use error::{Error, Result};
pub use market::Marketplace;
pub use ops::Transition;
pub use refresh::{RefreshTask, spawn_periodic_refresh, spawn_refresh};
pub use views::RefreshReport;
