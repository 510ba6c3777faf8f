//! Event-log access for the A to ₿ marketplace.
//!
//! [`EventLogClient`] fans every publish and query out over a set of
//! [`Relay`](atob_core::relay::Relay) endpoints and never lets a single
//! endpoint's failure reach the caller. Endpoints are either [`WsRelay`]
//! (NIP-01 over WebSocket) or [`MemoryRelay`] for tests and offline use.

// We intentionally use native `async fn` in trait impls (stabilised in Rust
// 1.75). Suppress the advisory lint about `Send` bounds on the returned
// futures.
#![allow(async_fn_in_trait)]

mod client;
mod keys;
mod memory;
mod retry;
mod ws;

pub mod error;

pub use client::{EventLogClient, EventLogConfig, PublishOutcome, RelayStatus, accepted};
pub use error::{Error, Result};
pub use keys::{KeySigner, verify_event};
pub use memory::MemoryRelay;
pub use retry::{Backoff, RetryPolicy};
pub use ws::WsRelay;
