//! Core types and trait definitions for the A to ₿ delivery marketplace.
//!
//! This crate is deliberately free of network and database dependencies.
//! Storage, relay transport and signing are expressed as traits
//! ([`cache::KvStore`], [`relay::Relay`], [`signer::Signer`]) so every other
//! crate can be exercised against in-memory fakes.

// We intentionally use native `async fn` in trait impls (stabilised in Rust
// 1.75). Suppress the advisory lint about `Send` bounds on the returned
// futures.
#![allow(async_fn_in_trait)]

pub mod cache;
pub mod clock;
pub mod error;
pub mod event;
pub mod facts;
pub mod package;
pub mod parse;
pub mod profile;
pub mod relay;
pub mod signer;

pub use error::{Error, ParseError, Result};
