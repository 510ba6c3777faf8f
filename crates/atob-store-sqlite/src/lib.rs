//! SQLite backend for the A to ₿ local cache.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. The cache itself only needs string
//! keys and values; see [`atob_core::cache::KvStore`].

mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteKv;
