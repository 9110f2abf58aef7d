//! Key-value persistence for the bridge.
//!
//! The bridge only stores the nickname list, under a single key. The store
//! is injected so tests can substitute [`MemoryStore`].

mod db;
mod memory;

use std::future::Future;

use serde_json::Value;

pub use db::Database;
pub use halbridge_core::db::DatabaseError;
pub use memory::MemoryStore;

/// Durable JSON key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, DatabaseError>> + Send;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), DatabaseError>> + Send;
}
