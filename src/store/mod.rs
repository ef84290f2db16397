//! # Store Adapter
//!
//! Thin façade over the backing key-value store. The cache composes exactly
//! these primitives: string get/conditional-set-with-expiry/delete, list
//! push/range, hash set/prefix-scan/delete, sorted-set add/range-by-score/
//! remove, and all-or-nothing multi-command batches.
//!
//! Two implementations ship: [`RedisStore`] for shared multi-instance
//! deployments and [`MemoryStore`] for tests and single-process use.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// One write inside an atomic batch
///
/// Batches execute all-or-nothing at the store's transaction granularity; no
/// partial state is observable after a failed batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    /// Add or refresh a sorted-set member's score
    SortedSetAdd {
        key: String,
        score: i64,
        member: String,
    },

    /// Remove a sorted-set member
    SortedSetRemove { key: String, member: String },

    /// Write or overwrite a hash field
    HashSet {
        key: String,
        field: String,
        value: String,
    },

    /// Delete a hash field
    HashDelete { key: String, field: String },

    /// Append a value to a list
    ListPush { key: String, value: String },

    /// Delete a whole key
    Delete { key: String },
}

/// Backing key-value store contract
///
/// All operations are asynchronous and report success or a store-level error.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get a string value, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically set a value with a time-to-live only if the key is absent
    ///
    /// Returns `true` if the key was written, `false` if it already existed.
    /// This is a single conditional-set-with-expiry operation; there is no
    /// window between the existence check and the write.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read an inclusive list window `[start, stop]`
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Scan a hash for all `(field, value)` pairs whose field starts with `prefix`
    async fn hash_scan_prefix(&self, key: &str, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Members of a sorted set with `min <= score <= max`
    async fn sorted_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>>;

    /// Execute a batch of writes atomically, all-or-nothing
    async fn execute_batch(&self, commands: Vec<StoreCommand>) -> Result<()>;
}
