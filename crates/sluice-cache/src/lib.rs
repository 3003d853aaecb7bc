//! # sluice-cache
//!
//! Durable key-value cache layer for the ingestion gateway.
//!
//! This crate provides:
//! - `DurableCache`: the get/set/hash/list/expire contract the stores consume
//! - `CacheHandle`: one-ping availability check plus best-effort calls
//! - `MemoryCache`: shared in-process keyspace (tests, single-process serving)
//! - `FileCache`: keyspace snapshot persisted atomically to one JSON file
//!
//! Stores never see a `CacheError`. Every call goes through `CacheHandle`,
//! which logs failures and degrades to a neutral value.
//!
//! ```text
//! IngestStore / PipeDefinitionStore
//!     │  best-effort calls (outside store locks)
//! CacheHandle  (available: decided once, at construction)
//!     │
//! dyn DurableCache  ── MemoryCache | FileCache | network adapter
//! ```

mod error;
mod file;
mod handle;
mod keyspace;
mod memory;

pub use error::CacheError;
pub use file::{FILE_CACHE_SCHEMA, FileCache};
pub use handle::CacheHandle;
pub use memory::MemoryCache;

use std::collections::BTreeMap;
use std::time::Duration;

/// Key-value store with hash, list, string, and TTL operations.
///
/// Adapters that talk to a remote server must bound every call with a short
/// timeout of their own and report any failure as `CacheError::Unavailable`.
/// Callers do not retry.
pub trait DurableCache: Send + Sync {
    /// Single liveness ping, issued once when a handle is built.
    fn ping(&self) -> Result<(), CacheError>;

    fn hset(&self, hash: &str, field: &str, value: &str) -> Result<(), CacheError>;
    fn hget(&self, hash: &str, field: &str) -> Result<Option<String>, CacheError>;
    fn hgetall(&self, hash: &str) -> Result<BTreeMap<String, String>, CacheError>;
    /// Returns true if the field existed.
    fn hdel(&self, hash: &str, field: &str) -> Result<bool, CacheError>;

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    /// Returns true if the key existed.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Append to a list, returning its new length.
    fn rpush(&self, key: &str, value: &str) -> Result<usize, CacheError>;
    /// Inclusive range with negative indices counted from the tail (`-1` is last).
    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError>;
    /// Remove up to `count` occurrences (`0` = all, negative = from the tail).
    fn lrem(&self, key: &str, count: i64, value: &str) -> Result<usize, CacheError>;

    /// Returns false if the key does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;
}
