//! Content cache port (spec section 4.2).
//!
//! A directory holding one regular file per item id, an in-memory map of
//! `id -> (size, last_access_time)`, and a total-bytes counter. The
//! eviction predicate (an item is only evictable in state `Hydrated`) is
//! graph-level knowledge the cache doesn't have, so `enforce_ceiling` takes
//! it as an injected closure rather than the cache reaching into the graph.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::ids::ItemId;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(String),
    #[error("no cached body for item {0}")]
    NotCached(String),
}

/// Per-entry bookkeeping the cache reports to callers that need to decide
/// eviction order or cache-pressure warnings.
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub id: ItemId,
    pub size: u64,
    pub last_access: DateTime<Utc>,
}

/// The on-disk content cache (spec section 4.2).
#[async_trait::async_trait]
pub trait ContentCache: Send + Sync {
    /// Opens (creating if absent) a read/write file handle to the cached
    /// body. Callers are responsible for positioned I/O.
    async fn open(&self, id: &ItemId) -> Result<tokio::fs::File, CacheError>;

    /// Atomically replaces the cached body for `id`.
    async fn insert(&self, id: &ItemId, bytes: &[u8]) -> Result<(), CacheError>;

    /// Renames the on-disk body from `old_id` to `new_id`, preserving
    /// content across a local-to-remote id swap (spec section 4.1,
    /// `change_id`).
    async fn rename(&self, old_id: &ItemId, new_id: &ItemId) -> Result<(), CacheError>;

    async fn delete(&self, id: &ItemId) -> Result<(), CacheError>;

    /// Truncates or extends the cached body to exactly `len` bytes and
    /// updates bookkeeping to match (spec section 4.10, `setattr` size
    /// changes).
    async fn set_len(&self, id: &ItemId, len: u64) -> Result<(), CacheError>;

    /// Refreshes size bookkeeping after a write made directly through a
    /// handle from `open`, which bypasses `insert`'s accounting. `end_offset`
    /// is the highest byte offset written; bookkeeping only grows, never
    /// shrinks, from this call.
    async fn note_write(&self, id: &ItemId, end_offset: u64) -> Result<(), CacheError>;

    async fn contains(&self, id: &ItemId) -> bool;

    async fn total_bytes(&self) -> u64;

    /// Removes bodies whose `last_access` is older than `expiration`.
    /// Returns the ids removed. Run at startup and on the configured
    /// interval (spec section 4.2, `cleanup`).
    async fn cleanup(&self, expiration: chrono::Duration) -> Result<Vec<ItemId>, CacheError>;

    /// If total bytes exceed `max_bytes`, evicts in ascending
    /// `last_access` order among ids for which `is_evictable` returns true,
    /// until within bounds. Returns the ids evicted (callers transition
    /// them to `Ghost`). If no evictable items exist and the ceiling is
    /// still exceeded, returns what it could evict and the caller is
    /// expected to log a warning rather than fail the insert that caused
    /// the overshoot (spec section 8, "Boundary behaviours").
    async fn enforce_ceiling(
        &self,
        max_bytes: u64,
        is_evictable: Arc<dyn for<'a> Fn(&'a ItemId) -> bool + Send + Sync>,
    ) -> Result<Vec<ItemId>, CacheError>;
}
