//! Persistent store port (spec section 4.3).
//!
//! An embedded key/value database providing ordered buckets and
//! serialisable batch transactions. Holds serialised inodes, the delta
//! cursor, the offline-change journal, and resumable upload/download
//! session state.
//!
//! The spec describes `range(bucket, prefix, fn)` and `batch(fn)` as
//! callback-taking operations. Plumbing an arbitrary closure through an
//! `async_trait` object is awkward in Rust (closures aren't `dyn`-safe
//! across an await point without boxing gymnastics), so this port expresses
//! the same operations as data: `range` returns the matching entries and
//! `batch` takes a list of operations to apply atomically. Same contract,
//! ordinary Rust shape.

use thiserror::Error;

/// The four logical namespaces from spec section 3, "Persistent
/// structure", plus the `version` bucket that guards the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// `id -> serialised item`
    Metadata,
    /// singleton cursor under key `cursor`
    Delta,
    /// `{id}|{nanosecond_ts} -> serialised change record`
    OfflineChanges,
    /// `upload/{session_id}` and `download/{session_id}`
    Sessions,
    /// on-disk format string
    Version,
}

impl Bucket {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Bucket::Metadata => "metadata",
            Bucket::Delta => "delta",
            Bucket::OfflineChanges => "offline_changes",
            Bucket::Sessions => "sessions",
            Bucket::Version => "version",
        }
    }
}

/// A single write to apply as part of a [`PersistentStore::batch`] call.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put(Bucket, Vec<u8>, Vec<u8>),
    Delete(Bucket, Vec<u8>),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("on-disk format version {found:?} is not supported (expected {expected:?})")]
    UnsupportedVersion { found: String, expected: String },
    #[error("lock file held by another instance")]
    Locked,
}

/// The ordered key/value store backing all persisted core state (spec
/// section 4.3).
#[async_trait::async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    async fn delete(&self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError>;

    /// Returns every `(key, value)` pair in `bucket` whose key starts with
    /// `prefix`, in key order.
    async fn range(&self, bucket: Bucket, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Applies every operation in `ops` as a single atomic transaction.
    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;

    /// Explicitly flushes to disk. Called at the checkpoints named in spec
    /// section 4.3: delta-cursor advance, successful upload commit, and
    /// shutdown.
    async fn flush(&self) -> Result<(), StoreError>;
}
