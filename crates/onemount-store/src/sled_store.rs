//! Sled-backed implementation of `onemount_core::ports::PersistentStore`.
//!
//! Open policy (spec section 4.3): attempt open with exponential backoff
//! starting at 200 ms up to 5 s, max 10 attempts, 10-second per-attempt
//! timeout. Stale lock files (older than 5 minutes) are removed before
//! retrying.

use std::path::Path;
use std::time::{Duration, SystemTime};

use onemount_core::ports::persistent_store::{BatchOp, Bucket, PersistentStore, StoreError};

const OPEN_BACKOFF_INITIAL: Duration = Duration::from_millis(200);
const OPEN_BACKOFF_MAX: Duration = Duration::from_secs(5);
const OPEN_MAX_ATTEMPTS: u32 = 10;
const OPEN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
const STALE_LOCK_AGE: Duration = Duration::from_secs(5 * 60);

const FORMAT_VERSION: &str = "1";

/// An embedded key/value database providing ordered buckets and
/// serialisable batch transactions (spec section 4.3).
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Opens (creating if absent) the database at `db_path`, applying the
    /// retry/stale-lock policy described in spec section 4.3.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("creating {}: {e}", parent.display())))?;
        }

        let path = db_path.to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open_with_retry(&path))
            .await
            .map_err(|e| StoreError::Backend(format!("open task panicked: {e}")))??;

        let store = Self { db };
        store.check_or_stamp_version().await?;
        tracing::info!(path = %db_path.display(), "persistent store opened");
        Ok(store)
    }

    fn open_with_retry(path: &Path) -> Result<sled::Db, StoreError> {
        let mut backoff = OPEN_BACKOFF_INITIAL;
        let mut last_err = None;

        for attempt in 1..=OPEN_MAX_ATTEMPTS {
            Self::remove_stale_lock(path);

            let started = std::time::Instant::now();
            let config = sled::Config::new().path(path).flush_every_ms(None);
            match config.open() {
                Ok(db) => return Ok(db),
                Err(e) => {
                    if started.elapsed() > OPEN_ATTEMPT_TIMEOUT {
                        tracing::warn!(attempt, "persistent store open attempt timed out");
                    }
                    tracing::warn!(attempt, error = %e, "persistent store open attempt failed");
                    last_err = Some(e);
                    if attempt < OPEN_MAX_ATTEMPTS {
                        std::thread::sleep(backoff);
                        backoff = std::cmp::min(backoff * 2, OPEN_BACKOFF_MAX);
                    }
                }
            }
        }

        Err(StoreError::Backend(format!(
            "failed to open store after {OPEN_MAX_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn remove_stale_lock(path: &Path) {
        let lock_path = path.join("db").with_extension("lck");
        let candidates = [lock_path, path.join("conf")];
        for candidate in candidates {
            if let Ok(meta) = std::fs::metadata(&candidate) {
                if let Ok(modified) = meta.modified() {
                    if SystemTime::now()
                        .duration_since(modified)
                        .map(|age| age > STALE_LOCK_AGE)
                        .unwrap_or(false)
                    {
                        tracing::warn!(path = %candidate.display(), "removing stale lock file");
                        let _ = std::fs::remove_file(&candidate);
                    }
                }
            }
        }
    }

    async fn check_or_stamp_version(&self) -> Result<(), StoreError> {
        let tree = self.tree(Bucket::Version)?;
        match tree
            .get(b"format")
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(existing) => {
                let found = String::from_utf8_lossy(&existing).to_string();
                if found != FORMAT_VERSION {
                    return Err(StoreError::UnsupportedVersion {
                        found,
                        expected: FORMAT_VERSION.to_string(),
                    });
                }
            }
            None => {
                tree.insert(b"format", FORMAT_VERSION.as_bytes())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn tree(&self, bucket: Bucket) -> Result<sled::Tree, StoreError> {
        self.db
            .open_tree(bucket.name())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait::async_trait]
impl PersistentStore for SledStore {
    async fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let tree = self.tree(bucket)?;
        let key = key.to_vec();
        tokio::task::spawn_blocking(move || {
            tree.get(&key)
                .map(|opt| opt.map(|v| v.to_vec()))
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn put(&self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let tree = self.tree(bucket)?;
        let key = key.to_vec();
        let value = value.to_vec();
        tokio::task::spawn_blocking(move || {
            tree.insert(&key, value)
                .map(|_| ())
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn delete(&self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError> {
        let tree = self.tree(bucket)?;
        let key = key.to_vec();
        tokio::task::spawn_blocking(move || {
            tree.remove(&key)
                .map(|_| ())
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn range(
        &self,
        bucket: Bucket,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let tree = self.tree(bucket)?;
        let prefix = prefix.to_vec();
        tokio::task::spawn_blocking(move || {
            tree.scan_prefix(&prefix)
                .map(|r| r.map(|(k, v)| (k.to_vec(), v.to_vec())))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            use std::collections::HashMap;
            let mut batches: HashMap<&'static str, sled::Batch> = HashMap::new();
            for op in &ops {
                let (bucket, batch_op) = match op {
                    BatchOp::Put(b, k, v) => (*b, BatchEntry::Put(k.clone(), v.clone())),
                    BatchOp::Delete(b, k) => (*b, BatchEntry::Delete(k.clone())),
                };
                let batch = batches.entry(bucket.name()).or_default();
                match batch_op {
                    BatchEntry::Put(k, v) => batch.insert(k, v),
                    BatchEntry::Delete(k) => batch.remove(k),
                }
            }
            for (name, batch) in batches {
                let tree = db
                    .open_tree(name)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                tree.apply_batch(batch)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            db.flush()
                .map(|_| ())
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}

enum BatchEntry {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}
