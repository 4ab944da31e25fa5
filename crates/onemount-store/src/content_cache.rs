//! Disk-backed implementation of `onemount_core::ports::ContentCache`.
//!
//! Bodies are stored as plain files under `{cache_dir}/content/{id}`,
//! keyed directly by item id rather than a content hash — the id is
//! already unique and this keeps `rename` (the local-to-remote id swap) a
//! single filesystem rename instead of a content rehash.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use onemount_core::domain::ids::ItemId;
use onemount_core::ports::content_cache::{CacheEntryInfo, CacheError, ContentCache};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Entry {
    size: u64,
    last_access: DateTime<Utc>,
}

/// A directory holding one regular file per item id (spec section 4.2).
pub struct DiskContentCache {
    content_dir: PathBuf,
    entries: Mutex<HashMap<ItemId, Entry>>,
}

impl DiskContentCache {
    pub async fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        let content_dir = cache_dir.join("content");
        tokio::fs::create_dir_all(&content_dir)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))?;

        let mut entries = HashMap::new();
        let mut dir = tokio::fs::read_dir(&content_dir)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))?;
        while let Some(entry) = dir.next_entry().await.map_err(|e| CacheError::Io(e.to_string()))? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !meta.is_file() {
                continue;
            }
            let last_access = meta
                .accessed()
                .or_else(|_| meta.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            entries.insert(
                ItemId::from(name),
                Entry {
                    size: meta.len(),
                    last_access,
                },
            );
        }

        tracing::info!(path = %content_dir.display(), entries = entries.len(), "content cache opened");
        Ok(Self {
            content_dir,
            entries: Mutex::new(entries),
        })
    }

    fn path_for(&self, id: &ItemId) -> PathBuf {
        self.content_dir.join(id.as_str())
    }

    /// Snapshot of per-entry bookkeeping, ordered by ascending `last_access`
    /// — the eviction order `enforce_ceiling` walks.
    pub async fn entries_by_age(&self) -> Vec<CacheEntryInfo> {
        let guard = self.entries.lock().await;
        let mut items: Vec<_> = guard
            .iter()
            .map(|(id, e)| CacheEntryInfo {
                id: id.clone(),
                size: e.size,
                last_access: e.last_access,
            })
            .collect();
        items.sort_by_key(|e| e.last_access);
        items
    }
}

#[async_trait::async_trait]
impl ContentCache for DiskContentCache {
    async fn open(&self, id: &ItemId) -> Result<tokio::fs::File, CacheError> {
        let path = self.path_for(id);
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))?;

        let mut guard = self.entries.lock().await;
        guard.entry(id.clone()).or_insert_with(|| Entry {
            size: 0,
            last_access: Utc::now(),
        });
        Ok(file)
    }

    async fn insert(&self, id: &ItemId, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(id);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))?;

        let mut guard = self.entries.lock().await;
        guard.insert(
            id.clone(),
            Entry {
                size: bytes.len() as u64,
                last_access: Utc::now(),
            },
        );
        Ok(())
    }

    async fn rename(&self, old_id: &ItemId, new_id: &ItemId) -> Result<(), CacheError> {
        let old_path = self.path_for(old_id);
        let new_path = self.path_for(new_id);
        tokio::fs::rename(&old_path, &new_path)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))?;

        let mut guard = self.entries.lock().await;
        if let Some(entry) = guard.remove(old_id) {
            guard.insert(new_id.clone(), entry);
        }
        Ok(())
    }

    async fn delete(&self, id: &ItemId) -> Result<(), CacheError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::Io(e.to_string())),
        }
        self.entries.lock().await.remove(id);
        Ok(())
    }

    async fn set_len(&self, id: &ItemId, len: u64) -> Result<(), CacheError> {
        let path = self.path_for(id);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| CacheError::Io(e.to_string()))?;
        file.set_len(len).await.map_err(|e| CacheError::Io(e.to_string()))?;

        let mut guard = self.entries.lock().await;
        guard.insert(id.clone(), Entry { size: len, last_access: Utc::now() });
        Ok(())
    }

    async fn note_write(&self, id: &ItemId, end_offset: u64) -> Result<(), CacheError> {
        let mut guard = self.entries.lock().await;
        let entry = guard.entry(id.clone()).or_insert_with(|| Entry { size: 0, last_access: Utc::now() });
        if end_offset > entry.size {
            entry.size = end_offset;
        }
        entry.last_access = Utc::now();
        Ok(())
    }

    async fn contains(&self, id: &ItemId) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    async fn total_bytes(&self) -> u64 {
        self.entries.lock().await.values().map(|e| e.size).sum()
    }

    async fn cleanup(&self, expiration: chrono::Duration) -> Result<Vec<ItemId>, CacheError> {
        let threshold = Utc::now() - expiration;
        let stale: Vec<ItemId> = {
            let guard = self.entries.lock().await;
            guard
                .iter()
                .filter(|(_, e)| e.last_access < threshold)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut removed = Vec::with_capacity(stale.len());
        for id in stale {
            if self.delete(&id).await.is_ok() {
                removed.push(id);
            }
        }
        tracing::debug!(count = removed.len(), "content cache cleanup removed stale entries");
        Ok(removed)
    }

    async fn enforce_ceiling(
        &self,
        max_bytes: u64,
        is_evictable: Arc<dyn for<'a> Fn(&'a ItemId) -> bool + Send + Sync>,
    ) -> Result<Vec<ItemId>, CacheError> {
        let mut total = self.total_bytes().await;
        if total <= max_bytes {
            return Ok(Vec::new());
        }

        let candidates: Vec<CacheEntryInfo> = self
            .entries_by_age()
            .await
            .into_iter()
            .filter(|c| is_evictable(&c.id))
            .collect();

        let mut evicted = Vec::new();
        for candidate in candidates {
            if total <= max_bytes {
                break;
            }
            if self.delete(&candidate.id).await.is_ok() {
                total = total.saturating_sub(candidate.size);
                evicted.push(candidate.id);
            }
        }

        if total > max_bytes {
            tracing::warn!(
                total_bytes = total,
                max_bytes,
                "content cache over ceiling with no further evictable entries"
            );
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ItemId {
        ItemId::from(s.to_string())
    }

    #[tokio::test]
    async fn insert_then_open_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).await.unwrap();
        cache.insert(&id("abc"), b"hello").await.unwrap();
        assert!(cache.contains(&id("abc")).await);
        assert_eq!(cache.total_bytes().await, 5);
    }

    #[tokio::test]
    async fn rename_preserves_content_and_updates_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).await.unwrap();
        cache.insert(&id("local-1"), b"payload").await.unwrap();
        cache.rename(&id("local-1"), &id("remote-9")).await.unwrap();

        assert!(!cache.contains(&id("local-1")).await);
        assert!(cache.contains(&id("remote-9")).await);
        let mut f = cache.open(&id("remote-9")).await.unwrap();
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"payload");
    }

    #[tokio::test]
    async fn enforce_ceiling_evicts_only_evictable_entries_in_age_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).await.unwrap();
        cache.insert(&id("old"), &[0u8; 40]).await.unwrap();
        cache.insert(&id("dirty"), &[0u8; 40]).await.unwrap();
        cache.insert(&id("new"), &[0u8; 40]).await.unwrap();
        {
            let mut guard = cache.entries.lock().await;
            guard.get_mut(&id("old")).unwrap().last_access = Utc::now() - chrono::Duration::seconds(20);
            guard.get_mut(&id("dirty")).unwrap().last_access = Utc::now() - chrono::Duration::seconds(10);
        }

        let dirty_id = id("dirty");
        let is_evictable = Arc::new(move |cand: &ItemId| cand != &dirty_id);
        let evicted = cache.enforce_ceiling(50, is_evictable).await.unwrap();

        assert_eq!(evicted, vec![id("old"), id("new")]);
        assert!(cache.total_bytes().await <= 50);
        assert!(cache.contains(&id("dirty")).await);
    }

    #[tokio::test]
    async fn enforce_ceiling_with_no_evictable_entries_still_reports_overshoot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).await.unwrap();
        cache.insert(&id("dirty1"), &[0u8; 40]).await.unwrap();
        cache.insert(&id("dirty2"), &[0u8; 40]).await.unwrap();

        let evicted = cache
            .enforce_ceiling(10, Arc::new(|_: &ItemId| false))
            .await
            .unwrap();
        assert!(evicted.is_empty());
        assert_eq!(cache.total_bytes().await, 80);
    }

    #[tokio::test]
    async fn cleanup_removes_entries_older_than_expiration() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskContentCache::new(dir.path().to_path_buf()).await.unwrap();
        cache.insert(&id("ancient"), b"x").await.unwrap();
        {
            let mut guard = cache.entries.lock().await;
            guard.get_mut(&id("ancient")).unwrap().last_access = Utc::now() - chrono::Duration::days(40);
        }
        cache.insert(&id("fresh"), b"y").await.unwrap();

        let removed = cache.cleanup(chrono::Duration::days(30)).await.unwrap();
        assert_eq!(removed, vec![id("ancient")]);
        assert!(cache.contains(&id("fresh")).await);
    }
}
