//! Thumbnail cache (spec section 6, "Persistent state layout":
//! `thumbnails/{id}/{size}`).
//!
//! Structurally the same idea as [`crate::content_cache::DiskContentCache`]
//! — a directory of files with an in-memory size counter — but keyed by
//! `(id, size)` instead of `id` alone, and accounted separately: spec
//! section 8's Open Question on whether thumbnail bytes count toward the
//! content-cache ceiling is resolved as "no, a separate quota" (see
//! DESIGN.md), so this keeps its own `total_bytes` independent of
//! `ContentCache::total_bytes`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use onemount_core::domain::ids::ItemId;
use onemount_core::ports::content_cache::CacheError;

/// On-disk cache of rendered thumbnail images, one file per `(id, size)`.
pub struct ThumbnailCache {
    root: PathBuf,
    total_bytes: AtomicU64,
}

impl ThumbnailCache {
    pub async fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        let root = cache_dir.join("thumbnails");
        tokio::fs::create_dir_all(&root).await.map_err(|e| CacheError::Io(e.to_string()))?;

        let mut total = 0u64;
        let mut dirs = tokio::fs::read_dir(&root).await.map_err(|e| CacheError::Io(e.to_string()))?;
        while let Some(id_dir) = dirs.next_entry().await.map_err(|e| CacheError::Io(e.to_string()))? {
            if !id_dir.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let mut files = tokio::fs::read_dir(id_dir.path()).await.map_err(|e| CacheError::Io(e.to_string()))?;
            while let Some(file) = files.next_entry().await.map_err(|e| CacheError::Io(e.to_string()))? {
                if let Ok(meta) = file.metadata().await {
                    total += meta.len();
                }
            }
        }

        Ok(Self { root, total_bytes: AtomicU64::new(total) })
    }

    fn path_for(&self, id: &ItemId, size: &str) -> PathBuf {
        self.root.join(id.as_str()).join(size)
    }

    /// Writes (or replaces) the cached thumbnail for `(id, size)`.
    pub async fn insert(&self, id: &ItemId, size: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(id, size);
        let dir = path.parent().expect("path_for always has a parent");
        tokio::fs::create_dir_all(dir).await.map_err(|e| CacheError::Io(e.to_string()))?;

        let previous = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        tokio::fs::write(&path, bytes).await.map_err(|e| CacheError::Io(e.to_string()))?;

        let new_len = bytes.len() as u64;
        if new_len >= previous {
            self.total_bytes.fetch_add(new_len - previous, Ordering::SeqCst);
        } else {
            self.total_bytes.fetch_sub(previous - new_len, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Reads a cached thumbnail, if present.
    pub async fn get(&self, id: &ItemId, size: &str) -> Option<Vec<u8>> {
        tokio::fs::read(self.path_for(id, size)).await.ok()
    }

    /// Removes all cached thumbnails for `id` (mirrors `content/{id}`
    /// deletion when an item is deleted from the graph).
    pub async fn delete(&self, id: &ItemId) -> Result<(), CacheError> {
        let dir = self.root.join(id.as_str());
        let mut freed = 0u64;
        if let Ok(mut files) = tokio::fs::read_dir(&dir).await {
            while let Ok(Some(file)) = files.next_entry().await {
                if let Ok(meta) = file.metadata().await {
                    freed += meta.len();
                }
            }
        }
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::Io(e.to_string())),
        }
        self.total_bytes.fetch_sub(freed, Ordering::SeqCst);
        Ok(())
    }

    /// Total bytes across all cached thumbnails, tracked independently of
    /// the content cache's ceiling.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ItemId {
        ItemId::from(s.to_string())
    }

    #[tokio::test]
    async fn insert_then_get_round_trips_and_tracks_bytes_separately() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().to_path_buf()).await.unwrap();

        cache.insert(&id("abc"), "small", b"thumb-bytes").await.unwrap();
        assert_eq!(cache.total_bytes(), 11);
        assert_eq!(cache.get(&id("abc"), "small").await, Some(b"thumb-bytes".to_vec()));
        assert_eq!(cache.get(&id("abc"), "large").await, None);
    }

    #[tokio::test]
    async fn reinsert_with_shorter_bytes_shrinks_total() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().to_path_buf()).await.unwrap();

        cache.insert(&id("abc"), "small", &[0u8; 100]).await.unwrap();
        cache.insert(&id("abc"), "small", &[0u8; 20]).await.unwrap();
        assert_eq!(cache.total_bytes(), 20);
    }

    #[tokio::test]
    async fn delete_removes_all_sizes_for_an_item() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().to_path_buf()).await.unwrap();

        cache.insert(&id("abc"), "small", &[0u8; 10]).await.unwrap();
        cache.insert(&id("abc"), "large", &[0u8; 40]).await.unwrap();
        assert_eq!(cache.total_bytes(), 50);

        cache.delete(&id("abc")).await.unwrap();
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(cache.get(&id("abc"), "small").await, None);
    }

    #[tokio::test]
    async fn reopening_restores_total_bytes_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = ThumbnailCache::new(dir.path().to_path_buf()).await.unwrap();
            cache.insert(&id("abc"), "small", &[0u8; 30]).await.unwrap();
        }
        let reopened = ThumbnailCache::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reopened.total_bytes(), 30);
    }
}
