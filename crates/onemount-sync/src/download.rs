//! The download manager (spec section 4.5).
//!
//! A bounded FIFO queue of item ids drained by a fixed-size worker pool.
//! Each worker streams a file's body in chunks, writing each chunk into
//! the content cache and persisting a resumable [`DownloadSession`]
//! record after every successful chunk.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use onemount_core::config::DownloadConfig;
use onemount_core::domain::ids::ItemId;
use onemount_core::domain::item::ItemState;
use onemount_core::ports::content_cache::ContentCache;
use onemount_core::ports::persistent_store::{Bucket, PersistentStore};
use onemount_core::ports::remote_client::{RemoteClient, RemoteError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLog, CorrelationId};
use crate::graph::InodeGraph;

#[derive(Debug, Error, Clone)]
pub enum DownloadError {
    #[error("remote error: {0}")]
    Remote(String),
    #[error("recovery attempts exhausted")]
    Exhausted,
    #[error("item not found: {0}")]
    NotFound(String),
}

/// Resumable download state, persisted after every successful chunk
/// (spec section 4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DownloadSession {
    id: String,
    size: u64,
    bytes_downloaded: u64,
    last_successful_chunk: Option<u64>,
    total_chunks: u64,
    chunk_size: u64,
    recovery_attempts: u32,
}

impl DownloadSession {
    fn new(id: &ItemId, size: u64, chunk_size: u64) -> Self {
        let total_chunks = size.div_ceil(chunk_size.max(1)).max(1);
        Self {
            id: id.as_str().to_string(),
            size,
            bytes_downloaded: 0,
            last_successful_chunk: None,
            total_chunks,
            chunk_size,
            recovery_attempts: 0,
        }
    }

    fn next_chunk(&self) -> u64 {
        self.last_successful_chunk.map_or(0, |c| c + 1)
    }

    fn key(&self) -> Vec<u8> {
        format!("download/{}", self.id).into_bytes()
    }
}

type Waiter = oneshot::Sender<Result<(), DownloadError>>;

/// Owns the download request queue and worker pool.
pub struct DownloadManager {
    graph: Arc<InodeGraph>,
    store: Arc<dyn PersistentStore>,
    cache: Arc<dyn ContentCache>,
    remote: Arc<dyn RemoteClient>,
    config: DownloadConfig,
    /// `CacheConfig::max_cache_size_bytes`; 0 means unlimited. Checked
    /// after every completed hydration (spec section 4.2, `enforce_ceiling`).
    max_cache_size_bytes: u64,
    sender: mpsc::Sender<ItemId>,
    receiver: Arc<Mutex<mpsc::Receiver<ItemId>>>,
    waiters: Arc<DashMap<ItemId, Vec<Waiter>>>,
    cancellation: CancellationToken,
}

impl DownloadManager {
    pub fn new(
        graph: Arc<InodeGraph>,
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn ContentCache>,
        remote: Arc<dyn RemoteClient>,
        config: DownloadConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self::with_cache_ceiling(graph, store, cache, remote, config, 0, cancellation)
    }

    /// Like [`Self::new`], additionally wiring `max_cache_size_bytes` so
    /// completed hydrations enforce the content cache's size ceiling
    /// (spec section 4.2).
    pub fn with_cache_ceiling(
        graph: Arc<InodeGraph>,
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn ContentCache>,
        remote: Arc<dyn RemoteClient>,
        config: DownloadConfig,
        max_cache_size_bytes: u64,
        cancellation: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(1024);
        Self {
            graph,
            store,
            cache,
            remote,
            config,
            max_cache_size_bytes,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            waiters: Arc::new(DashMap::new()),
            cancellation,
        }
    }

    /// Spawns `worker_count` worker tasks. Returns their join handles so
    /// the caller can await them during shutdown.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.worker_count)
            .map(|worker_id| {
                let manager = Arc::clone(self);
                tokio::spawn(async move { manager.run_worker(worker_id).await })
            })
            .collect()
    }

    /// Rehydrates incomplete downloads persisted in the sessions bucket
    /// into the queue (spec section 4.5, startup behaviour).
    pub async fn rehydrate_pending(&self) -> anyhow::Result<()> {
        let entries = self.store.range(Bucket::Sessions, b"download/").await?;
        for (_, value) in entries {
            if let Ok(session) = serde_json::from_slice::<DownloadSession>(&value) {
                let id = ItemId::from(session.id);
                debug!(item_id = %id, "rehydrating pending download");
                let _ = self.sender.send(id).await;
            }
        }
        Ok(())
    }

    /// Ensures `id` reaches `Hydrated`, enqueueing a download if
    /// necessary, and waits for completion (spec section 4.10, `open`).
    pub async fn ensure_hydrated(&self, id: &ItemId) -> Result<(), DownloadError> {
        let item = self
            .graph
            .resolve_by_id(id)
            .await
            .map_err(|e| DownloadError::Remote(e.to_string()))?
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))?;

        if matches!(item.state, ItemState::Hydrated | ItemState::DirtyLocal) || item.is_virtual {
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.entry(id.clone()).or_default().push(tx);

        if item.state != ItemState::Hydrating {
            self.enqueue(id.clone()).await;
        }

        rx.await.unwrap_or(Err(DownloadError::Exhausted))
    }

    pub async fn enqueue(&self, id: ItemId) {
        let _ = self.sender.send(id).await;
    }

    fn notify_waiters(&self, id: &ItemId, result: Result<(), DownloadError>) {
        if let Some((_, waiters)) = self.waiters.remove(id) {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    async fn run_worker(&self, worker_id: usize) {
        loop {
            let id = {
                let mut rx = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    () = self.cancellation.cancelled() => None,
                    id = rx.recv() => id,
                }
            };
            let Some(id) = id else {
                debug!(worker_id, "download worker stopping");
                return;
            };
            self.download_one(&id).await;
        }
    }

    async fn download_one(&self, id: &ItemId) {
        let correlation_id = CorrelationId::new();
        let Ok(Some(item)) = self.graph.resolve_by_id(id).await else {
            self.notify_waiters(id, Err(DownloadError::NotFound(id.to_string())));
            return;
        };

        AuditLog::hydration_started(correlation_id, id.as_str());
        if let Err(e) = self.graph.update(id, |item| item.state = ItemState::Hydrating).await {
            warn!(item_id = %id, error = %e, "failed to mark item hydrating");
        }

        let chunk_size = self.config.chunk_size_bytes.max(1);
        let mut session = self.load_or_create_session(id, item.size, chunk_size).await;
        let mut hasher = Sha256::new();

        loop {
            if session.next_chunk() >= session.total_chunks {
                break;
            }
            let chunk_index = session.next_chunk();
            let start = chunk_index * chunk_size;
            let end = (start + chunk_size).min(item.size);

            match self.remote.download_content(id, start..end).await {
                Ok(bytes) => {
                    if let Err(e) = self.write_chunk(id, start, &bytes).await {
                        error!(item_id = %id, error = %e, "failed writing chunk to cache");
                        self.fail(id, correlation_id, &session.key(), DownloadError::Remote(e.to_string())).await;
                        return;
                    }
                    hasher.update(&bytes);
                    session.bytes_downloaded += bytes.len() as u64;
                    session.last_successful_chunk = Some(chunk_index);
                    session.recovery_attempts = 0;
                    self.persist_session(&session).await;
                }
                Err(e) if e.is_retryable() => {
                    session.recovery_attempts += 1;
                    if session.recovery_attempts > self.config.max_recovery_attempts {
                        self.fail(id, correlation_id, &session.key(), DownloadError::Exhausted).await;
                        return;
                    }
                    let backoff = Duration::from_millis(200 * 2u64.pow(session.recovery_attempts.min(6)));
                    warn!(item_id = %id, attempt = session.recovery_attempts, ?backoff, "download chunk failed, retrying");
                    self.persist_session(&session).await;
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.fail(id, correlation_id, &session.key(), DownloadError::Remote(e.to_string())).await;
                    return;
                }
            }
        }

        let content_hash = format!("{:x}", hasher.finalize());
        if let Err(e) = self.store.delete(Bucket::Sessions, &session.key()).await {
            warn!(item_id = %id, error = %e, "failed to clear download session record");
        }
        if let Err(e) = self
            .graph
            .update(id, |item| {
                item.state = ItemState::Hydrated;
                item.content_hash = Some(content_hash);
            })
            .await
        {
            warn!(item_id = %id, error = %e, "failed to mark item hydrated");
        }
        info!(item_id = %id, bytes = session.bytes_downloaded, "hydration completed");
        AuditLog::hydration_completed(correlation_id, id.as_str(), session.bytes_downloaded);
        self.notify_waiters(id, Ok(()));

        match self.graph.enforce_cache_ceiling(self.max_cache_size_bytes).await {
            Ok(evicted) if !evicted.is_empty() => {
                debug!(count = evicted.len(), "content cache ceiling evicted hydrated items to ghost");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to enforce content cache ceiling"),
        }
    }

    async fn fail(&self, id: &ItemId, correlation_id: CorrelationId, session_key: &[u8], err: DownloadError) {
        error!(item_id = %id, error = %err, "download failed permanently");
        AuditLog::hydration_failed(correlation_id, id.as_str(), &err.to_string());
        let _ = self.store.delete(Bucket::Sessions, session_key).await;
        let reason = err.to_string();
        if let Err(e) = self.graph.update(id, |item| item.mark_error(reason)).await {
            warn!(item_id = %id, error = %e, "failed to mark item errored");
        }
        self.notify_waiters(id, Err(err));
    }

    async fn load_or_create_session(&self, id: &ItemId, size: u64, chunk_size: u64) -> DownloadSession {
        let key = format!("download/{}", id.as_str()).into_bytes();
        if let Ok(Some(bytes)) = self.store.get(Bucket::Sessions, &key).await {
            if let Ok(session) = serde_json::from_slice::<DownloadSession>(&bytes) {
                return session;
            }
        }
        DownloadSession::new(id, size, chunk_size)
    }

    async fn persist_session(&self, session: &DownloadSession) {
        if let Ok(bytes) = serde_json::to_vec(session) {
            if let Err(e) = self.store.put(Bucket::Sessions, &session.key(), &bytes).await {
                warn!(item_id = %session.id, error = %e, "failed to persist download session");
            }
        }
    }

    async fn write_chunk(&self, id: &ItemId, offset: u64, bytes: &[u8]) -> Result<(), RemoteError> {
        let mut file = self
            .cache
            .open(id)
            .await
            .map_err(|e| RemoteError::TransientServer(e.to_string()))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| RemoteError::TransientServer(e.to_string()))?;
        file.write_all(bytes).await.map_err(|e| RemoteError::TransientServer(e.to_string()))?;
        self.cache
            .note_write(id, offset + bytes.len() as u64)
            .await
            .map_err(|e| RemoteError::TransientServer(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onemount_core::domain::ids::NodeId;
    use onemount_core::domain::item::Item;
    use onemount_remote::mock::MockRemoteClient;
    use onemount_store::content_cache::DiskContentCache;
    use onemount_store::sled_store::SledStore;

    async fn setup() -> (Arc<InodeGraph>, Arc<dyn PersistentStore>, Arc<dyn ContentCache>, Arc<MockRemoteClient>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn PersistentStore> = Arc::new(SledStore::open(&dir.path().join("db")).await.unwrap());
        let cache: Arc<dyn ContentCache> = Arc::new(DiskContentCache::new(dir.path().join("cache")).await.unwrap());
        let remote = Arc::new(MockRemoteClient::new());
        let remote_dyn: Arc<dyn RemoteClient> = remote.clone();
        let graph = Arc::new(InodeGraph::new(store.clone(), cache.clone(), remote_dyn));
        (graph, store, cache, remote, dir)
    }

    #[tokio::test]
    async fn small_file_downloads_in_one_chunk_and_sets_content_hash() {
        let (graph, store, cache, remote, _dir) = setup().await;
        let uploaded = remote.upload_small(&ItemId::root(), "a.txt", b"hello world").await.unwrap();
        let item = Item::new_file(uploaded.id.clone(), NodeId::new(2), "a.txt".into(), Some(ItemId::root()), uploaded.size);
        graph.insert(item).await.unwrap();

        let manager = Arc::new(DownloadManager::new(
            graph.clone(),
            store,
            cache,
            remote.clone(),
            DownloadConfig { chunk_size_bytes: 1024, ..Default::default() },
            CancellationToken::new(),
        ));
        let handles = manager.spawn_workers();
        manager.ensure_hydrated(&uploaded.id).await.unwrap();

        let after = graph.resolve_by_id(&uploaded.id).await.unwrap().unwrap();
        assert_eq!(after.state, ItemState::Hydrated);
        assert!(after.content_hash.is_some());
        for h in handles {
            h.abort();
        }
    }

    #[tokio::test]
    async fn large_file_downloads_in_multiple_chunks() {
        let (graph, store, cache, remote, _dir) = setup().await;
        let body = vec![7u8; 5000];
        let uploaded = remote.upload_small(&ItemId::root(), "big.bin", &body).await.unwrap();
        let item = Item::new_file(uploaded.id.clone(), NodeId::new(2), "big.bin".into(), Some(ItemId::root()), uploaded.size);
        graph.insert(item).await.unwrap();

        let manager = Arc::new(DownloadManager::new(
            graph.clone(),
            store,
            cache.clone(),
            remote.clone(),
            DownloadConfig { chunk_size_bytes: 1000, ..Default::default() },
            CancellationToken::new(),
        ));
        let handles = manager.spawn_workers();
        manager.ensure_hydrated(&uploaded.id).await.unwrap();

        assert!(cache.contains(&uploaded.id).await);
        assert_eq!(cache.total_bytes().await, 5000);
        for h in handles {
            h.abort();
        }
    }

    #[tokio::test]
    async fn already_hydrated_item_does_not_redownload() {
        let (graph, store, cache, remote, _dir) = setup().await;
        let mut item = Item::new_file(ItemId::from_remote("x"), NodeId::new(2), "x.txt".into(), Some(ItemId::root()), 1);
        item.state = ItemState::Hydrated;
        graph.insert(item).await.unwrap();

        let manager = Arc::new(DownloadManager::new(graph, store, cache, remote, DownloadConfig::default(), CancellationToken::new()));
        manager.ensure_hydrated(&ItemId::from_remote("x")).await.unwrap();
    }
}
