//! The upload manager (spec section 4.6).
//!
//! One coordinator reads from two bounded priority queues (High for
//! foreground writes, Low for offline-journal replay) and dispatches up to
//! `max_in_flight` concurrent uploads. Small files go through a single
//! PUT; large files go through a chunked, resumable session, mirroring
//! the download manager's [`crate::download::DownloadManager`] structure.

use std::sync::Arc;
use std::time::Duration;

use onemount_core::config::UploadConfig;
use onemount_core::domain::ids::ItemId;
use onemount_core::domain::item::ItemState;
use onemount_core::ports::content_cache::ContentCache;
use onemount_core::ports::persistent_store::{Bucket, PersistentStore};
use onemount_core::ports::remote_client::{RemoteClient, UploadSession};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLog, CorrelationId};
use crate::graph::InodeGraph;

#[derive(Debug, Error, Clone)]
pub enum UploadError {
    #[error("remote error: {0}")]
    Remote(String),
    #[error("recovery attempts exhausted")]
    Exhausted,
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("invalid item: {0}")]
    Validation(String),
}

/// Dispatch priority for a queued upload (spec section 4.6: "Items
/// originating from foreground writes enter High; replay of offline
/// changes enters Low").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPriority {
    High,
    Low,
}

/// Resumable upload state, persisted after every successful chunk (spec
/// section 4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UploadSessionRecord {
    id: String,
    session_id: String,
    upload_url: String,
    last_successful_chunk: Option<u64>,
    bytes_uploaded: u64,
    total_chunks: u64,
    recovery_attempts: u32,
    can_resume: bool,
}

impl UploadSessionRecord {
    fn new(id: &ItemId, session: &UploadSession, size: u64, chunk_size: u64) -> Self {
        let total_chunks = size.div_ceil(chunk_size.max(1)).max(1);
        Self {
            id: id.as_str().to_string(),
            session_id: session.session_id.clone(),
            upload_url: session.upload_url.clone(),
            last_successful_chunk: None,
            bytes_uploaded: 0,
            total_chunks,
            recovery_attempts: 0,
            can_resume: true,
        }
    }

    fn next_chunk(&self) -> u64 {
        self.last_successful_chunk.map_or(0, |c| c + 1)
    }

    fn key(&self) -> Vec<u8> {
        format!("upload/{}", self.id).into_bytes()
    }

    fn as_session(&self) -> UploadSession {
        UploadSession {
            session_id: self.session_id.clone(),
            upload_url: self.upload_url.clone(),
        }
    }
}

type Waiter = oneshot::Sender<Result<ItemId, UploadError>>;

struct QueuedUpload {
    id: ItemId,
    waiter: Option<Waiter>,
}

/// Owns the two priority queues and dispatches to bounded concurrent
/// upload tasks (spec section 4.6).
pub struct UploadManager {
    graph: Arc<InodeGraph>,
    store: Arc<dyn PersistentStore>,
    cache: Arc<dyn ContentCache>,
    remote: Arc<dyn RemoteClient>,
    config: UploadConfig,
    high_tx: mpsc::Sender<QueuedUpload>,
    high_rx: Arc<Mutex<mpsc::Receiver<QueuedUpload>>>,
    low_tx: mpsc::Sender<QueuedUpload>,
    low_rx: Arc<Mutex<mpsc::Receiver<QueuedUpload>>>,
    in_flight: Arc<Semaphore>,
    cancellation: CancellationToken,
}

impl UploadManager {
    pub fn new(
        graph: Arc<InodeGraph>,
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn ContentCache>,
        remote: Arc<dyn RemoteClient>,
        config: UploadConfig,
        cancellation: CancellationToken,
    ) -> Self {
        let (high_tx, high_rx) = mpsc::channel(1024);
        let (low_tx, low_rx) = mpsc::channel(1024);
        let max_in_flight = config.max_in_flight;
        Self {
            graph,
            store,
            cache,
            remote,
            config,
            high_tx,
            high_rx: Arc::new(Mutex::new(high_rx)),
            low_tx,
            low_rx: Arc::new(Mutex::new(low_rx)),
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            cancellation,
        }
    }

    /// Spawns the single coordinator task. Returns its join handle so the
    /// caller can await it during shutdown.
    pub fn spawn_coordinator(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run_coordinator().await })
    }

    /// Rehydrates incomplete upload sessions persisted in the sessions
    /// bucket into the High queue (spec section 4.6, startup behaviour):
    /// these were foreground writes interrupted by a restart.
    pub async fn rehydrate_pending(&self) -> anyhow::Result<()> {
        let entries = self.store.range(Bucket::Sessions, b"upload/").await?;
        for (_, value) in entries {
            if let Ok(session) = serde_json::from_slice::<UploadSessionRecord>(&value) {
                let id = ItemId::from(session.id);
                debug!(item_id = %id, "rehydrating pending upload");
                self.enqueue(id, UploadPriority::High).await;
            }
        }
        Ok(())
    }

    /// Enqueues `id` for upload without waiting for completion (spec
    /// section 4.10, `release`/`create`).
    pub async fn enqueue(&self, id: ItemId, priority: UploadPriority) {
        let queued = QueuedUpload { id, waiter: None };
        let tx = match priority {
            UploadPriority::High => &self.high_tx,
            UploadPriority::Low => &self.low_tx,
        };
        let _ = tx.send(queued).await;
    }

    /// Enqueues `id` and waits for the upload to finish, returning the
    /// item's current id (which may have changed via `change_id`).
    pub async fn enqueue_and_wait(&self, id: ItemId, priority: UploadPriority) -> Result<ItemId, UploadError> {
        let (tx, rx) = oneshot::channel();
        let queued = QueuedUpload { id, waiter: Some(tx) };
        let sender = match priority {
            UploadPriority::High => &self.high_tx,
            UploadPriority::Low => &self.low_tx,
        };
        let _ = sender.send(queued).await;
        rx.await.unwrap_or(Err(UploadError::Exhausted))
    }

    async fn run_coordinator(&self) {
        loop {
            let queued = {
                let mut high = self.high_rx.lock().await;
                let mut low = self.low_rx.lock().await;
                tokio::select! {
                    biased;
                    () = self.cancellation.cancelled() => None,
                    Some(q) = high.recv() => Some(q),
                    Some(q) = low.recv() => Some(q),
                    else => None,
                }
            };
            let Some(queued) = queued else {
                debug!("upload coordinator stopping");
                return;
            };

            let Ok(permit) = self.in_flight.clone().acquire_owned().await else {
                return;
            };
            let id = queued.id;
            let waiter = queued.waiter;
            let this = self.clone_refs();
            tokio::spawn(async move {
                let result = this.upload_one(&id).await;
                drop(permit);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(result);
                }
            });
        }
    }

    /// Cheap clone of the `Arc`-backed dependencies, used so each spawned
    /// upload task doesn't need to borrow `self` across an await point.
    fn clone_refs(&self) -> Arc<UploadWorker> {
        Arc::new(UploadWorker {
            graph: self.graph.clone(),
            store: self.store.clone(),
            cache: self.cache.clone(),
            remote: self.remote.clone(),
            config: self.config.clone(),
        })
    }
}

/// The per-upload logic, split out from [`UploadManager`] so a spawned
/// task can own its dependencies independently of the coordinator loop.
struct UploadWorker {
    graph: Arc<InodeGraph>,
    store: Arc<dyn PersistentStore>,
    cache: Arc<dyn ContentCache>,
    remote: Arc<dyn RemoteClient>,
    config: UploadConfig,
}

impl UploadWorker {
    async fn upload_one(&self, id: &ItemId) -> Result<ItemId, UploadError> {
        let correlation_id = CorrelationId::new();
        let Ok(Some(item)) = self.graph.resolve_by_id(id).await else {
            return Err(UploadError::NotFound(id.to_string()));
        };
        let Some(parent_id) = item.parent_id.clone() else {
            return Err(UploadError::Validation(format!("item {id} has no parent")));
        };

        AuditLog::upload_started(correlation_id, id.as_str(), item.size);

        let body = self.read_cached_body(id).await?;
        let result = if (body.len() as u64) < self.config.small_file_threshold_bytes {
            self.upload_small(id, &parent_id, &item.name, &body).await
        } else {
            self.upload_large(id, &parent_id, &item.name, &body, correlation_id).await
        };

        match result {
            Ok(new_id) => {
                AuditLog::upload_committed(correlation_id, id.as_str(), new_id.as_str());
                Ok(new_id)
            }
            Err(err) => {
                error!(item_id = %id, error = %err, "upload failed permanently");
                AuditLog::upload_failed(correlation_id, id.as_str(), &err.to_string());
                let reason = err.to_string();
                if let Err(e) = self.graph.update(id, |item| item.mark_error(reason.clone())).await {
                    warn!(item_id = %id, error = %e, "failed to mark item errored");
                }
                Err(err)
            }
        }
    }

    async fn read_cached_body(&self, id: &ItemId) -> Result<Vec<u8>, UploadError> {
        let mut file = self.cache.open(id).await.map_err(|e| UploadError::Cache(e.to_string()))?;
        file.seek(std::io::SeekFrom::Start(0)).await.map_err(|e| UploadError::Cache(e.to_string()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.map_err(|e| UploadError::Cache(e.to_string()))?;
        Ok(buf)
    }

    /// Single-request upload path for files under the small-file threshold
    /// (spec section 4.6).
    async fn upload_small(&self, id: &ItemId, parent: &ItemId, name: &str, body: &[u8]) -> Result<ItemId, UploadError> {
        let dto = self
            .retry(|| async { self.remote.upload_small(parent, name, body).await })
            .await
            .map_err(UploadError::Remote)?;
        self.commit(id, dto).await
    }

    /// Chunked, resumable upload path for files at or above the
    /// small-file threshold (spec section 4.6).
    async fn upload_large(
        &self,
        id: &ItemId,
        parent: &ItemId,
        name: &str,
        body: &[u8],
        correlation_id: CorrelationId,
    ) -> Result<ItemId, UploadError> {
        let chunk_size = self.config.chunk_size_bytes.max(1);
        let mut session = self.load_or_create_session(id, parent, name, body.len() as u64, chunk_size).await?;
        let mut total_attempts = 0u32;
        let mut restarts = 0u32;

        loop {
            if session.next_chunk() >= session.total_chunks {
                break;
            }
            let chunk_index = session.next_chunk();
            let start = chunk_index * chunk_size;
            let end = (start + chunk_size).min(body.len() as u64);
            let remote_session = session.as_session();

            match self.remote.upload_chunk(&remote_session, start..end, &body[start as usize..end as usize]).await {
                Ok(()) => {
                    session.bytes_uploaded += end - start;
                    session.last_successful_chunk = Some(chunk_index);
                    session.recovery_attempts = 0;
                    self.persist_session(&session).await;
                }
                Err(e) if e.is_retryable() => {
                    total_attempts += 1;
                    session.recovery_attempts += 1;
                    if total_attempts > self.config.max_attempts {
                        self.clear_session(&session).await;
                        return Err(UploadError::Exhausted);
                    }
                    if session.recovery_attempts > self.config.max_resume_attempts {
                        restarts += 1;
                        warn!(item_id = %id, restarts, "upload resume attempts exhausted, restarting session");
                        session = self.restart_session(id, parent, name, body.len() as u64, chunk_size).await?;
                        continue;
                    }
                    let backoff = Duration::from_millis(200 * 2u64.pow(session.recovery_attempts.min(6)));
                    warn!(item_id = %id, attempt = session.recovery_attempts, ?backoff, "upload chunk failed, retrying");
                    self.persist_session(&session).await;
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.clear_session(&session).await;
                    return Err(UploadError::Remote(e.to_string()));
                }
            }
        }

        let remote_session = session.as_session();
        let dto = match self.remote.commit_upload(&remote_session).await {
            Ok(dto) => dto,
            Err(e) => {
                self.clear_session(&session).await;
                return Err(UploadError::Remote(e.to_string()));
            }
        };
        self.clear_session(&session).await;
        info!(item_id = %id, bytes = session.bytes_uploaded, correlation_id = %correlation_id, "chunked upload committed");
        self.commit(id, dto).await
    }

    async fn retry<F, Fut>(&self, mut call: F) -> Result<onemount_core::ports::remote_client::ItemMetadataDto, String>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<onemount_core::ports::remote_client::ItemMetadataDto, onemount_core::ports::remote_client::RemoteError>>,
    {
        let mut attempts = 0u32;
        loop {
            match call().await {
                Ok(dto) => return Ok(dto),
                Err(e) if e.is_retryable() && attempts < self.config.max_attempts => {
                    attempts += 1;
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempts.min(6)));
                    warn!(attempt = attempts, ?backoff, "small upload failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    /// Swaps the local id for the server-assigned one, updates etag/size,
    /// clears `has_changes`, and transitions to `Hydrated` (spec section
    /// 4.6, "On success").
    async fn commit(&self, id: &ItemId, dto: onemount_core::ports::remote_client::ItemMetadataDto) -> Result<ItemId, UploadError> {
        let final_id = if id.is_local() {
            self.graph
                .change_id(id, dto.id.clone())
                .await
                .map_err(|e| UploadError::Remote(e.to_string()))?;
            dto.id.clone()
        } else {
            id.clone()
        };

        self.graph
            .update(&final_id, |item| {
                item.etag = Some(dto.etag.clone());
                item.size = dto.size;
                item.has_changes = false;
                item.state = ItemState::Hydrated;
            })
            .await
            .map_err(|e| UploadError::Remote(e.to_string()))?;

        Ok(final_id)
    }

    async fn load_or_create_session(
        &self,
        id: &ItemId,
        parent: &ItemId,
        name: &str,
        size: u64,
        chunk_size: u64,
    ) -> Result<UploadSessionRecord, UploadError> {
        let key = format!("upload/{}", id.as_str()).into_bytes();
        if let Ok(Some(bytes)) = self.store.get(Bucket::Sessions, &key).await {
            if let Ok(session) = serde_json::from_slice::<UploadSessionRecord>(&bytes) {
                if session.can_resume {
                    return Ok(session);
                }
            }
        }
        self.restart_session(id, parent, name, size, chunk_size).await
    }

    async fn restart_session(
        &self,
        id: &ItemId,
        parent: &ItemId,
        name: &str,
        size: u64,
        chunk_size: u64,
    ) -> Result<UploadSessionRecord, UploadError> {
        let session = self
            .remote
            .start_upload_session(parent, name, size)
            .await
            .map_err(|e| UploadError::Remote(e.to_string()))?;
        let record = UploadSessionRecord::new(id, &session, size, chunk_size);
        self.persist_session(&record).await;
        Ok(record)
    }

    async fn persist_session(&self, session: &UploadSessionRecord) {
        if let Ok(bytes) = serde_json::to_vec(session) {
            if let Err(e) = self.store.put(Bucket::Sessions, &session.key(), &bytes).await {
                warn!(item_id = %session.id, error = %e, "failed to persist upload session");
            }
        }
    }

    async fn clear_session(&self, session: &UploadSessionRecord) {
        if let Err(e) = self.store.delete(Bucket::Sessions, &session.key()).await {
            warn!(item_id = %session.id, error = %e, "failed to clear upload session record");
        }
        if let Err(e) = self.store.flush().await {
            warn!(error = %e, "failed to flush store after upload commit");
        }
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
    async fn small_file_upload_swaps_local_id_for_remote_id() {
        let (graph, store, cache, remote, _dir) = setup().await;
        let local_id = ItemId::new_local();
        let mut item = Item::new_file(local_id.clone(), NodeId::new(2), "hello.txt".into(), Some(ItemId::root()), 3);
        item.mark_dirty();
        graph.insert(item).await.unwrap();
        cache.insert(&local_id, b"hi\n").await.unwrap();

        let remote_dyn: Arc<dyn RemoteClient> = remote.clone();
        let manager = Arc::new(UploadManager::new(
            graph.clone(),
            store,
            cache,
            remote_dyn,
            UploadConfig::default(),
            CancellationToken::new(),
        ));
        manager.spawn_coordinator();
        let new_id = manager.enqueue_and_wait(local_id.clone(), UploadPriority::High).await.unwrap();

        assert!(graph.resolve_by_id(&local_id).await.unwrap().is_none());
        let item = graph.resolve_by_id(&new_id).await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::Hydrated);
        assert!(!item.has_changes);
        assert!(item.etag.is_some());
    }

    #[tokio::test]
    async fn large_file_upload_commits_via_chunked_session() {
        let (graph, store, cache, remote, _dir) = setup().await;
        let local_id = ItemId::new_local();
        let body = vec![9u8; 25];
        let mut item = Item::new_file(local_id.clone(), NodeId::new(2), "big.bin".into(), Some(ItemId::root()), body.len() as u64);
        item.mark_dirty();
        graph.insert(item).await.unwrap();
        cache.insert(&local_id, &body).await.unwrap();

        let remote_dyn: Arc<dyn RemoteClient> = remote.clone();
        let manager = Arc::new(UploadManager::new(
            graph.clone(),
            store,
            cache.clone(),
            remote_dyn,
            UploadConfig { small_file_threshold_bytes: 10, chunk_size_bytes: 10, ..Default::default() },
            CancellationToken::new(),
        ));
        manager.spawn_coordinator();
        let new_id = manager.enqueue_and_wait(local_id, UploadPriority::High).await.unwrap();

        let item = graph.resolve_by_id(&new_id).await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::Hydrated);
        assert_eq!(item.size, body.len() as u64);

        let entries = cache.total_bytes().await;
        assert!(entries >= body.len() as u64);
    }

    #[tokio::test]
    async fn persistent_chunk_failure_lands_in_error_not_an_infinite_restart_loop() {
        let (graph, store, cache, remote, _dir) = setup().await;
        let local_id = ItemId::new_local();
        let body = vec![9u8; 25];
        let mut item = Item::new_file(local_id.clone(), NodeId::new(2), "big.bin".into(), Some(ItemId::root()), body.len() as u64);
        item.mark_dirty();
        graph.insert(item).await.unwrap();
        cache.insert(&local_id, &body).await.unwrap();
        remote.fail_all_chunks(onemount_core::ports::remote_client::RemoteError::TransientServer("down".into()));

        let remote_dyn: Arc<dyn RemoteClient> = remote.clone();
        let manager = Arc::new(UploadManager::new(
            graph.clone(),
            store,
            cache,
            remote_dyn,
            UploadConfig {
                small_file_threshold_bytes: 10,
                chunk_size_bytes: 10,
                max_attempts: 5,
                max_resume_attempts: 3,
                ..Default::default()
            },
            CancellationToken::new(),
        ));
        manager.spawn_coordinator();
        let err = manager.enqueue_and_wait(local_id.clone(), UploadPriority::High).await.unwrap_err();

        assert!(matches!(err, UploadError::Exhausted));
        let item = graph.resolve_by_id(&local_id).await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::Error);
        assert!(item.last_error.is_some());
    }
}
