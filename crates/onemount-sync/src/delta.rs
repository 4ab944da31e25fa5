//! The delta engine (spec section 4.7).
//!
//! A background loop that polls the cloud for a changeset since a saved
//! cursor, applies changes to the graph, and manages the cursor. A
//! secondary push channel accelerates event delivery without replacing
//! the poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use onemount_conflict::ConflictNamer;
use onemount_core::config::DeltaConfig;
use onemount_core::domain::ids::{ItemId, NodeId};
use onemount_core::domain::item::{Item, ItemKind, ItemState};
use onemount_core::ports::content_cache::ContentCache;
use onemount_core::ports::persistent_store::{Bucket, PersistentStore};
use onemount_core::ports::remote_client::{ChangedItem, ItemMetadataDto, RemoteClient, RemoteError};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{AuditLog, CorrelationId};
use crate::graph::{GraphError, InodeGraph};
use crate::upload::{UploadManager, UploadPriority};

const CURSOR_KEY: &[u8] = b"cursor";
const CURSOR_UPDATED_AT_KEY: &[u8] = b"cursor_updated_at";

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Polls `remote.delta(cursor)`, applies changes to the inode graph, and
/// manages the persisted cursor (spec section 4.7). Owns the push-channel
/// receiver loop as a secondary accelerant.
pub struct DeltaEngine {
    graph: Arc<InodeGraph>,
    store: Arc<dyn PersistentStore>,
    cache: Arc<dyn ContentCache>,
    remote: Arc<dyn RemoteClient>,
    upload: Arc<UploadManager>,
    config: DeltaConfig,
    push_healthy: AtomicBool,
    reconnected: broadcast::Sender<()>,
}

impl DeltaEngine {
    pub fn new(
        graph: Arc<InodeGraph>,
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn ContentCache>,
        remote: Arc<dyn RemoteClient>,
        upload: Arc<UploadManager>,
        config: DeltaConfig,
    ) -> Self {
        let (reconnected, _rx) = broadcast::channel(8);
        let push_healthy = AtomicBool::new(!config.polling_only);
        Self {
            graph,
            store,
            cache,
            remote,
            upload,
            config,
            push_healthy,
            reconnected,
        }
    }

    /// Fires once whenever the engine transitions from offline back to
    /// online, after the triggering poll has fully applied (spec section
    /// 4.7: "recovery triggers the offline-change replay", section 4.8).
    pub fn subscribe_reconnected(&self) -> broadcast::Receiver<()> {
        self.reconnected.subscribe()
    }

    /// Spawns the poll loop, and the push-channel receiver loop unless
    /// `polling_only` is configured. Mirrors
    /// [`crate::download::DownloadManager::spawn_workers`]'s shape.
    pub fn spawn(self: &Arc<Self>, cancellation: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        let poll_engine = Arc::clone(self);
        let poll_cancel = cancellation.clone();
        handles.push(tokio::spawn(async move { poll_engine.run_poll_loop(poll_cancel).await }));

        if !self.config.polling_only {
            let push_engine = Arc::clone(self);
            handles.push(tokio::spawn(async move { push_engine.run_push_loop(cancellation).await }));
        }
        handles
    }

    fn effective_interval(&self) -> Duration {
        if self.config.polling_only || !self.push_healthy.load(Ordering::Relaxed) {
            self.config.effective_push_fallback_interval()
        } else {
            Duration::from_secs(self.config.poll_interval_secs.max(1))
        }
    }

    async fn run_poll_loop(&self, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    debug!("delta poll loop stopping");
                    return;
                }
                () = tokio::time::sleep(self.effective_interval()) => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "delta poll failed");
                    }
                }
            }
        }
    }

    async fn run_push_loop(&self, cancellation: CancellationToken) {
        let mut rx = match self.remote.subscribe_changes().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "push channel subscription failed, falling back to polling");
                self.push_healthy.store(false, Ordering::Relaxed);
                return;
            }
        };
        loop {
            tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    debug!("delta push loop stopping");
                    return;
                }
                token = rx.recv() => {
                    let Some(_token) = token else {
                        warn!("push channel closed, falling back to polling interval");
                        self.push_healthy.store(false, Ordering::Relaxed);
                        return;
                    };
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "delta poll triggered by push channel failed");
                    }
                }
            }
        }
    }

    /// Runs one full poll cycle: fetches pages from the persisted cursor
    /// until `has_more` is false, applying and persisting each page in
    /// turn. Returns the number of changes applied.
    pub async fn poll_once(&self) -> Result<usize, DeltaError> {
        let was_offline = self.graph.is_offline();
        let mut cursor = self.load_cursor().await;
        let mut total = 0usize;

        loop {
            let changeset = match self.remote.delta(cursor.as_deref()).await {
                Ok(changeset) => changeset,
                Err(e) => {
                    if matches!(e, RemoteError::Offline | RemoteError::Timeout | RemoteError::TransientServer(_)) {
                        self.graph.set_offline(true);
                    }
                    return Err(e.into());
                }
            };

            let correlation_id = CorrelationId::new();
            for change in &changeset.items {
                if let Err(e) = self.apply_change(change, correlation_id).await {
                    warn!(item_id = %change.metadata.id, error = %e, "failed to apply delta change");
                }
            }
            total += changeset.items.len();
            self.persist_cursor(&changeset.next_cursor).await;
            AuditLog::delta_page_applied(correlation_id, changeset.items.len(), &changeset.next_cursor);

            cursor = Some(changeset.next_cursor);
            if !changeset.has_more {
                break;
            }
        }

        self.graph.set_offline(false);
        if was_offline {
            info!("delta engine reconnected, signalling offline-change replay");
            let _ = self.reconnected.send(());
        }
        Ok(total)
    }

    async fn load_cursor(&self) -> Option<String> {
        self.store
            .get(Bucket::Delta, CURSOR_KEY)
            .await
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn persist_cursor(&self, cursor: &str) {
        if let Err(e) = self.store.put(Bucket::Delta, CURSOR_KEY, cursor.as_bytes()).await {
            warn!(error = %e, "failed to persist delta cursor");
            return;
        }
        let now = Utc::now().to_rfc3339();
        if let Err(e) = self.store.put(Bucket::Delta, CURSOR_UPDATED_AT_KEY, now.as_bytes()).await {
            warn!(error = %e, "failed to persist delta cursor timestamp");
        }
        if let Err(e) = self.store.flush().await {
            warn!(error = %e, "failed to flush store after cursor advance");
        }
    }

    /// Reads the persisted cursor and the time it was last advanced,
    /// without needing a running engine. Used by the `stats` CLI surface
    /// (spec section 6, "stats subcommand").
    pub async fn read_cursor_state(
        store: &dyn PersistentStore,
    ) -> (Option<String>, Option<DateTime<Utc>>) {
        let cursor = store
            .get(Bucket::Delta, CURSOR_KEY)
            .await
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        let updated_at = store
            .get(Bucket::Delta, CURSOR_UPDATED_AT_KEY)
            .await
            .ok()
            .flatten()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        (cursor, updated_at)
    }

    async fn apply_change(&self, change: &ChangedItem, correlation_id: CorrelationId) -> Result<(), GraphError> {
        let id = change.metadata.id.clone();

        if change.is_deleted {
            if let Some(existing) = self.graph.resolve_by_id(&id).await? {
                if existing.state != ItemState::DirtyLocal {
                    self.graph.delete(&id).await?;
                }
            }
            return Ok(());
        }

        let Some(existing) = self.graph.resolve_by_id(&id).await? else {
            self.insert_ghost(&change.metadata).await?;
            return Ok(());
        };

        if existing.etag.as_deref() == Some(change.metadata.etag.as_str()) {
            self.update_metadata_only(&existing, &change.metadata).await?;
            return Ok(());
        }

        match existing.state {
            ItemState::Hydrated => {
                let _ = self.cache.delete(&id).await;
                self.graph
                    .update(&id, |item| {
                        item.state = ItemState::Ghost;
                        item.content_hash = None;
                    })
                    .await?;
                self.update_metadata_only(&existing, &change.metadata).await?;
            }
            ItemState::DirtyLocal => {
                self.handle_conflict(&existing, &change.metadata, correlation_id).await?;
            }
            _ => {
                self.update_metadata_only(&existing, &change.metadata).await?;
            }
        }

        Ok(())
    }

    /// Inserts a remote item the graph has never seen as a new `Ghost`
    /// (spec section 4.7, "If absent, insert a new Ghost"). Virtual
    /// entries are local-wins: if the incoming name collides with a
    /// virtual sibling, the remote item is disambiguated rather than
    /// overwriting or blocking on the virtual entry (spec section 9,
    /// third Open Question).
    async fn insert_ghost(&self, dto: &ItemMetadataDto) -> Result<(), GraphError> {
        let name = self.disambiguate_against_virtual(dto).await;
        let mut item = if dto.is_directory {
            Item::new_directory(dto.id.clone(), NodeId::new(0), name, dto.parent_id.clone())
        } else {
            Item::new_file(dto.id.clone(), NodeId::new(0), name, dto.parent_id.clone(), dto.size)
        };
        item.etag = Some(dto.etag.clone());
        item.modified_at = dto.modified_at;
        item.created_at = dto.created_at;
        self.graph.insert(item).await?;
        Ok(())
    }

    async fn disambiguate_against_virtual(&self, dto: &ItemMetadataDto) -> String {
        let Some(parent_id) = dto.parent_id.clone() else {
            return dto.name.clone();
        };
        let Ok(siblings) = self.graph.children(&parent_id).await else {
            return dto.name.clone();
        };
        let name_key = dto.name.to_lowercase();
        let collides = siblings.iter().any(|s| s.is_virtual && s.name.to_lowercase() == name_key);
        if collides {
            warn!(name = %dto.name, "remote item collides with a virtual entry, disambiguating");
            format!("{} (cloud)", dto.name)
        } else {
            dto.name.clone()
        }
    }

    /// Updates name/parent/timestamps/size/etag only; does not touch
    /// content state (spec section 4.7, "only update metadata fields").
    async fn update_metadata_only(&self, existing: &Item, dto: &ItemMetadataDto) -> Result<(), GraphError> {
        self.graph
            .update(&existing.id, |item| {
                item.size = dto.size;
                item.etag = Some(dto.etag.clone());
                item.modified_at = dto.modified_at;
                item.created_at = dto.created_at;
            })
            .await?;
        self.rehome_if_needed(&existing.id, existing, dto).await
    }

    /// Re-homes the item if its parent or name changed (spec section 4.7,
    /// step 3).
    async fn rehome_if_needed(&self, id: &ItemId, existing: &Item, dto: &ItemMetadataDto) -> Result<(), GraphError> {
        let Some(new_parent) = dto.parent_id.clone() else {
            return Ok(());
        };
        if existing.parent_id.as_ref() != Some(&new_parent) || existing.name != dto.name {
            self.graph.rename(id, &new_parent, &dto.name).await?;
        }
        Ok(())
    }

    /// Transitions a locally dirty item to `Conflict`: makes a sibling
    /// copy carrying the local content under a conflict-suffixed name,
    /// then resets the original to the remote version (spec section 4.7,
    /// step 2).
    async fn handle_conflict(
        &self,
        existing: &Item,
        dto: &ItemMetadataDto,
        correlation_id: CorrelationId,
    ) -> Result<(), GraphError> {
        let id = existing.id.clone();
        self.graph.update(&id, |item| item.state = ItemState::Conflict).await?;

        let sibling_id = ItemId::new_local();
        let conflict_name = ConflictNamer::generate(&existing.name);
        let _ = self.cache.rename(&id, &sibling_id).await;

        let sibling = Item {
            id: sibling_id.clone(),
            node_id: NodeId::new(0),
            name: conflict_name.clone(),
            parent_id: existing.parent_id.clone(),
            kind: existing.kind,
            size: existing.size,
            etag: None,
            content_hash: existing.content_hash.clone(),
            modified_at: existing.modified_at,
            created_at: existing.created_at,
            state: ItemState::DirtyLocal,
            children: if existing.kind == ItemKind::Directory { Some(Vec::new()) } else { None },
            has_changes: true,
            is_virtual: false,
            last_error: None,
        };
        self.graph.insert(sibling).await?;
        self.upload.enqueue(sibling_id.clone(), UploadPriority::Low).await;

        self.graph
            .update(&id, |item| {
                item.etag = Some(dto.etag.clone());
                item.size = dto.size;
                item.modified_at = dto.modified_at;
                item.created_at = dto.created_at;
                item.state = ItemState::Ghost;
                item.has_changes = false;
                item.content_hash = None;
            })
            .await?;

        AuditLog::conflict_detected(correlation_id, id.as_str(), &conflict_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onemount_remote::mock::MockRemoteClient;
    use onemount_store::content_cache::DiskContentCache;
    use onemount_store::sled_store::SledStore;

    async fn setup() -> (Arc<DeltaEngine>, Arc<InodeGraph>, Arc<MockRemoteClient>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn PersistentStore> = Arc::new(SledStore::open(&dir.path().join("db")).await.unwrap());
        let cache: Arc<dyn ContentCache> = Arc::new(DiskContentCache::new(dir.path().join("cache")).await.unwrap());
        let remote = Arc::new(MockRemoteClient::new());
        let remote_dyn: Arc<dyn RemoteClient> = remote.clone();
        let graph = Arc::new(InodeGraph::new(store.clone(), cache.clone(), remote_dyn.clone()));
        let upload = Arc::new(UploadManager::new(
            graph.clone(),
            store.clone(),
            cache.clone(),
            remote_dyn.clone(),
            Default::default(),
            CancellationToken::new(),
        ));
        let engine = Arc::new(DeltaEngine::new(graph.clone(), store, cache, remote_dyn, upload, DeltaConfig::default()));
        (engine, graph, remote, dir)
    }

    #[tokio::test]
    async fn new_remote_item_is_inserted_as_ghost() {
        let (engine, graph, remote, _dir) = setup().await;
        let item = remote.upload_small(&ItemId::root(), "a.txt", b"hello").await.unwrap();
        remote.push_change(item.clone(), false);

        let applied = engine.poll_once().await.unwrap();
        assert_eq!(applied, 1);

        let graph_item = graph.resolve_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(graph_item.state, ItemState::Ghost);
        assert_eq!(graph_item.etag.as_deref(), Some(item.etag.as_str()));
    }

    #[tokio::test]
    async fn deletion_of_non_dirty_item_removes_it_from_graph() {
        let (engine, graph, remote, _dir) = setup().await;
        let item = remote.upload_small(&ItemId::root(), "a.txt", b"hello").await.unwrap();
        remote.push_change(item.clone(), false);
        engine.poll_once().await.unwrap();

        let mut deleted = item.clone();
        deleted.etag = "deleted".into();
        remote.push_change(deleted, true);
        engine.poll_once().await.unwrap();

        assert!(graph.resolve_by_id(&item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn etag_change_on_hydrated_item_invalidates_to_ghost() {
        let (engine, graph, remote, _dir) = setup().await;
        let item = remote.upload_small(&ItemId::root(), "a.txt", b"hello").await.unwrap();
        remote.push_change(item.clone(), false);
        engine.poll_once().await.unwrap();
        graph.update(&item.id, |i| i.state = ItemState::Hydrated).await.unwrap();

        let mut changed = item.clone();
        changed.etag = "new-etag".into();
        remote.push_change(changed, false);
        engine.poll_once().await.unwrap();

        let graph_item = graph.resolve_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(graph_item.state, ItemState::Ghost);
        assert_eq!(graph_item.etag.as_deref(), Some("new-etag"));
    }

    #[tokio::test]
    async fn dirty_local_conflict_creates_sibling_and_resets_original() {
        let (engine, graph, remote, _dir) = setup().await;
        let item = remote.upload_small(&ItemId::root(), "doc.txt", b"local edit").await.unwrap();
        remote.push_change(item.clone(), false);
        engine.poll_once().await.unwrap();
        graph.update(&item.id, |i| i.mark_dirty()).await.unwrap();

        let mut changed = item.clone();
        changed.etag = "remote-edit-etag".into();
        remote.push_change(changed, false);
        engine.poll_once().await.unwrap();

        let original = graph.resolve_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(original.state, ItemState::Ghost);
        assert_eq!(original.etag.as_deref(), Some("remote-edit-etag"));

        let root_children = graph.children(&ItemId::root()).await.unwrap();
        assert!(root_children.iter().any(|c| c.name.contains("conflicted copy") && c.state == ItemState::DirtyLocal));
    }

    #[tokio::test]
    async fn cursor_persists_across_poll_calls() {
        let (engine, _graph, remote, _dir) = setup().await;
        let item = remote.upload_small(&ItemId::root(), "a.txt", b"hello").await.unwrap();
        remote.push_change(item, false);
        engine.poll_once().await.unwrap();

        let cursor_after_first = engine.load_cursor().await;
        assert!(cursor_after_first.is_some());

        // second call with no new changes: idempotent, no error.
        let applied = engine.poll_once().await.unwrap();
        assert_eq!(applied, 0);
    }
}
