//! The inode graph (spec section 4.1).
//!
//! Owns the mapping `id -> item` and the secondary mapping `node_id -> id`,
//! mirrored to the persistent store. Each item is behind its own
//! `tokio::sync::Mutex` (spec: "each item has its own lock protecting
//! name, parent, children, and state"); the `DashMap` holding the item
//! table is the "top-level lock" that protects the node-id table and the
//! offline flag, sharded rather than a single `RwLock` the way the
//! teacher's `DashMap`-backed state holds sessions. Network calls are
//! never made while an item lock is held.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use onemount_core::domain::ids::{ItemId, NodeId};
use onemount_core::domain::item::{Item, ItemKind, ItemState};
use onemount_core::ports::content_cache::ContentCache;
use onemount_core::ports::persistent_store::{Bucket, PersistentStore};
use onemount_core::ports::remote_client::{ItemMetadataDto, RemoteClient, RemoteError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("parent not found: {0}")]
    ParentNotFound(String),
    #[error("name {name:?} already exists under parent {parent}")]
    DuplicateName { parent: String, name: String },
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("store error: {0}")]
    Store(#[from] onemount_core::ports::persistent_store::StoreError),
    #[error("cache error: {0}")]
    Cache(#[from] onemount_core::ports::content_cache::CacheError),
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn metadata_key(id: &ItemId) -> Vec<u8> {
    id.as_str().as_bytes().to_vec()
}

fn encode_item(item: &Item) -> Result<Vec<u8>, GraphError> {
    serde_json::to_vec(item).map_err(|e| GraphError::Serialization(e.to_string()))
}

fn decode_item(bytes: &[u8]) -> Result<Item, GraphError> {
    serde_json::from_slice(bytes).map_err(|e| GraphError::Serialization(e.to_string()))
}

fn dto_to_item(dto: ItemMetadataDto, node_id: NodeId) -> Item {
    let kind = if dto.is_directory { ItemKind::Directory } else { ItemKind::File };
    Item {
        id: dto.id,
        node_id,
        name: dto.name,
        parent_id: dto.parent_id,
        kind,
        size: dto.size,
        etag: if dto.etag.is_empty() { None } else { Some(dto.etag) },
        content_hash: None,
        modified_at: dto.modified_at,
        created_at: dto.created_at,
        state: ItemState::Ghost,
        children: None,
        has_changes: false,
        is_virtual: false,
        last_error: None,
    }
}

/// The in-memory inode graph, mirrored to the persistent store (spec
/// section 4.1).
pub struct InodeGraph {
    items: DashMap<ItemId, Arc<Mutex<Item>>>,
    node_ids: DashMap<NodeId, ItemId>,
    next_node_id: AtomicU64,
    offline: AtomicBool,
    store: Arc<dyn PersistentStore>,
    cache: Arc<dyn ContentCache>,
    remote: Arc<dyn RemoteClient>,
}

impl InodeGraph {
    pub fn new(store: Arc<dyn PersistentStore>, cache: Arc<dyn ContentCache>, remote: Arc<dyn RemoteClient>) -> Self {
        let graph = Self {
            items: DashMap::new(),
            node_ids: DashMap::new(),
            next_node_id: AtomicU64::new(NodeId::ROOT.get()),
            offline: AtomicBool::new(false),
            store,
            cache,
            remote,
        };
        let root = Item::new_directory(ItemId::root(), NodeId::ROOT, String::new(), None);
        graph.node_ids.insert(NodeId::ROOT, ItemId::root());
        graph.next_node_id.store(NodeId::ROOT.get() + 1, Ordering::SeqCst);
        graph.items.insert(ItemId::root(), Arc::new(Mutex::new(root)));
        graph
    }

    /// Loads every item persisted in the `metadata` bucket into memory,
    /// rebuilding the node-id table. Call once at startup before serving
    /// any kernel request.
    pub async fn hydrate_from_store(&self) -> Result<(), GraphError> {
        let entries = self.store.range(Bucket::Metadata, b"").await?;
        let mut max_node_id = NodeId::ROOT.get();
        for (_, value) in entries {
            let item = decode_item(&value)?;
            if item.id == ItemId::root() {
                continue;
            }
            max_node_id = max_node_id.max(item.node_id.get());
            self.node_ids.insert(item.node_id, item.id.clone());
            self.items.insert(item.id.clone(), Arc::new(Mutex::new(item)));
        }
        self.next_node_id.store(max_node_id + 1, Ordering::SeqCst);
        debug!(items = self.items.len(), "inode graph hydrated from store");
        Ok(())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    fn next_node_id(&self) -> NodeId {
        NodeId::new(self.next_node_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn persist(&self, item: &Item) -> Result<(), GraphError> {
        let bytes = encode_item(item)?;
        self.store.put(Bucket::Metadata, &metadata_key(&item.id), &bytes).await?;
        Ok(())
    }

    /// Returns a clone of the item, checking memory first, then the
    /// persistent store (which repopulates memory).
    pub async fn resolve_by_id(&self, id: &ItemId) -> Result<Option<Item>, GraphError> {
        if let Some(handle) = self.items.get(id) {
            return Ok(Some(handle.lock().await.clone()));
        }
        let Some(bytes) = self.store.get(Bucket::Metadata, &metadata_key(id)).await? else {
            return Ok(None);
        };
        let item = decode_item(&bytes)?;
        self.node_ids.insert(item.node_id, item.id.clone());
        self.items.insert(item.id.clone(), Arc::new(Mutex::new(item.clone())));
        Ok(Some(item))
    }

    pub fn resolve_by_node_id(&self, node_id: NodeId) -> Option<ItemId> {
        self.node_ids.get(&node_id).map(|r| r.clone())
    }

    /// Walks from root component by component, fetching children on miss
    /// (spec section 4.1, `resolve_by_path`).
    pub async fn resolve_by_path(&self, path: &str) -> Result<Option<Item>, GraphError> {
        let mut current = ItemId::root();
        if path.trim_matches('/').is_empty() {
            return self.resolve_by_id(&current).await;
        }
        for component in path.trim_matches('/').split('/') {
            let children = self.children(&current).await?;
            let Some(child) = children.into_iter().find(|c| c.name_key() == component.to_lowercase()) else {
                return Ok(None);
            };
            current = child.id;
        }
        self.resolve_by_id(&current).await
    }

    /// Returns cached children if populated; otherwise fetches from the
    /// remote client, inserts every returned item, and persists the
    /// parent's child list. While offline and unpopulated, returns an
    /// empty set with a warning rather than an error (spec section 4.1).
    pub async fn children(&self, parent: &ItemId) -> Result<Vec<Item>, GraphError> {
        let Some(handle) = self.items.get(parent).map(|r| r.clone()) else {
            return Err(GraphError::NotFound(parent.to_string()));
        };

        let existing_children = {
            let guard = handle.lock().await;
            guard.children.clone()
        };

        if let Some(child_ids) = existing_children {
            let mut result = Vec::with_capacity(child_ids.len());
            for id in child_ids {
                if let Some(item) = self.resolve_by_id(&id).await? {
                    result.push(item);
                }
            }
            return Ok(result);
        }

        if self.is_offline() {
            warn!(parent = %parent, "children requested offline with no cached list");
            return Ok(Vec::new());
        }

        let fetched = self.remote.list_children(parent).await?;
        let mut child_ids = Vec::with_capacity(fetched.len());
        let mut result = Vec::with_capacity(fetched.len());
        for dto in fetched {
            let item = self.insert_from_remote(dto).await?;
            child_ids.push(item.id.clone());
            result.push(item);
        }

        {
            let mut guard = handle.lock().await;
            guard.children = Some(child_ids);
            self.persist(&guard).await?;
        }

        Ok(result)
    }

    /// Inserts metadata returned by the remote client, reusing the
    /// existing node id if the item is already known.
    async fn insert_from_remote(&self, dto: ItemMetadataDto) -> Result<Item, GraphError> {
        if let Some(handle) = self.items.get(&dto.id).map(|r| r.clone()) {
            let mut guard = handle.lock().await;
            guard.name = dto.name;
            guard.parent_id = dto.parent_id;
            guard.size = dto.size;
            guard.etag = if dto.etag.is_empty() { None } else { Some(dto.etag) };
            guard.modified_at = dto.modified_at;
            self.persist(&guard).await?;
            return Ok(guard.clone());
        }

        let node_id = self.next_node_id();
        let item = dto_to_item(dto, node_id);
        self.node_ids.insert(node_id, item.id.clone());
        self.persist(&item).await?;
        self.items.insert(item.id.clone(), Arc::new(Mutex::new(item.clone())));
        Ok(item)
    }

    /// Inserts a locally originated item (spec section 4.1, `insert`).
    /// Enforces the `(parent_id, lower-case name)` uniqueness invariant.
    pub async fn insert(&self, mut item: Item) -> Result<Item, GraphError> {
        if let Some(parent_id) = item.parent_id.clone() {
            self.assert_name_available(&parent_id, &item.name, None).await?;
            let Some(parent_handle) = self.items.get(&parent_id).map(|r| r.clone()) else {
                return Err(GraphError::ParentNotFound(parent_id.to_string()));
            };
            let mut parent = parent_handle.lock().await;
            let children = parent.children.get_or_insert_with(Vec::new);
            children.push(item.id.clone());
            self.persist(&parent).await?;
        }

        if item.node_id.get() == 0 {
            item.node_id = self.next_node_id();
        }
        self.node_ids.insert(item.node_id, item.id.clone());
        self.persist(&item).await?;
        self.items.insert(item.id.clone(), Arc::new(Mutex::new(item.clone())));
        Ok(item)
    }

    async fn assert_name_available(
        &self,
        parent_id: &ItemId,
        name: &str,
        ignore: Option<&ItemId>,
    ) -> Result<(), GraphError> {
        let name_key = name.to_lowercase();
        let Some(parent_handle) = self.items.get(parent_id).map(|r| r.clone()) else {
            return Err(GraphError::ParentNotFound(parent_id.to_string()));
        };
        let child_ids = parent_handle.lock().await.children.clone().unwrap_or_default();
        for child_id in child_ids {
            if Some(&child_id) == ignore {
                continue;
            }
            if let Some(handle) = self.items.get(&child_id).map(|r| r.clone()) {
                if handle.lock().await.name_key() == name_key {
                    return Err(GraphError::DuplicateName {
                        parent: parent_id.to_string(),
                        name: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Recursively deletes descendants first, then detaches from parent,
    /// removes the content-cache entry (spec section 4.1, `delete`).
    /// Cancelling a pending upload is the caller's responsibility — the
    /// graph only reports whether the item existed.
    pub async fn delete(&self, id: &ItemId) -> Result<(), GraphError> {
        let Some(handle) = self.items.get(id).map(|r| r.clone()) else {
            return Ok(());
        };

        let (children, parent_id) = {
            let guard = handle.lock().await;
            (guard.children.clone().unwrap_or_default(), guard.parent_id.clone())
        };

        for child in children {
            Box::pin(self.delete(&child)).await?;
        }

        if let Some(parent_id) = parent_id {
            if let Some(parent_handle) = self.items.get(&parent_id).map(|r| r.clone()) {
                let mut parent = parent_handle.lock().await;
                if let Some(children) = parent.children.as_mut() {
                    children.retain(|c| c != id);
                }
                self.persist(&parent).await?;
            }
        }

        self.cache.delete(id).await?;
        self.store.delete(Bucket::Metadata, &metadata_key(id)).await?;
        if let Some((_, item)) = self.items.remove(id) {
            let node_id = item.lock().await.node_id;
            self.node_ids.remove(&node_id);
        }
        Ok(())
    }

    /// Atomic with respect to the uniqueness invariant; updates both
    /// parents when moving across directories (spec section 4.1,
    /// `rename`).
    pub async fn rename(&self, id: &ItemId, new_parent: &ItemId, new_name: &str) -> Result<Item, GraphError> {
        self.assert_name_available(new_parent, new_name, Some(id)).await?;

        let Some(handle) = self.items.get(id).map(|r| r.clone()) else {
            return Err(GraphError::NotFound(id.to_string()));
        };

        let old_parent_id = {
            let mut guard = handle.lock().await;
            let old_parent = guard.parent_id.clone();
            guard.name = new_name.to_string();
            guard.parent_id = Some(new_parent.clone());
            self.persist(&guard).await?;
            old_parent
        };

        if old_parent_id.as_ref() != Some(new_parent) {
            if let Some(old_parent_id) = old_parent_id {
                if let Some(old_parent_handle) = self.items.get(&old_parent_id).map(|r| r.clone()) {
                    let mut old_parent = old_parent_handle.lock().await;
                    if let Some(children) = old_parent.children.as_mut() {
                        children.retain(|c| c != id);
                    }
                    self.persist(&old_parent).await?;
                }
            }
            if let Some(new_parent_handle) = self.items.get(new_parent).map(|r| r.clone()) {
                let mut parent = new_parent_handle.lock().await;
                let children = parent.children.get_or_insert_with(Vec::new);
                if !children.contains(id) {
                    children.push(id.clone());
                }
                self.persist(&parent).await?;
            }
        }

        let result = handle.lock().await.clone();
        Ok(result)
    }

    /// Called when a locally created item receives its remote id: updates
    /// the graph, the content-cache key, and the parent's child-list
    /// entry (spec section 4.1, `change_id`).
    pub async fn change_id(&self, old_id: &ItemId, new_id: ItemId) -> Result<Item, GraphError> {
        let Some((_, handle)) = self.items.remove(old_id) else {
            return Err(GraphError::NotFound(old_id.to_string()));
        };

        self.cache.rename(old_id, &new_id).await?;
        self.store.delete(Bucket::Metadata, &metadata_key(old_id)).await?;

        let (parent_id, node_id) = {
            let mut guard = handle.lock().await;
            guard.id = new_id.clone();
            self.persist(&guard).await?;
            (guard.parent_id.clone(), guard.node_id)
        };

        self.node_ids.insert(node_id, new_id.clone());
        self.items.insert(new_id.clone(), handle.clone());

        if let Some(parent_id) = parent_id {
            if let Some(parent_handle) = self.items.get(&parent_id).map(|r| r.clone()) {
                let mut parent = parent_handle.lock().await;
                if let Some(children) = parent.children.as_mut() {
                    for child in children.iter_mut() {
                        if child == old_id {
                            *child = new_id.clone();
                        }
                    }
                }
                self.persist(&parent).await?;
            }
        }

        let result = handle.lock().await.clone();
        Ok(result)
    }

    /// Applies `mutate` to the item under its own lock, then persists the
    /// result. The common path for state transitions driven by the
    /// download/upload managers and the delta engine.
    pub async fn update<F>(&self, id: &ItemId, mutate: F) -> Result<Item, GraphError>
    where
        F: FnOnce(&mut Item),
    {
        let Some(handle) = self.items.get(id).map(|r| r.clone()) else {
            return Err(GraphError::NotFound(id.to_string()));
        };
        let mut guard = handle.lock().await;
        mutate(&mut guard);
        self.persist(&guard).await?;
        Ok(guard.clone())
    }

    /// Enforces the content cache's size ceiling, evicting `Hydrated`
    /// (non-dirty, non-uploading, non-virtual) items in ascending
    /// `last_access` order and transitioning each evicted item to `Ghost`
    /// (spec section 4.2, `enforce_ceiling`). `max_bytes == 0` means
    /// unlimited and is a no-op, per `CacheConfig::max_cache_size_bytes`.
    pub async fn enforce_cache_ceiling(&self, max_bytes: u64) -> Result<Vec<ItemId>, GraphError> {
        if max_bytes == 0 {
            return Ok(Vec::new());
        }

        let snapshot: Vec<(ItemId, Arc<Mutex<Item>>)> =
            self.items.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        let mut hydrated = std::collections::HashSet::new();
        for (id, handle) in snapshot {
            let item = handle.lock().await;
            if item.state == ItemState::Hydrated && !item.is_virtual {
                hydrated.insert(id);
            }
        }

        let is_evictable: Arc<dyn for<'a> Fn(&'a ItemId) -> bool + Send + Sync> =
            Arc::new(move |id: &ItemId| hydrated.contains(id));
        let evicted = self.cache.enforce_ceiling(max_bytes, is_evictable).await?;

        for id in &evicted {
            if let Err(e) = self.update(id, |item| item.state = ItemState::Ghost).await {
                warn!(item_id = %id, error = %e, "failed to mark evicted item as ghost");
            }
        }
        Ok(evicted)
    }

    /// Removes content-cache bodies whose `last_access` is older than
    /// `expiration` and transitions each affected item to `Ghost` (spec
    /// section 4.2, `cleanup`; runs at startup and on a configured
    /// interval per spec section 5).
    pub async fn run_cache_cleanup(&self, expiration: chrono::Duration) -> Result<Vec<ItemId>, GraphError> {
        let removed = self.cache.cleanup(expiration).await?;
        for id in &removed {
            if let Err(e) = self.update(id, |item| item.state = ItemState::Ghost).await {
                warn!(item_id = %id, error = %e, "failed to mark cleaned-up item as ghost");
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onemount_remote::mock::MockRemoteClient;
    use onemount_store::content_cache::DiskContentCache;
    use onemount_store::sled_store::SledStore;

    async fn test_graph() -> (InodeGraph, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open(&dir.path().join("db")).await.unwrap());
        let cache = Arc::new(DiskContentCache::new(dir.path().join("cache")).await.unwrap());
        let remote = Arc::new(MockRemoteClient::new());
        (InodeGraph::new(store, cache, remote), dir)
    }

    #[tokio::test]
    async fn root_resolves_by_empty_path() {
        let (graph, _dir) = test_graph().await;
        let root = graph.resolve_by_path("").await.unwrap().unwrap();
        assert_eq!(root.id, ItemId::root());
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_case_insensitive_name() {
        let (graph, _dir) = test_graph().await;
        let a = Item::new_file(ItemId::from_remote("a"), NodeId::new(2), "Report.txt".into(), Some(ItemId::root()), 1);
        graph.insert(a).await.unwrap();

        let b = Item::new_file(ItemId::from_remote("b"), NodeId::new(3), "report.TXT".into(), Some(ItemId::root()), 1);
        let err = graph.insert(b).await.unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn rename_moves_across_parents() {
        let (graph, _dir) = test_graph().await;
        let dir_a = Item::new_directory(ItemId::from_remote("dir-a"), NodeId::new(2), "a".into(), Some(ItemId::root()));
        let dir_b = Item::new_directory(ItemId::from_remote("dir-b"), NodeId::new(3), "b".into(), Some(ItemId::root()));
        graph.insert(dir_a).await.unwrap();
        graph.insert(dir_b).await.unwrap();

        let file = Item::new_file(ItemId::from_remote("f"), NodeId::new(4), "x.txt".into(), Some(ItemId::from_remote("dir-a")), 1);
        graph.insert(file).await.unwrap();

        graph.rename(&ItemId::from_remote("f"), &ItemId::from_remote("dir-b"), "y.txt").await.unwrap();

        let a_children = graph.resolve_by_id(&ItemId::from_remote("dir-a")).await.unwrap().unwrap().children.unwrap();
        assert!(a_children.is_empty());
        let b_children = graph.resolve_by_id(&ItemId::from_remote("dir-b")).await.unwrap().unwrap().children.unwrap();
        assert_eq!(b_children, vec![ItemId::from_remote("f")]);
        let item = graph.resolve_by_id(&ItemId::from_remote("f")).await.unwrap().unwrap();
        assert_eq!(item.name, "y.txt");
    }

    #[tokio::test]
    async fn change_id_preserves_content_and_parent_link() {
        let (graph, _dir) = test_graph().await;
        let local_id = ItemId::new_local();
        let file = Item::new_file(local_id.clone(), NodeId::new(2), "new.txt".into(), Some(ItemId::root()), 0);
        graph.insert(file).await.unwrap();
        graph.cache.insert(&local_id, b"hello").await.unwrap();

        let remote_id = ItemId::from_remote("remote-42");
        graph.change_id(&local_id, remote_id.clone()).await.unwrap();

        assert!(graph.resolve_by_id(&local_id).await.unwrap().is_none());
        let item = graph.resolve_by_id(&remote_id).await.unwrap().unwrap();
        assert_eq!(item.id, remote_id);

        let root_children = graph.resolve_by_id(&ItemId::root()).await.unwrap().unwrap().children.unwrap();
        assert_eq!(root_children, vec![remote_id.clone()]);
        assert!(graph.cache.contains(&remote_id).await);
    }

    #[tokio::test]
    async fn delete_removes_descendants_and_content() {
        let (graph, _dir) = test_graph().await;
        let dir = Item::new_directory(ItemId::from_remote("dir"), NodeId::new(2), "dir".into(), Some(ItemId::root()));
        graph.insert(dir).await.unwrap();
        let file = Item::new_file(ItemId::from_remote("f"), NodeId::new(3), "f.txt".into(), Some(ItemId::from_remote("dir")), 1);
        graph.insert(file).await.unwrap();
        graph.cache.insert(&ItemId::from_remote("f"), b"x").await.unwrap();

        graph.delete(&ItemId::from_remote("dir")).await.unwrap();

        assert!(graph.resolve_by_id(&ItemId::from_remote("dir")).await.unwrap().is_none());
        assert!(graph.resolve_by_id(&ItemId::from_remote("f")).await.unwrap().is_none());
        assert!(!graph.cache.contains(&ItemId::from_remote("f")).await);
    }

    #[tokio::test]
    async fn children_offline_with_no_cache_returns_empty_not_error() {
        let (graph, _dir) = test_graph().await;
        graph.set_offline(true);
        let dir = Item::new_directory(ItemId::from_remote("dir"), NodeId::new(2), "dir".into(), Some(ItemId::root()));
        graph.insert(dir).await.unwrap();
        // freshly inserted directory has children = None until fetched.
        let children = graph.children(&ItemId::from_remote("dir")).await.unwrap();
        assert!(children.is_empty());
    }

    #[tokio::test]
    async fn hydrate_from_store_restores_graph_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open(&dir.path().join("db")).await.unwrap());
        let cache = Arc::new(DiskContentCache::new(dir.path().join("cache")).await.unwrap());
        let remote = Arc::new(MockRemoteClient::new());
        let graph = InodeGraph::new(store.clone(), cache.clone(), remote.clone());
        let file = Item::new_file(ItemId::from_remote("f"), NodeId::new(2), "f.txt".into(), Some(ItemId::root()), 1);
        graph.insert(file).await.unwrap();

        let restarted = InodeGraph::new(store, cache, remote);
        restarted.hydrate_from_store().await.unwrap();
        let item = restarted.resolve_by_id(&ItemId::from_remote("f")).await.unwrap().unwrap();
        assert_eq!(item.name, "f.txt");
    }

    #[tokio::test]
    async fn enforce_cache_ceiling_evicts_oldest_hydrated_item_to_ghost() {
        let (graph, _dir) = test_graph().await;

        let old = Item::new_file(ItemId::from_remote("old"), NodeId::new(2), "old.bin".into(), Some(ItemId::root()), 10);
        let new = Item::new_file(ItemId::from_remote("new"), NodeId::new(3), "new.bin".into(), Some(ItemId::root()), 10);
        let dirty = Item::new_file(ItemId::from_remote("dirty"), NodeId::new(4), "dirty.bin".into(), Some(ItemId::root()), 10);
        graph.insert(old).await.unwrap();
        graph.insert(new).await.unwrap();
        graph.insert(dirty).await.unwrap();

        graph.cache.insert(&ItemId::from_remote("old"), &[0u8; 10]).await.unwrap();
        graph.cache.insert(&ItemId::from_remote("dirty"), &[0u8; 10]).await.unwrap();
        graph.cache.insert(&ItemId::from_remote("new"), &[0u8; 10]).await.unwrap();

        graph.update(&ItemId::from_remote("old"), |item| item.state = ItemState::Hydrated).await.unwrap();
        graph.update(&ItemId::from_remote("new"), |item| item.state = ItemState::Hydrated).await.unwrap();
        // dirty stays Modified (not Hydrated), so it must never be evicted.
        graph.update(&ItemId::from_remote("dirty"), |item| item.state = ItemState::DirtyLocal).await.unwrap();

        let evicted = graph.enforce_cache_ceiling(25).await.unwrap();

        assert_eq!(evicted, vec![ItemId::from_remote("old")]);
        let old = graph.resolve_by_id(&ItemId::from_remote("old")).await.unwrap().unwrap();
        assert_eq!(old.state, ItemState::Ghost);
        let dirty = graph.resolve_by_id(&ItemId::from_remote("dirty")).await.unwrap().unwrap();
        assert_eq!(dirty.state, ItemState::DirtyLocal);
    }

    #[tokio::test]
    async fn enforce_cache_ceiling_zero_is_unbounded_no_op() {
        let (graph, _dir) = test_graph().await;
        let file = Item::new_file(ItemId::from_remote("f"), NodeId::new(2), "f.bin".into(), Some(ItemId::root()), 10);
        graph.insert(file).await.unwrap();
        graph.cache.insert(&ItemId::from_remote("f"), &[0u8; 10]).await.unwrap();
        graph.update(&ItemId::from_remote("f"), |item| item.state = ItemState::Hydrated).await.unwrap();

        let evicted = graph.enforce_cache_ceiling(0).await.unwrap();
        assert!(evicted.is_empty());
        let item = graph.resolve_by_id(&ItemId::from_remote("f")).await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::Hydrated);
    }

    #[tokio::test]
    async fn run_cache_cleanup_marks_stale_entries_as_ghost() {
        let (graph, _dir) = test_graph().await;
        let stale = Item::new_file(ItemId::from_remote("stale"), NodeId::new(2), "stale.bin".into(), Some(ItemId::root()), 4);
        let fresh = Item::new_file(ItemId::from_remote("fresh"), NodeId::new(3), "fresh.bin".into(), Some(ItemId::root()), 4);
        graph.insert(stale).await.unwrap();
        graph.insert(fresh).await.unwrap();
        graph.cache.insert(&ItemId::from_remote("stale"), &[1u8; 4]).await.unwrap();
        graph.update(&ItemId::from_remote("stale"), |item| item.state = ItemState::Hydrated).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        graph.cache.insert(&ItemId::from_remote("fresh"), &[1u8; 4]).await.unwrap();
        graph.update(&ItemId::from_remote("fresh"), |item| item.state = ItemState::Hydrated).await.unwrap();

        let removed = graph.run_cache_cleanup(chrono::Duration::milliseconds(25)).await.unwrap();

        assert_eq!(removed, vec![ItemId::from_remote("stale")]);
        let stale = graph.resolve_by_id(&ItemId::from_remote("stale")).await.unwrap().unwrap();
        assert_eq!(stale.state, ItemState::Ghost);
        let fresh = graph.resolve_by_id(&ItemId::from_remote("fresh")).await.unwrap().unwrap();
        assert_eq!(fresh.state, ItemState::Hydrated);
    }
}
