//! The `fuser::Filesystem` implementation (spec section 4.10, "Kernel
//! Adapter").
//!
//! `OneMountFs` holds no state of its own beyond the shared sync-engine
//! handles: every kernel callback resolves an inode through the
//! [`InodeGraph`], does its work, and replies. Callbacks are synchronous
//! (fuser runs each on its own worker thread), so async calls into the
//! graph/cache/managers are driven with [`Handle::block_on`].

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use onemount_core::domain::ids::{ItemId, NodeId};
use onemount_core::domain::item::Item;
use onemount_core::domain::status::FileStatus;
use onemount_core::ports::content_cache::ContentCache;
use onemount_core::ports::remote_client::RemoteClient;
use onemount_sync::download::DownloadManager;
use onemount_sync::graph::InodeGraph;
use onemount_sync::journal::{ChangeKind, JournalManager};
use onemount_sync::status::StatusSurface;
use onemount_sync::upload::{UploadManager, UploadPriority};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::error::FuseError;

/// Attribute cache TTL handed back on every reply; short enough that a
/// background delta/conflict update is visible to the kernel promptly
/// (spec section 4.9: status must never be stale for long).
const TTL: Duration = Duration::from_secs(1);
const NAME_MAX: usize = 255;

fn errno(err: impl Into<FuseError>) -> libc::c_int {
    err.into().into()
}

fn system_time(dt: DateTime<Utc>) -> SystemTime {
    let millis = dt.timestamp_millis();
    if millis <= 0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    }
}

/// The OneMount kernel adapter (spec section 4.10).
pub struct OneMountFs {
    rt: Handle,
    graph: Arc<InodeGraph>,
    cache: Arc<dyn ContentCache>,
    download: Arc<DownloadManager>,
    upload: Arc<UploadManager>,
    remote: Arc<dyn RemoteClient>,
    journal: Option<Arc<JournalManager>>,
    status: Arc<StatusSurface>,
    uid: u32,
    gid: u32,
    next_fh: AtomicU64,
}

impl OneMountFs {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        rt: Handle,
        graph: Arc<InodeGraph>,
        cache: Arc<dyn ContentCache>,
        download: Arc<DownloadManager>,
        upload: Arc<UploadManager>,
        remote: Arc<dyn RemoteClient>,
        journal: Option<Arc<JournalManager>>,
        status: Arc<StatusSurface>,
        uid: u32,
        gid: u32,
    ) -> Self {
        Self {
            rt,
            graph,
            cache,
            download,
            upload,
            remote,
            journal,
            status,
            uid,
            gid,
            next_fh: AtomicU64::new(1),
        }
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    fn item_to_attr(&self, item: &Item) -> FileAttr {
        let kind = if item.is_directory() { FileType::Directory } else { FileType::RegularFile };
        let perm = if item.is_directory() { 0o755 } else { 0o644 };
        FileAttr {
            ino: item.node_id.get(),
            size: item.size,
            blocks: item.size.div_ceil(512),
            atime: system_time(item.modified_at),
            mtime: system_time(item.modified_at),
            ctime: system_time(item.modified_at),
            crtime: system_time(item.created_at),
            kind,
            perm,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    /// Resolves a kernel inode number to an [`ItemId`], replying `ENOENT`
    /// via the caller's reply object if it isn't known.
    fn resolve_ino(&self, ino: u64) -> Option<ItemId> {
        self.graph.resolve_by_node_id(NodeId::new(ino))
    }

    fn decode_name<'a>(&self, name: &'a OsStr) -> Result<&'a str, libc::c_int> {
        let name = name.to_str().ok_or(libc::ENOENT)?;
        if name.len() > NAME_MAX {
            return Err(libc::ENAMETOOLONG);
        }
        Ok(name)
    }

    /// Reconstructs the absolute path to `id` by walking parent links, for
    /// publishing to the status surface (spec section 4.9).
    async fn full_path(&self, id: &ItemId) -> String {
        let mut segments = Vec::new();
        let mut current = id.clone();
        loop {
            let Ok(Some(item)) = self.graph.resolve_by_id(&current).await else { break };
            if item.id == ItemId::root() {
                break;
            }
            segments.push(item.name.clone());
            match item.parent_id {
                Some(parent) => current = parent,
                None => break,
            }
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    async fn publish_status(&self, id: &ItemId, uploading: bool) {
        if let Ok(Some(item)) = self.graph.resolve_by_id(id).await {
            let status = FileStatus::from_state(&item.state, uploading);
            let path = self.full_path(id).await;
            self.status.publish(id.clone(), path, status);
        }
    }

    /// While offline, records the change in the journal instead of
    /// touching the network (spec section 4.8).
    async fn enqueue_write(&self, id: ItemId, path: String, created: bool) {
        if self.graph.is_offline() {
            if let Some(journal) = &self.journal {
                let kind = if created { ChangeKind::Create } else { ChangeKind::Modify };
                if let Err(e) = journal.append(id, kind, path, None, None).await {
                    warn!(error = %e, "failed to append offline-change journal entry");
                }
            }
        } else {
            self.upload.enqueue(id, UploadPriority::High).await;
        }
    }

    /// Best-effort remote delete; a `NotFound` is treated as success by the
    /// port, so only genuine failures are logged (spec section 7).
    async fn remote_delete(&self, id: &ItemId) {
        if let Err(e) = self.remote.delete(id).await {
            warn!(error = %e, item = %id, "remote delete failed");
        }
    }

    async fn remote_rename(&self, id: &ItemId, new_parent: &ItemId, new_name: &str) {
        if let Err(e) = self.remote.rename(id, new_parent, new_name).await {
            warn!(error = %e, item = %id, "remote rename failed");
        }
    }
}

impl Filesystem for OneMountFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        info!("onemount filesystem initialised");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("onemount filesystem unmounting");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = match self.decode_name(name) {
            Ok(n) => n,
            Err(e) => return reply.error(e),
        };
        let Some(parent_id) = self.resolve_ino(parent) else {
            return reply.error(libc::ENOENT);
        };

        let result = self.rt.block_on(async {
            let children = self.graph.children(&parent_id).await?;
            Ok::<_, onemount_sync::graph::GraphError>(
                children.into_iter().find(|c| c.name_key() == name.to_lowercase()),
            )
        });

        match result {
            Ok(Some(item)) => reply.entry(&TTL, &self.item_to_attr(&item), 0),
            Ok(None) => reply.error(libc::ENOENT),
            Err(e) => reply.error(errno(e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(id) = self.resolve_ino(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.rt.block_on(self.graph.resolve_by_id(&id)) {
            Ok(Some(item)) => reply.attr(&TTL, &self.item_to_attr(&item)),
            Ok(None) => reply.error(libc::ENOENT),
            Err(e) => reply.error(errno(e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(id) = self.resolve_ino(ino) else {
            return reply.error(libc::ENOENT);
        };

        let result = self.rt.block_on(async {
            if let Some(new_size) = size {
                self.cache.set_len(&id, new_size).await.map_err(FuseError::from)?;
                self.graph
                    .update(&id, |item| {
                        item.mark_dirty();
                        item.size = new_size;
                    })
                    .await
                    .map_err(FuseError::from)?;
                self.enqueue_write(id.clone(), self.full_path(&id).await, false).await;
                self.publish_status(&id, false).await;
            }
            self.graph.resolve_by_id(&id).await.map_err(FuseError::from)
        });

        match result {
            Ok(Some(item)) => reply.attr(&TTL, &self.item_to_attr(&item)),
            Ok(None) => reply.error(libc::ENOENT),
            Err(e) => reply.error(e.into()),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(id) = self.resolve_ino(ino) else {
            return reply.error(libc::ENOENT);
        };

        let result = self.rt.block_on(async {
            let item = self.graph.resolve_by_id(&id).await?.ok_or(onemount_sync::graph::GraphError::NotFound(id.to_string()))?;
            if !item.is_directory() {
                return Err(onemount_sync::graph::GraphError::NotFound(id.to_string()));
            }
            let parent_ino = match &item.parent_id {
                Some(parent) => self.graph.resolve_by_id(parent).await?.map(|p| p.node_id.get()).unwrap_or(ino),
                None => ino,
            };
            let children = self.graph.children(&id).await?;
            Ok((parent_ino, children))
        });

        let (parent_ino, children) = match result {
            Ok(v) => v,
            Err(e) => return reply.error(errno(e)),
        };

        let mut entries: Vec<(u64, FileType, String)> =
            vec![(ino, FileType::Directory, ".".to_string()), (parent_ino, FileType::Directory, "..".to_string())];
        for child in children {
            let kind = if child.is_directory() { FileType::Directory } else { FileType::RegularFile };
            entries.push((child.node_id.get(), kind, child.name));
        }

        for (i, (child_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(child_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(id) = self.resolve_ino(ino) else {
            return reply.error(libc::ENOENT);
        };

        let result = self.rt.block_on(async {
            let item = self.graph.resolve_by_id(&id).await.map_err(FuseError::from)?;
            let Some(item) = item else { return Err(FuseError::NotFound(id.to_string())) };
            if item.is_directory() {
                return Err(FuseError::IsADirectory(id.to_string()));
            }
            if !item.is_virtual {
                self.download.ensure_hydrated(&id).await.map_err(|e| FuseError::HydrationFailed(e.to_string()))?;
            }
            Ok(())
        });

        match result {
            Ok(()) => reply.opened(self.alloc_fh(), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(id) = self.resolve_ino(ino) else {
            return reply.error(libc::ENOENT);
        };

        let result: Result<Vec<u8>, FuseError> = self.rt.block_on(async {
            let mut file = self.cache.open(&id).await.map_err(FuseError::from)?;
            file.seek(std::io::SeekFrom::Start(offset as u64)).await.map_err(FuseError::from)?;
            let mut buf = vec![0u8; size as usize];
            let mut total = 0;
            loop {
                let n = file.read(&mut buf[total..]).await.map_err(FuseError::from)?;
                if n == 0 {
                    break;
                }
                total += n;
                if total == buf.len() {
                    break;
                }
            }
            buf.truncate(total);
            Ok(buf)
        });

        match result {
            Ok(buf) => reply.data(&buf),
            Err(e) => reply.error(e.into()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(id) = self.resolve_ino(ino) else {
            return reply.error(libc::ENOENT);
        };
        let new_end = offset as u64 + data.len() as u64;

        let result: Result<(), FuseError> = self.rt.block_on(async {
            let mut file = self.cache.open(&id).await?;
            file.seek(std::io::SeekFrom::Start(offset as u64)).await?;
            file.write_all(data).await?;
            self.cache.note_write(&id, new_end).await?;
            self.graph
                .update(&id, |item| {
                    item.mark_dirty();
                    if new_end > item.size {
                        item.size = new_end;
                    }
                })
                .await
                .map_err(FuseError::from)?;
            self.publish_status(&id, false).await;
            Ok(())
        });

        match result {
            Ok(()) => reply.written(data.len() as u32),
            Err(e) => reply.error(e.into()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(id) = self.resolve_ino(ino) {
            self.rt.block_on(async {
                let Ok(Some(item)) = self.graph.resolve_by_id(&id).await else { return };
                if item.has_changes {
                    let path = self.full_path(&id).await;
                    self.publish_status(&id, true).await;
                    self.enqueue_write(id, path, false).await;
                }
            });
        }
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = match self.decode_name(name) {
            Ok(n) => n.to_string(),
            Err(e) => return reply.error(e),
        };
        let Some(parent_id) = self.resolve_ino(parent) else {
            return reply.error(libc::ENOENT);
        };

        let result: Result<Item, FuseError> = self.rt.block_on(async {
            let id = ItemId::new_local();
            let mut item = Item::new_file(id.clone(), NodeId::new(0), name, Some(parent_id), 0);
            item.mark_dirty();
            let item = self.graph.insert(item).await?;
            self.cache.insert(&item.id, b"").await?;
            let path = self.full_path(&item.id).await;
            self.publish_status(&item.id, false).await;
            self.enqueue_write(item.id.clone(), path, true).await;
            Ok(item)
        });

        match result {
            Ok(item) => reply.created(&TTL, &self.item_to_attr(&item), 0, self.alloc_fh(), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        let name = match self.decode_name(name) {
            Ok(n) => n.to_string(),
            Err(e) => return reply.error(e),
        };
        let Some(parent_id) = self.resolve_ino(parent) else {
            return reply.error(libc::ENOENT);
        };

        let result: Result<Item, FuseError> = self.rt.block_on(async {
            let item = if self.graph.is_offline() {
                let id = ItemId::new_local();
                Item::new_directory(id, NodeId::new(0), name.clone(), Some(parent_id))
            } else {
                let dto = self.remote.create_directory(&parent_id, &name).await.map_err(|e| FuseError::IoError(e.to_string()))?;
                let mut item = Item::new_directory(dto.id, NodeId::new(0), dto.name, dto.parent_id);
                item.etag = Some(dto.etag);
                item
            };
            let item = self.graph.insert(item).await?;
            if self.graph.is_offline() {
                if let Some(journal) = &self.journal {
                    let path = self.full_path(&item.id).await;
                    journal.append(item.id.clone(), ChangeKind::Create, path, None, None).await.ok();
                }
            }
            self.publish_status(&item.id, false).await;
            Ok(item)
        });

        match result {
            Ok(item) => reply.entry(&TTL, &self.item_to_attr(&item), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match self.decode_name(name) {
            Ok(n) => n.to_string(),
            Err(e) => return reply.error(e),
        };
        let Some(parent_id) = self.resolve_ino(parent) else {
            return reply.error(libc::ENOENT);
        };

        let result: Result<(), FuseError> = self.rt.block_on(async {
            let children = self.graph.children(&parent_id).await?;
            let Some(child) = children.into_iter().find(|c| c.name_key() == name.to_lowercase()) else {
                return Err(FuseError::NotFound(name));
            };
            let path = self.full_path(&child.id).await;
            if self.graph.is_offline() {
                if let Some(journal) = &self.journal {
                    journal.append(child.id.clone(), ChangeKind::Delete, path, None, None).await.ok();
                }
            } else if !child.id.is_local() {
                self.remote_delete(&child.id).await;
            }
            self.graph.delete(&child.id).await?;
            self.status.remove(&child.id);
            Ok(())
        });

        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.unlink(_req, parent, name, reply);
    }

    #[allow(clippy::too_many_arguments)]
    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name = match self.decode_name(name) {
            Ok(n) => n.to_string(),
            Err(e) => return reply.error(e),
        };
        let newname = match self.decode_name(newname) {
            Ok(n) => n.to_string(),
            Err(e) => return reply.error(e),
        };
        let Some(parent_id) = self.resolve_ino(parent) else {
            return reply.error(libc::ENOENT);
        };
        let Some(new_parent_id) = self.resolve_ino(newparent) else {
            return reply.error(libc::ENOENT);
        };

        let result: Result<(), FuseError> = self.rt.block_on(async {
            let children = self.graph.children(&parent_id).await?;
            let Some(child) = children.into_iter().find(|c| c.name_key() == name.to_lowercase()) else {
                return Err(FuseError::NotFound(name.clone()));
            };
            let old_path = self.full_path(&child.id).await;
            self.graph.rename(&child.id, &new_parent_id, &newname).await?;
            let new_path = self.full_path(&child.id).await;

            if self.graph.is_offline() {
                if let Some(journal) = &self.journal {
                    journal
                        .append(child.id.clone(), ChangeKind::Rename, new_path.clone(), Some(old_path), Some(new_path))
                        .await
                        .ok();
                }
            } else {
                self.remote_rename(&child.id, &new_parent_id, &newname).await;
            }
            self.publish_status(&child.id, false).await;
            Ok(())
        });

        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use onemount_core::config::{DownloadConfig, UploadConfig};
    use onemount_core::domain::item::{Item, ItemKind};
    use onemount_core::ports::persistent_store::PersistentStore;
    use onemount_remote::mock::MockRemoteClient;
    use onemount_store::content_cache::DiskContentCache;
    use onemount_store::sled_store::SledStore;
    use tokio_util::sync::CancellationToken;

    use super::*;

    async fn setup() -> (OneMountFs, Arc<InodeGraph>, Arc<MockRemoteClient>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn PersistentStore> = Arc::new(SledStore::open(&dir.path().join("db")).await.unwrap());
        let cache: Arc<dyn ContentCache> = Arc::new(DiskContentCache::new(dir.path().join("cache")).await.unwrap());
        let remote = Arc::new(MockRemoteClient::new());
        let remote_dyn: Arc<dyn RemoteClient> = remote.clone();
        let graph = Arc::new(InodeGraph::new(store.clone(), cache.clone(), remote_dyn.clone()));

        let download = Arc::new(DownloadManager::new(
            graph.clone(),
            store.clone(),
            cache.clone(),
            remote_dyn.clone(),
            DownloadConfig::default(),
            CancellationToken::new(),
        ));
        let upload = Arc::new(UploadManager::new(
            graph.clone(),
            store.clone(),
            cache.clone(),
            remote_dyn,
            UploadConfig::default(),
            CancellationToken::new(),
        ));
        let status = Arc::new(StatusSurface::new());

        let fs = OneMountFs::new(Handle::current(), graph.clone(), cache, download, upload, remote.clone(), None, status, 1000, 1000);
        (fs, graph, remote, dir)
    }

    #[tokio::test]
    async fn alloc_fh_increments() {
        let (fs, ..) = setup().await;
        assert_eq!(fs.alloc_fh(), 1);
        assert_eq!(fs.alloc_fh(), 2);
        assert_eq!(fs.alloc_fh(), 3);
    }

    #[tokio::test]
    async fn resolve_ino_finds_inserted_item_by_node_id() {
        let (fs, graph, ..) = setup().await;
        let item = Item::new_directory(ItemId::root(), NodeId::ROOT, String::new(), None);
        let inserted = graph.insert(item).await.unwrap();

        assert_eq!(fs.resolve_ino(inserted.node_id.get()), Some(ItemId::root()));
        assert_eq!(fs.resolve_ino(999), None);
    }

    #[tokio::test]
    async fn item_to_attr_maps_directory_and_file_kinds() {
        let (fs, ..) = setup().await;
        let dir = Item::new_directory(ItemId::root(), NodeId::new(1), String::new(), None);
        let file = Item::new_file(ItemId::from_remote("f1"), NodeId::new(2), "a.txt".into(), Some(ItemId::root()), 42);

        let dir_attr = fs.item_to_attr(&dir);
        assert_eq!(dir_attr.kind, FileType::Directory);
        assert_eq!(dir_attr.perm, 0o755);
        assert_eq!(dir_attr.ino, 1);

        let file_attr = fs.item_to_attr(&file);
        assert_eq!(file_attr.kind, FileType::RegularFile);
        assert_eq!(file_attr.perm, 0o644);
        assert_eq!(file_attr.size, 42);
    }

    #[tokio::test]
    async fn decode_name_rejects_names_over_name_max() {
        let (fs, ..) = setup().await;
        let long = "a".repeat(NAME_MAX + 1);
        assert_eq!(fs.decode_name(std::ffi::OsStr::new(&long)), Err(libc::ENAMETOOLONG));
        assert_eq!(fs.decode_name(std::ffi::OsStr::new("short.txt")), Ok("short.txt"));
    }

    #[tokio::test]
    async fn full_path_reconstructs_nested_directory_chain() {
        let (fs, graph, ..) = setup().await;
        let root = Item::new_directory(ItemId::root(), NodeId::ROOT, String::new(), None);
        graph.insert(root).await.unwrap();
        let docs = Item::new_directory(ItemId::from_remote("docs"), NodeId::new(0), "Documents".into(), Some(ItemId::root()));
        graph.insert(docs).await.unwrap();
        let file = Item::new_file(
            ItemId::from_remote("f1"),
            NodeId::new(0),
            "notes.txt".into(),
            Some(ItemId::from_remote("docs")),
            10,
        );
        graph.insert(file.clone()).await.unwrap();

        assert_eq!(fs.full_path(&file.id).await, "/Documents/notes.txt");
    }

    #[tokio::test]
    async fn publish_status_records_current_item_state() {
        let (fs, graph, ..) = setup().await;
        let root = Item::new_directory(ItemId::root(), NodeId::ROOT, String::new(), None);
        graph.insert(root).await.unwrap();
        let file = Item::new_file(ItemId::from_remote("f1"), NodeId::new(0), "a.txt".into(), Some(ItemId::root()), 0);
        graph.insert(file.clone()).await.unwrap();

        fs.publish_status(&file.id, false).await;

        let status = fs.status.status_for_path("/a.txt");
        assert!(status.is_some());
    }

    #[tokio::test]
    async fn remote_delete_removes_item_from_remote() {
        let (fs, _graph, remote, _dir) = setup().await;
        let uploaded = remote.upload_small(&ItemId::root(), "gone.txt", b"x").await.unwrap();

        fs.remote_delete(&uploaded.id).await;

        assert!(remote.get_item(&uploaded.id).await.is_err());
    }

    #[tokio::test]
    async fn remote_rename_updates_name_and_parent_on_remote() {
        let (fs, _graph, remote, _dir) = setup().await;
        let uploaded = remote.upload_small(&ItemId::root(), "old.txt", b"x").await.unwrap();

        fs.remote_rename(&uploaded.id, &ItemId::root(), "new.txt").await;

        let fetched = remote.get_item(&uploaded.id).await.unwrap();
        assert_eq!(fetched.name, "new.txt");
    }

    #[tokio::test]
    async fn enqueue_write_while_offline_is_a_no_op_without_journal() {
        let (fs, graph, ..) = setup().await;
        graph.set_offline(true);
        // No journal configured: enqueue_write must not panic even though
        // there's nowhere to record the offline change.
        fs.enqueue_write(ItemId::from_remote("f1"), "/f1".into(), true).await;
    }

    #[tokio::test]
    async fn item_kind_is_directory_matches_item_to_attr_kind() {
        let (fs, ..) = setup().await;
        let dir = Item::new_directory(ItemId::root(), NodeId::new(5), String::new(), None);
        assert_eq!(dir.kind, ItemKind::Directory);
        assert_eq!(fs.item_to_attr(&dir).kind, FileType::Directory);
    }
}
