//! Process-wide wiring for the OneMount daemon (spec section 5, "Global
//! mutable state": "construct -> start background tasks -> run -> stop").
//!
//! [`run`] builds the persistent store, content cache, remote client,
//! inode graph, download/upload managers, delta engine, offline-change
//! journal, status surface, D-Bus status-bus service, and FUSE mount, then
//! blocks until a shutdown signal arrives and winds everything down against
//! the configured timeouts.

pub mod auth;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use onemount_core::config::Config;
use onemount_core::ports::content_cache::ContentCache;
use onemount_core::ports::persistent_store::PersistentStore;
use onemount_core::ports::remote_client::RemoteClient;
use onemount_fuse::OneMountFs;
use onemount_ipc::StatusBusService;
use onemount_remote::GraphRemoteClient;
use onemount_store::{DiskContentCache, SledStore};
use onemount_sync::delta::DeltaEngine;
use onemount_sync::download::DownloadManager;
use onemount_sync::journal::JournalManager;
use onemount_sync::status::StatusSurface;
use onemount_sync::upload::UploadManager;
use onemount_sync::InodeGraph;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Exit code returned when the daemon's D-Bus name is already owned by a
/// running instance (spec section 6, "a specific code for lock file
/// present and another instance is running").
pub const EXIT_ALREADY_RUNNING: i32 = 17;

fn db_path(cache_dir: &std::path::Path) -> PathBuf {
    cache_dir.join("store.sled")
}

/// Builds every component and runs the daemon until cancelled, mirroring
/// the lifecycle named in spec section 5: "construct -> start background
/// tasks -> run -> stop (signals cancellation token, joins all tasks with
/// their configured timeouts, flushes the store, closes it)".
pub async fn run(config: Config) -> Result<()> {
    if StatusBusService::name_already_owned().await.unwrap_or(false) {
        bail!(DaemonAlreadyRunning);
    }

    std::fs::create_dir_all(&config.mount.cache_dir)
        .with_context(|| format!("creating cache directory {}", config.mount.cache_dir.display()))?;

    let access_token = if config.mount.headless_auth {
        let account = std::env::var("ONEMOUNT_ACCOUNT").unwrap_or_else(|_| "default".to_string());
        let path = auth::credentials_path(&config.mount.cache_dir, &account);
        auth::load_access_token(&path).await.context("loading headless credentials")?
    } else {
        bail!("interactive OAuth sign-in is not implemented by this crate; run with --headless-auth against provisioned credentials, or see the authentication collaborator's documentation");
    };

    let store: Arc<dyn PersistentStore> = Arc::new(SledStore::open(&db_path(&config.mount.cache_dir)).await?);
    let cache: Arc<dyn ContentCache> = Arc::new(DiskContentCache::new(config.mount.cache_dir.clone()).await?);
    let remote: Arc<dyn RemoteClient> = Arc::new(GraphRemoteClient::new(access_token));

    let graph = Arc::new(InodeGraph::new(Arc::clone(&store), Arc::clone(&cache), Arc::clone(&remote)));
    graph.hydrate_from_store().await.context("hydrating inode graph from persistent store")?;

    let cancellation = CancellationToken::new();

    let download = Arc::new(DownloadManager::with_cache_ceiling(
        Arc::clone(&graph),
        Arc::clone(&store),
        Arc::clone(&cache),
        Arc::clone(&remote),
        config.download.clone(),
        config.cache.max_cache_size_bytes,
        cancellation.clone(),
    ));
    download.rehydrate_pending().await.context("resuming in-flight downloads")?;
    let mut handles = download.spawn_workers();

    if let Err(e) = graph.run_cache_cleanup(config.cache.effective_expiration()).await {
        warn!(error = %e, "startup content cache cleanup failed");
    }
    handles.push(spawn_cache_cleanup_task(
        Arc::clone(&graph),
        config.cache.clone(),
        cancellation.clone(),
    ));

    let upload = Arc::new(UploadManager::new(
        Arc::clone(&graph),
        Arc::clone(&store),
        Arc::clone(&cache),
        Arc::clone(&remote),
        config.upload.clone(),
        cancellation.clone(),
    ));
    upload.rehydrate_pending().await.context("resuming in-flight uploads")?;
    handles.push(upload.spawn_coordinator());

    let delta = Arc::new(DeltaEngine::new(
        Arc::clone(&graph),
        Arc::clone(&store),
        Arc::clone(&cache),
        Arc::clone(&remote),
        Arc::clone(&upload),
        config.delta.clone(),
    ));
    handles.extend(delta.spawn(cancellation.clone()));

    let journal = Arc::new(JournalManager::new(
        Arc::clone(&store),
        Arc::clone(&graph),
        Arc::clone(&remote),
        Arc::clone(&upload),
    ));
    handles.push(journal.spawn_reconnect_watcher(&delta, cancellation.clone()));

    let status = Arc::new(StatusSurface::new());

    let status_bus = StatusBusService::new(Arc::clone(&status));
    let _dbus_connection = status_bus.start().await.context("starting status-bus D-Bus service")?;

    let fs = OneMountFs::new(
        tokio::runtime::Handle::current(),
        Arc::clone(&graph),
        Arc::clone(&cache),
        Arc::clone(&download),
        Arc::clone(&upload),
        Arc::clone(&remote),
        Some(Arc::clone(&journal)),
        Arc::clone(&status),
        unsafe { libc::getuid() },
        unsafe { libc::getgid() },
    );

    let mount_point = config.mount.mount_point.clone();
    std::fs::create_dir_all(&mount_point)
        .with_context(|| format!("creating mount point {}", mount_point.display()))?;

    let options = vec![
        fuser::MountOption::FSName("onemount".to_string()),
        fuser::MountOption::Subtype("onemount".to_string()),
        fuser::MountOption::DefaultPermissions,
        fuser::MountOption::AutoUnmount,
    ];

    let mount_cancellation = cancellation.clone();
    let mount_point_for_session = mount_point.clone();
    let mount_rt = tokio::runtime::Handle::current();
    let mount_task = tokio::task::spawn_blocking(move || -> Result<()> {
        let session = fuser::spawn_mount2(fs, &mount_point_for_session, &options)
            .with_context(|| format!("mounting FUSE filesystem at {}", mount_point_for_session.display()))?;
        mount_rt.block_on(mount_cancellation.cancelled());
        drop(session);
        Ok(())
    });

    info!(mount_point = %mount_point.display(), "onemount daemon running");
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping background tasks");

    cancellation.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    let _ = mount_task.await;

    if let Err(e) = store.flush().await {
        warn!(error = %e, "failed to flush persistent store during shutdown");
    }

    info!("onemount daemon stopped");
    Ok(())
}

/// Runs `InodeGraph::run_cache_cleanup` on `cache.effective_cleanup_interval()`
/// until cancelled (spec section 5, "the cache cleanup task runs at the
/// configured interval"; startup's run happens separately in `run`).
fn spawn_cache_cleanup_task(
    graph: Arc<InodeGraph>,
    cache: onemount_core::config::CacheConfig,
    cancellation: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cache.effective_cleanup_interval());
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancellation.cancelled() => {
                    debug!("cache cleanup task stopping");
                    return;
                }
                _ = ticker.tick() => {
                    match graph.run_cache_cleanup(cache.effective_expiration()).await {
                        Ok(removed) if !removed.is_empty() => {
                            debug!(count = removed.len(), "periodic cache cleanup removed stale entries");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "periodic cache cleanup failed"),
                    }
                }
            }
        }
    })
}

#[derive(Debug, thiserror::Error)]
#[error("another onemount daemon instance is already running")]
pub struct DaemonAlreadyRunning;

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            return;
        };
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Returns the process exit code for a startup failure, distinguishing
/// the "already running" case (spec section 6's specific lock-file exit
/// code) from any other error.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<DaemonAlreadyRunning>().is_some() {
        EXIT_ALREADY_RUNNING
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_distinguishes_already_running() {
        let err = anyhow::Error::new(DaemonAlreadyRunning);
        assert_eq!(exit_code_for(&err), EXIT_ALREADY_RUNNING);

        let other = anyhow::anyhow!("boom");
        assert_eq!(exit_code_for(&other), 1);
    }
}
