//! D-Bus status-bus service (spec section 6, "Status bus").
//!
//! Exposes the [`StatusSurface`] over the session bus: `GetFileStatus(path)`
//! answers synchronously from the in-memory table, and `FileStatusChanged`
//! is emitted for every status publication. A background task forwards the
//! surface's broadcast channel onto the bus for the lifetime of the
//! connection.

use std::sync::Arc;

use onemount_sync::status::StatusSurface;
use tracing::{debug, info, warn};

/// D-Bus well-known name for the OneMount daemon.
pub const DBUS_NAME: &str = "org.onemount.OneMount";

/// D-Bus object path for the status-bus service.
pub const DBUS_PATH: &str = "/org/onemount/OneMount";

/// The `GetFileStatus`/`FileStatusChanged` D-Bus interface, backed by a
/// shared [`StatusSurface`] (spec section 4.9, section 6).
pub struct FileStatusInterface {
    surface: Arc<StatusSurface>,
}

impl FileStatusInterface {
    #[must_use]
    pub fn new(surface: Arc<StatusSurface>) -> Self {
        Self { surface }
    }
}

#[zbus::interface(name = "org.onemount.OneMount.FileStatus")]
impl FileStatusInterface {
    /// Returns the status string for `path`, or `"Unknown"` if the surface
    /// has no entry for it (spec section 6, "Status bus").
    async fn get_file_status(&self, path: String) -> String {
        self.surface
            .status_for_path(&path)
            .map(|status| status.as_str().to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Emitted whenever a status changes (spec section 4.9: "Status
    /// changes must be published within the same critical section that
    /// updates item state").
    #[zbus(signal)]
    async fn file_status_changed(signal_ctxt: &zbus::SignalContext<'_>, path: &str, status: &str) -> zbus::Result<()>;
}

/// Owns the D-Bus connection and the background task that forwards
/// [`StatusSurface`] changes onto the bus as `FileStatusChanged` signals.
pub struct StatusBusService {
    surface: Arc<StatusSurface>,
}

impl StatusBusService {
    #[must_use]
    pub fn new(surface: Arc<StatusSurface>) -> Self {
        Self { surface }
    }

    /// Starts the service on the session bus: registers the
    /// `FileStatus` interface under [`DBUS_PATH`], requests
    /// [`DBUS_NAME`], and spawns the signal-forwarding task. The returned
    /// connection must be kept alive for the service to remain active.
    pub async fn start(&self) -> anyhow::Result<zbus::Connection> {
        info!("starting status-bus D-Bus service");

        let iface = FileStatusInterface::new(Arc::clone(&self.surface));
        let connection = zbus::connection::Builder::session()?
            .name(DBUS_NAME)?
            .serve_at(DBUS_PATH, iface)?
            .build()
            .await?;

        let signal_ctxt = zbus::SignalContext::new(&connection, DBUS_PATH)?;
        let mut changes = self.surface.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if let Err(e) =
                            FileStatusInterface::file_status_changed(&signal_ctxt, &change.path, change.status.as_str()).await
                        {
                            warn!(error = %e, "failed to emit FileStatusChanged");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "status bus dropped change events under backpressure");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        info!(name = DBUS_NAME, path = DBUS_PATH, "status-bus D-Bus service started");
        Ok(connection)
    }

    /// Checks whether [`DBUS_NAME`] is already owned on the session bus,
    /// used by the daemon's single-instance lock (spec section 6, "a
    /// specific code for lock file present").
    pub async fn name_already_owned() -> anyhow::Result<bool> {
        let connection = zbus::Connection::session().await?;
        let dbus_proxy = zbus::fdo::DBusProxy::new(&connection).await?;
        match dbus_proxy.get_name_owner(DBUS_NAME.try_into()?).await {
            Ok(_owner) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
