//! OneMount status-bus IPC.
//!
//! Exposes the sync engine's [`onemount_sync::status::StatusSurface`] on
//! the session D-Bus as `GetFileStatus`/`FileStatusChanged` (spec section
//! 6, "Status bus").
//!
//! ```rust,no_run
//! use onemount_ipc::service::StatusBusService;
//! use onemount_sync::status::StatusSurface;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let surface = Arc::new(StatusSurface::new());
//! let service = StatusBusService::new(surface);
//! let _connection = service.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod service;

pub use service::{FileStatusInterface, StatusBusService, DBUS_NAME, DBUS_PATH};
