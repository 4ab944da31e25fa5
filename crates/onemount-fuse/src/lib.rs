//! OneMount FUSE kernel adapter (spec section 4.10).
//!
//! [`OneMountFs`] is a thin `fuser::Filesystem` translation layer onto
//! `onemount_sync`'s inode graph, download/upload managers, and status
//! surface. Kernel callbacks are synchronous, so every method blocks the
//! calling fuse worker thread on a Tokio runtime handle rather than
//! spawning and returning early.

pub mod error;
pub mod filesystem;

pub use error::FuseError;
pub use filesystem::OneMountFs;
