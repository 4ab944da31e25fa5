//! OneMount core — domain types, configuration, and the port traits
//! (`RemoteClient`, `PersistentStore`, `ContentCache`) that the rest of the
//! workspace builds on.
//!
//! The domain module is pure: no I/O, no knowledge of `sled`, `reqwest`, or
//! `fuser`. Adapter crates (`onemount-store`, `onemount-remote`,
//! `onemount-fuse`) implement the ports defined here; `onemount-sync` is
//! the orchestration layer that drives them.

pub mod config;
pub mod domain;
pub mod ports;
