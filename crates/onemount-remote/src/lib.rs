//! OneMount remote client adapters — Microsoft Graph API over HTTP and an
//! in-memory mock for tests.
//!
//! ## Modules
//!
//! - [`client`] - Microsoft Graph API HTTP client (`get_item`, `list_children`,
//!   content download/upload)
//! - [`delta`] - delta-query response parsing and pagination
//! - [`upload`] - small/chunked upload session plumbing
//! - [`rate_limit`] - adaptive per-endpoint throttling
//! - [`mock`] - in-memory [`onemount_core::ports::RemoteClient`] for tests

pub mod client;
pub mod delta;
pub mod mock;
pub mod rate_limit;
pub mod upload;

pub use client::GraphRemoteClient;
pub use mock::MockRemoteClient;
