//! Persistent store and content cache adapters for OneMount.
//!
//! [`sled_store::SledStore`] implements `onemount_core::ports::PersistentStore`
//! on top of an embedded `sled` database; [`content_cache::DiskContentCache`]
//! implements `onemount_core::ports::ContentCache` on a plain directory of
//! `content/{id}` files.

pub mod content_cache;
pub mod sled_store;
pub mod thumbnail_cache;

pub use content_cache::DiskContentCache;
pub use sled_store::SledStore;
pub use thumbnail_cache::ThumbnailCache;
