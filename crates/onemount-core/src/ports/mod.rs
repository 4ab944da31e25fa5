//! Port definitions: the capability interfaces the core depends on while
//! leaving implementation to adapter crates (spec section 9, "Dynamic
//! dispatch / duck typing" — "Model the remote client as a capability
//! interface... Avoid inheritance hierarchies").
//!
//! - [`RemoteClient`] — the narrow capability set backing the cloud
//!   provider (spec section 4.4). `onemount-remote` provides an HTTP and a
//!   mock implementation.
//! - [`PersistentStore`] — the ordered-bucket key/value store (spec
//!   section 4.3). `onemount-store` provides a `sled`-backed
//!   implementation.
//! - [`ContentCache`] — the on-disk file-body cache (spec section 4.2).
//!   `onemount-store` provides the disk-backed implementation.

pub mod content_cache;
pub mod persistent_store;
pub mod remote_client;

pub use content_cache::ContentCache;
pub use persistent_store::{Bucket, PersistentStore, StoreError};
pub use remote_client::{
    ChangeSet, ChangedItem, ItemMetadataDto, RemoteClient, RemoteError, UploadSession,
};
