//! Conflict-copy naming for OneMount's delta and offline-journal
//! reconciliation.
//!
//! Detection and resolution themselves live in `onemount-sync`, which owns
//! the item graph and etag comparisons; this crate is the narrow naming
//! utility both the delta engine and the journal replay path call when an
//! item transitions to `Conflict`.

pub mod namer;

pub use namer::ConflictNamer;
