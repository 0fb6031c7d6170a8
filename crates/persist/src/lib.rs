//! Persistence for built worlds: grid snapshot plus entity table, event log
//! segments on top, and a hash-chained manifest over every file.
//!
//! # Invariants
//! - Event log segments are append-only.
//! - Every file is listed in the manifest; a hash or chain mismatch fails closed.
//! - A store holds exactly one world (seed and size fixed by the first save).

mod store;

pub use store::{GridStore, IntegrityManifest, ManifestEntry, SaveState, StoreError, StoreMeta};
