//! Shared types used across the tessera workspace.

mod types;

pub use types::{CameraView, EntityId, GroupSet, GroupTag, Rect};
