//! Cell index: spatial bucketing of world entities, staged board construction
//! and texture residency.
//!
//! # Invariants
//! - Every tracked entity is in exactly one cell under each of its groups, and
//!   that cell contains the entity's last reported position.
//! - Cell geometry and neighbour lists never change after construction.
//! - Queries never see a move half-done: membership changes take `&mut Grid`.
//! - Textures are only created or released through a [`TextureUploader`].

mod cell;
mod config;
mod construction;
mod error;
mod grid;
mod registry;
mod snapshot;
mod terrain;
mod textures;

pub use cell::{Cell, CellCoord, CellData, CellStage};
pub use config::{GridConfig, Platform, TexturePolicy};
pub use construction::{ETA_SENTINEL, Progress, Stage, estimate_remaining, format_eta};
pub use error::GridError;
pub use grid::{BackgroundPass, CellSize, Grid, GridContext, Measure, Placeable, largest_footprint};
pub use registry::{BoardTemplate, TemplateKey, WorldRegistry};
pub use snapshot::GridSnapshot;
pub use terrain::{
    CellSite, NeighborTerrain, SeededTerrain, TerrainGenerator, TerrainLayer, TerrainSamples, blur_height,
};
pub use textures::{MemorySignal, TextureHandle, TextureStats, TextureUploader};
