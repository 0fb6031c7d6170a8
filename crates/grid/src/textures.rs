//! Cell texture residency.
//!
//! # Invariants
//! - A cell holds at most one texture handle; `loaded_textures` counts them.
//! - Incremental loads are rate limited, and the clock only advances on an
//!   actual load.
//! - With `load_whole_map` set, nothing is loaded incrementally or evicted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tessera_common::CameraView;

use crate::cell::CellCoord;
use crate::config::{Platform, TexturePolicy};
use crate::grid::Grid;
use crate::terrain::TerrainSamples;

/// Opaque handle to a GPU texture owned by the host renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Render-thread capability. Every texture method on [`Grid`] takes one, so
/// uploads can only happen where the caller holds it.
pub trait TextureUploader {
    fn upload(&mut self, coord: CellCoord, terrain: Option<&TerrainSamples>) -> TextureHandle;
    fn release(&mut self, handle: TextureHandle);
}

/// Host low-memory flag, consulted on desktop platforms.
pub trait MemorySignal {
    fn memory_low(&self) -> bool;
}

impl MemorySignal for bool {
    fn memory_low(&self) -> bool {
        *self
    }
}

impl MemorySignal for AtomicBool {
    fn memory_low(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Statistics from the last bulk texture operation.
#[derive(Debug, Clone, Default)]
pub struct TextureStats {
    pub loaded: usize,
    pub evicted: usize,
    pub total_loaded: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub(crate) struct TextureStreamer {
    policy: TexturePolicy,
    last_load: Option<Instant>,
    loaded: usize,
    stats: TextureStats,
}

impl TextureStreamer {
    pub(crate) fn new(policy: TexturePolicy) -> Self {
        Self {
            policy,
            last_load: None,
            loaded: 0,
            stats: TextureStats::default(),
        }
    }

    pub(crate) fn whole_map(&self) -> bool {
        self.policy.load_whole_map
    }

    fn ready(&self, now: Instant) -> bool {
        self.last_load
            .is_none_or(|last| now.saturating_duration_since(last) >= self.policy.min_load_interval())
    }

    fn under_pressure(&self, signal: &dyn MemorySignal) -> bool {
        match self.policy.platform {
            Platform::Mobile => self.loaded >= self.policy.mobile_max_loaded_textures,
            Platform::Desktop => signal.memory_low(),
        }
    }
}

impl Grid {
    pub(crate) fn load_texture(&mut self, index: usize, gpu: &mut dyn TextureUploader) -> bool {
        let cell = &mut self.cells[index];
        if cell.texture.is_some() {
            return false;
        }
        let handle = gpu.upload(cell.coord(), cell.terrain());
        cell.texture = Some(handle);
        self.streamer.loaded += 1;
        tracing::trace!(coord = ?cell.coord(), ?handle, "texture loaded");
        true
    }

    fn unload_texture(&mut self, index: usize, gpu: &mut dyn TextureUploader) -> bool {
        let cell = &mut self.cells[index];
        let Some(handle) = cell.texture.take() else {
            return false;
        };
        gpu.release(handle);
        self.streamer.loaded -= 1;
        tracing::trace!(coord = ?cell.coord(), ?handle, "texture evicted");
        true
    }

    /// Load the texture of the in-view cell closest to the camera centre, at most
    /// once per `min_load_interval`. Returns the cell that was loaded.
    pub fn step_toward_camera_view(
        &mut self,
        camera: &CameraView,
        gpu: &mut dyn TextureUploader,
    ) -> Option<CellCoord> {
        self.step_toward_camera_view_at(camera, gpu, Instant::now())
    }

    fn step_toward_camera_view_at(
        &mut self,
        camera: &CameraView,
        gpu: &mut dyn TextureUploader,
        now: Instant,
    ) -> Option<CellCoord> {
        if self.streamer.whole_map() || !self.streamer.ready(now) {
            return None;
        }
        let center = camera.center();
        let closest = self
            .indices_in_rect(camera.view_rect)
            .into_iter()
            .filter(|i| !self.cells[*i].has_texture())
            .min_by(|a, b| {
                self.cells[*a]
                    .distance_to(center)
                    .total_cmp(&self.cells[*b].distance_to(center))
            })?;
        self.load_texture(closest, gpu);
        self.streamer.last_load = Some(now);
        Some(self.cells[closest].coord())
    }

    /// Load every in-view texture at once, e.g. after a teleport.
    pub fn load_all_in_view(&mut self, camera: &CameraView, gpu: &mut dyn TextureUploader) -> usize {
        if self.streamer.whole_map() {
            return 0;
        }
        let _span = tracing::info_span!("load_all_in_view").entered();
        let start = Instant::now();
        let mut loaded = 0;
        for index in self.indices_in_rect(camera.view_rect) {
            if self.load_texture(index, gpu) {
                loaded += 1;
            }
        }
        self.streamer.stats = TextureStats {
            loaded,
            evicted: 0,
            total_loaded: self.streamer.loaded,
            elapsed: start.elapsed(),
        };
        loaded
    }

    /// Under memory pressure, release every resident texture outside the view.
    pub fn evict_if_under_pressure(
        &mut self,
        camera: &CameraView,
        signal: &dyn MemorySignal,
        gpu: &mut dyn TextureUploader,
    ) -> usize {
        if self.streamer.whole_map() || !self.streamer.under_pressure(signal) {
            return 0;
        }
        let _span = tracing::info_span!("evict_textures").entered();
        let start = Instant::now();
        let mut keep = vec![false; self.cells.len()];
        for index in self.indices_in_rect(camera.view_rect) {
            keep[index] = true;
        }
        let mut evicted = 0;
        for index in 0..self.cells.len() {
            if !keep[index] && self.unload_texture(index, gpu) {
                evicted += 1;
            }
        }
        self.streamer.stats = TextureStats {
            loaded: 0,
            evicted,
            total_loaded: self.streamer.loaded,
            elapsed: start.elapsed(),
        };
        tracing::debug!(evicted, remaining = self.streamer.loaded, "textures evicted under pressure");
        evicted
    }

    /// Make every cell resident when the whole map is loaded eagerly. Grids copied
    /// from a template skip stage 2, so they load here.
    pub fn ensure_whole_map_resident(&mut self, gpu: &mut dyn TextureUploader) -> usize {
        if !self.streamer.whole_map() {
            return 0;
        }
        (0..self.cells.len())
            .filter(|i| self.load_texture(*i, gpu))
            .count()
    }

    /// Release every texture, e.g. before the grid is dropped.
    pub fn release_all_textures(&mut self, gpu: &mut dyn TextureUploader) -> usize {
        (0..self.cells.len())
            .filter(|i| self.unload_texture(*i, gpu))
            .count()
    }

    /// Number of cells holding a texture.
    pub fn loaded_textures(&self) -> usize {
        self.streamer.loaded
    }

    /// Coordinates of cells holding a texture, in `all_cells` order.
    pub fn resident_cells(&self) -> Vec<CellCoord> {
        self.cells
            .iter()
            .filter(|c| c.has_texture())
            .map(|c| c.coord())
            .collect()
    }

    /// Stats from the most recent load or eviction step.
    pub fn texture_stats(&self) -> &TextureStats {
        &self.streamer.stats
    }
}
