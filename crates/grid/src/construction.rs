//! Staged grid construction.
//!
//! Building a board is split into ticks so the host can keep rendering a
//! progress screen. Each call to [`Grid::run_next_stage`] does one slice of work:
//!
//! 0. Prepare: report progress, queue every cell for generation.
//! 1. Generate: take a batch of cells, run the generate pass over the batch and
//!    the cells its neighbourhoods reach into, then the refine pass over the
//!    batch. Both passes run in parallel.
//! 2. Finalize: sequentially finalize queued cells, uploading textures when the
//!    whole map is loaded eagerly.
//!
//! # Invariants
//! - The refine pass of a batch starts only after the generate pass has
//!   finished for every cell of the batch and every neighbour of those cells.
//! - Refinement reads neighbours as they were before the current batch was
//!   refined. Neighbours from earlier batches are already refined.
//! - A finished grid publishes its board to the world registry exactly once.

use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::grid::Grid;
use crate::registry::BoardTemplate;
use crate::terrain::NeighborTerrain;
use crate::textures::TextureUploader;

/// ETA reported before any cell of the current stage has completed.
pub const ETA_SENTINEL: Duration = Duration::from_secs(60 * 60);

/// Construction stage. Values outside the three stages are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Prepare = 0,
    Generate = 1,
    Finalize = 2,
}

impl Stage {
    pub fn index(self) -> u8 {
        self as u8
    }

    /// # Panics
    /// On a value that names no stage.
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Stage::Prepare,
            1 => Stage::Generate,
            2 => Stage::Finalize,
            other => panic!("unsupported construction stage {other}"),
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            Stage::Prepare => Some(Stage::Generate),
            Stage::Generate => Some(Stage::Finalize),
            Stage::Finalize => None,
        }
    }
}

/// Progress after one construction tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub completed: usize,
    pub total: usize,
    pub eta: Duration,
    /// Text for the loading screen; `None` for demo worlds.
    pub message: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Construction {
    in_progress: bool,
    stage: Stage,
    /// Cells still queued for the current stage, as a range of `all_cells`.
    pending: Range<usize>,
    total: usize,
    stage_started: Instant,
    last_progress: Option<Progress>,
}

impl Construction {
    pub(crate) fn begin(total: usize) -> Self {
        Self {
            in_progress: true,
            stage: Stage::Prepare,
            pending: 0..total,
            total,
            stage_started: Instant::now(),
            last_progress: None,
        }
    }

    pub(crate) fn finished() -> Self {
        Self {
            in_progress: false,
            stage: Stage::Finalize,
            pending: 0..0,
            total: 0,
            stage_started: Instant::now(),
            last_progress: None,
        }
    }

    fn completed(&self) -> usize {
        self.total - self.pending.len()
    }
}

/// Remaining time extrapolated from the average time per completed cell.
pub fn estimate_remaining(elapsed: Duration, completed: usize, total: usize) -> Duration {
    let remaining = total.saturating_sub(completed);
    let (Ok(completed), Ok(remaining)) = (u32::try_from(completed), u32::try_from(remaining)) else {
        return ETA_SENTINEL;
    };
    elapsed
        .checked_div(completed)
        .and_then(|per_cell| per_cell.checked_mul(remaining))
        .unwrap_or(ETA_SENTINEL)
}

/// `ss`, `mm:ss`, `hh:mm:ss` or `dd:hh:mm:ss`, depending on magnitude.
pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    let (days, hours, minutes, seconds) = (secs / 86_400, secs / 3600 % 24, secs / 60 % 60, secs % 60);
    if days > 0 {
        format!("{days:02}:{hours:02}:{minutes:02}:{seconds:02}")
    } else if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else if minutes > 0 {
        format!("{minutes:02}:{seconds:02}")
    } else {
        format!("{seconds:02}")
    }
}

impl Grid {
    /// Whether any construction stage is still pending.
    pub fn construction_in_progress(&self) -> bool {
        self.construction.in_progress
    }

    /// Current construction stage.
    pub fn construction_stage(&self) -> Stage {
        self.construction.stage
    }

    /// Cells still queued for the current stage.
    pub fn pending_cells(&self) -> usize {
        self.construction.pending.len()
    }

    /// Progress reported by the most recent tick.
    pub fn progress(&self) -> Option<&Progress> {
        self.construction.last_progress.as_ref()
    }

    /// Advance construction by one slice of work. Does nothing once complete.
    pub fn run_next_stage(&mut self, gpu: &mut dyn TextureUploader) -> Option<Progress> {
        if !self.construction.in_progress {
            return None;
        }
        let stage = self.construction.stage;
        let _span = tracing::info_span!("construction", stage = stage.index()).entered();

        let progress = match stage {
            Stage::Prepare => {
                let progress = self.report_progress();
                self.prepare_next_stage();
                progress
            }
            Stage::Generate => {
                self.generate_batch();
                let progress = self.report_progress();
                if self.construction.pending.is_empty() {
                    self.prepare_next_stage();
                }
                progress
            }
            Stage::Finalize => {
                self.finalize_chunk(gpu);
                let progress = self.report_progress();
                if self.construction.pending.is_empty() {
                    self.finish_construction();
                }
                progress
            }
        };
        Some(progress)
    }

    /// Tick until construction is complete. Returns the number of ticks.
    pub fn run_to_completion(&mut self, gpu: &mut dyn TextureUploader) -> usize {
        let mut ticks = 0;
        while self.run_next_stage(gpu).is_some() {
            ticks += 1;
        }
        ticks
    }

    fn prepare_next_stage(&mut self) {
        let Some(next) = self.construction.stage.next() else {
            return;
        };
        self.construction.stage = next;
        self.construction.pending = 0..self.cells.len();
        self.construction.total = self.cells.len();
        self.construction.stage_started = Instant::now();
        tracing::debug!(stage = next.index(), cells = self.cells.len(), "construction stage started");
    }

    fn generate_batch(&mut self) {
        let pending = self.construction.pending.clone();
        let end = pending.start.saturating_add(self.config.batch_size).min(pending.end);
        // Neighbours of the batch reach this far ahead in x-major order.
        let reach = self.config.neighbor_radius as usize * (self.cells_y as usize + 1);
        let ahead = end.saturating_add(reach).min(self.cells.len());
        let generator = &*self.generator;
        let seed = self.world.seed;

        let window = &mut self.cells[pending.start..ahead];
        self.pool
            .install(|| window.par_iter_mut().for_each(|cell| cell.generate(generator, seed)));

        let views: Vec<NeighborTerrain> = (pending.start..end).map(|i| self.neighbor_terrain(i)).collect();
        let batch = &mut self.cells[pending.start..end];
        self.pool.install(|| {
            batch
                .par_iter_mut()
                .zip(views)
                .for_each(|(cell, view)| cell.refine(generator, seed, &view))
        });

        tracing::trace!(from = pending.start, to = end, ahead, "generate batch done");
        self.construction.pending.start = end;
    }

    /// Terrain of every neighbour of the cell at `index`, the cell itself excluded.
    fn neighbor_terrain(&self, index: usize) -> NeighborTerrain {
        let cell = &self.cells[index];
        let mut view = NeighborTerrain::new();
        for &coord in cell.neighbors() {
            if coord == cell.coord() {
                continue;
            }
            let neighbor = &self.cells[self.index_of(coord)];
            if let Some(terrain) = neighbor.shared_terrain() {
                view.push(neighbor.bounds(), Arc::clone(terrain));
            }
        }
        view
    }

    fn finalize_chunk(&mut self, gpu: &mut dyn TextureUploader) {
        let whole_map = self.config.textures.load_whole_map;
        let chunk = if whole_map {
            self.config.textures.whole_map_finalize_chunk
        } else {
            usize::MAX
        };
        let pending = self.construction.pending.clone();
        let end = pending.start.saturating_add(chunk).min(pending.end);
        for index in pending.start..end {
            self.cells[index].finalize();
            if whole_map {
                self.load_texture(index, gpu);
            }
        }
        self.construction.pending.start = end;
    }

    fn report_progress(&mut self) -> Progress {
        let c = &self.construction;
        let completed = c.completed();
        let eta = estimate_remaining(c.stage_started.elapsed(), completed, c.total);
        let shown = format_eta(eta + Duration::from_secs(1));
        let message = (!self.world.demo_mode).then(|| {
            let status = match c.stage {
                Stage::Prepare | Stage::Generate => format!("preparation time left {shown}"),
                Stage::Finalize => format!("starting in {shown}"),
            };
            format!(
                "preparing island\nseed {}\n{} x {}\n{status}",
                self.world.seed, self.world.width, self.world.height
            )
        });
        tracing::info!(
            stage = c.stage.index(),
            completed,
            total = c.total,
            eta = %shown,
            "construction progress"
        );
        let progress = Progress {
            stage: c.stage,
            completed,
            total: c.total,
            eta,
            message,
        };
        self.construction.last_progress = Some(progress.clone());
        progress
    }

    fn finish_construction(&mut self) {
        self.construction.in_progress = false;
        let terrain: Option<Vec<_>> = self
            .cells
            .iter()
            .map(|cell| cell.shared_terrain().cloned())
            .collect();
        let key = self.template_key();
        match terrain {
            Some(terrain) => {
                let board = Arc::new(BoardTemplate::new(key, terrain));
                self.registry.register(&board);
                self.board = Some(board);
            }
            None => tracing::warn!(template = %key, "cells without terrain, board not published"),
        }
        tracing::info!(template = %key, cells = self.cells.len(), "construction complete");
    }
}
