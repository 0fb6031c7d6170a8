use glam::UVec2;
use serde::{Deserialize, Serialize};
use tessera_kernel::WorldParams;

use crate::cell::CellData;
use crate::error::GridError;
use crate::grid::{CellSize, Grid, GridContext};

/// Saved state of a grid: cell geometry plus per-cell payloads in `all_cells`
/// order. Entity membership is not saved; it is rebuilt from the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub cell_width: u32,
    pub cell_height: u32,
    pub cells: Vec<CellData>,
}

impl Grid {
    pub fn serialize(&self) -> GridSnapshot {
        GridSnapshot {
            cell_width: self.cell_width,
            cell_height: self.cell_height,
            cells: self.cells.iter().map(|c| c.to_data()).collect(),
        }
    }

    /// Rebuild a grid with the saved geometry and apply each cell's payload in
    /// order. Cells with saved terrain skip generation when construction runs.
    pub fn deserialize(
        snapshot: GridSnapshot,
        world: &WorldParams,
        ctx: GridContext,
    ) -> Result<Grid, GridError> {
        let size = UVec2::new(snapshot.cell_width, snapshot.cell_height);
        let mut grid = Grid::new(world, CellSize::Explicit(size), ctx)?;
        if grid.cells.len() != snapshot.cells.len() {
            return Err(GridError::CellCountMismatch {
                expected: grid.cells.len(),
                found: snapshot.cells.len(),
            });
        }
        for (cell, data) in grid.cells.iter_mut().zip(snapshot.cells) {
            cell.apply_data(data);
        }
        tracing::debug!(cells = grid.cells.len(), "grid restored from snapshot");
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::config;
    use crate::registry::WorldRegistry;
    use crate::textures::tests::CountingUploader;
    use std::sync::Arc;
    use tessera_common::{CameraView, Rect};

    fn ctx() -> GridContext {
        GridContext::new(config(1), Arc::new(WorldRegistry::new())).unwrap()
    }

    #[test]
    fn restore_keeps_geometry_terrain_and_fog() {
        let world = WorldParams::new(11, 730, 410);
        let mut grid = Grid::new(&world, CellSize::Explicit(UVec2::new(64, 48)), ctx()).unwrap();
        grid.run_to_completion(&mut CountingUploader::default());
        grid.background_pass(&CameraView::new(Rect::new(0, 0, 100, 100)));

        let snapshot = grid.serialize();
        let mut restored = Grid::deserialize(snapshot.clone(), &world, ctx()).unwrap();
        assert_eq!(restored.cell_width(), 64);
        assert_eq!(restored.cell_height(), 48);
        assert_eq!((restored.cells_x(), restored.cells_y()), (grid.cells_x(), grid.cells_y()));
        assert_eq!(restored.cells_visited().len(), grid.cells_visited().len());

        restored.run_to_completion(&mut CountingUploader::default());
        assert_eq!(restored.serialize(), snapshot);
    }

    #[test]
    fn mismatched_cell_count_is_rejected() {
        let world = WorldParams::new(1, 400, 400);
        let grid = Grid::new(&world, CellSize::Explicit(UVec2::new(100, 100)), ctx()).unwrap();
        let mut snapshot = grid.serialize();
        snapshot.cells.pop();

        let err = Grid::deserialize(snapshot, &world, ctx());
        assert!(matches!(
            err,
            Err(GridError::CellCountMismatch {
                expected: 16,
                found: 15
            })
        ));
    }

    #[test]
    fn saved_world_without_area_is_rejected() {
        let world = WorldParams::new(1, 400, 400);
        let grid = Grid::new(&world, CellSize::Explicit(UVec2::new(100, 100)), ctx()).unwrap();
        let saved: WorldParams =
            serde_json::from_str(r#"{ "seed": 1, "width": 0, "height": 400 }"#).unwrap();

        let err = Grid::deserialize(grid.serialize(), &saved, ctx());
        assert!(matches!(err, Err(GridError::InvalidWorldSize { width: 0, height: 400 })));
    }
}
