use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tessera_common::{EntityId, GroupTag, Rect};

use crate::terrain::{CellSite, NeighborTerrain, TerrainGenerator, TerrainSamples};
use crate::textures::TextureHandle;

/// Grid coordinate of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
}

impl CellCoord {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// How far a single cell has come through construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CellStage {
    Empty,
    Generated,
    Refined,
    Finalized,
}

/// Serialized payload of one cell, in the order handed to the save subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellData {
    pub terrain: Option<TerrainSamples>,
    pub placement_seed: u64,
    pub visited_by_player: bool,
}

/// A fixed rectangular region of the world.
///
/// Group collections hold entity handles only; positions live in the grid's
/// entity table. Neighbours are set once, right after the grid is allocated.
#[derive(Debug)]
pub struct Cell {
    coord: CellCoord,
    bounds: Rect,
    groups: [HashSet<EntityId>; GroupTag::COUNT],
    neighbors: Vec<CellCoord>,
    visited_by_player: bool,
    pub(crate) texture: Option<TextureHandle>,
    terrain: Option<Arc<TerrainSamples>>,
    stage: CellStage,
    placement_seed: u64,
}

impl Cell {
    pub(crate) fn new(coord: CellCoord, bounds: Rect, placement_seed: u64) -> Self {
        Self {
            coord,
            bounds,
            groups: std::array::from_fn(|_| HashSet::new()),
            neighbors: Vec::new(),
            visited_by_player: false,
            texture: None,
            terrain: None,
            stage: CellStage::Empty,
            placement_seed,
        }
    }

    pub fn coord(&self) -> CellCoord {
        self.coord
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn center(&self) -> Vec2 {
        self.bounds.center()
    }

    pub fn distance_to(&self, point: Vec2) -> f32 {
        self.center().distance(point)
    }

    /// Cells within the grid's neighbour radius, this cell included.
    pub fn neighbors(&self) -> &[CellCoord] {
        &self.neighbors
    }

    pub(crate) fn set_neighbors(&mut self, neighbors: Vec<CellCoord>) {
        assert!(
            self.neighbors.is_empty(),
            "neighbours of cell {:?} are already computed",
            self.coord
        );
        self.neighbors = neighbors;
    }

    pub fn entities(&self, tag: GroupTag) -> &HashSet<EntityId> {
        &self.groups[tag.index()]
    }

    pub fn contains(&self, tag: GroupTag, id: EntityId) -> bool {
        self.groups[tag.index()].contains(&id)
    }

    pub(crate) fn add(&mut self, tag: GroupTag, id: EntityId) -> bool {
        self.groups[tag.index()].insert(id)
    }

    pub(crate) fn remove(&mut self, tag: GroupTag, id: EntityId) -> bool {
        self.groups[tag.index()].remove(&id)
    }

    pub fn visited_by_player(&self) -> bool {
        self.visited_by_player
    }

    /// Returns true the first time the cell is visited.
    pub(crate) fn mark_visited(&mut self) -> bool {
        !std::mem::replace(&mut self.visited_by_player, true)
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    pub fn has_texture(&self) -> bool {
        self.texture.is_some()
    }

    pub fn terrain(&self) -> Option<&TerrainSamples> {
        self.terrain.as_deref()
    }

    pub(crate) fn shared_terrain(&self) -> Option<&Arc<TerrainSamples>> {
        self.terrain.as_ref()
    }

    pub fn stage(&self) -> CellStage {
        self.stage
    }

    /// Seed handed to whoever places pieces inside this cell.
    pub fn placement_seed(&self) -> u64 {
        self.placement_seed
    }

    pub(crate) fn site(&self, world_seed: u64) -> CellSite {
        CellSite {
            coord: self.coord,
            bounds: self.bounds,
            world_seed,
        }
    }

    /// First stage 1 pass. Cells restored from a save keep their terrain.
    pub(crate) fn generate(&mut self, generator: &dyn TerrainGenerator, world_seed: u64) {
        if self.stage != CellStage::Empty {
            return;
        }
        let site = self.site(world_seed);
        self.terrain = Some(Arc::new(generator.generate(&site)));
        self.stage = CellStage::Generated;
    }

    /// Second stage 1 pass; depends on `generate` having run for this cell and
    /// for the neighbours in `neighbors`.
    pub(crate) fn refine(
        &mut self,
        generator: &dyn TerrainGenerator,
        world_seed: u64,
        neighbors: &NeighborTerrain,
    ) {
        if self.stage != CellStage::Generated {
            return;
        }
        let site = self.site(world_seed);
        if let Some(terrain) = self.terrain.as_mut() {
            generator.refine(&site, neighbors, Arc::make_mut(terrain));
        }
        self.stage = CellStage::Refined;
    }

    pub(crate) fn finalize(&mut self) {
        self.stage = CellStage::Finalized;
    }

    /// Adopt terrain generated by a structurally identical world.
    pub(crate) fn copy_from_template(&mut self, terrain: Arc<TerrainSamples>) {
        self.terrain = Some(terrain);
        self.stage = CellStage::Finalized;
    }

    pub fn to_data(&self) -> CellData {
        CellData {
            terrain: self.terrain.as_deref().cloned(),
            placement_seed: self.placement_seed,
            visited_by_player: self.visited_by_player,
        }
    }

    pub(crate) fn apply_data(&mut self, data: CellData) {
        if let Some(terrain) = data.terrain {
            self.terrain = Some(Arc::new(terrain));
            self.stage = self.stage.max(CellStage::Refined);
        }
        self.placement_seed = data.placement_seed;
        self.visited_by_player |= data.visited_by_player;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::SeededTerrain;

    fn cell() -> Cell {
        Cell::new(CellCoord::new(1, 2), Rect::new(100, 200, 100, 100), 99)
    }

    #[test]
    fn group_membership_is_per_tag() {
        let mut c = cell();
        let id = EntityId::new();
        assert!(c.add(GroupTag::All, id));
        assert!(!c.add(GroupTag::All, id));
        assert!(c.contains(GroupTag::All, id));
        assert!(!c.contains(GroupTag::Visible, id));
        assert!(c.remove(GroupTag::All, id));
        assert!(c.entities(GroupTag::All).is_empty());
    }

    #[test]
    fn visited_flag_is_monotonic() {
        let mut c = cell();
        assert!(c.mark_visited());
        assert!(!c.mark_visited());
        c.apply_data(CellData {
            terrain: None,
            placement_seed: 5,
            visited_by_player: false,
        });
        assert!(c.visited_by_player());
        assert_eq!(c.placement_seed(), 5);
    }

    #[test]
    #[should_panic(expected = "already computed")]
    fn neighbours_are_set_once() {
        let mut c = cell();
        c.set_neighbors(vec![CellCoord::new(1, 2)]);
        c.set_neighbors(vec![CellCoord::new(1, 2)]);
    }

    #[test]
    fn generate_then_refine_advances_stage() {
        let generator = SeededTerrain::default();
        let mut c = cell();
        // Refine before generate does nothing.
        c.refine(&generator, 1, &NeighborTerrain::new());
        assert_eq!(c.stage(), CellStage::Empty);

        c.generate(&generator, 1);
        assert_eq!(c.stage(), CellStage::Generated);
        c.refine(&generator, 1, &NeighborTerrain::new());
        assert_eq!(c.stage(), CellStage::Refined);
        assert!(c.terrain().is_some());
    }

    #[test]
    fn restored_terrain_is_not_regenerated() {
        let generator = SeededTerrain::default();
        let mut c = cell();
        let mut restored = TerrainSamples::for_bounds(&c.bounds(), 8);
        restored.set(crate::terrain::TerrainLayer::Height, 0, 0, 42);
        c.apply_data(CellData {
            terrain: Some(restored.clone()),
            placement_seed: 99,
            visited_by_player: false,
        });

        c.generate(&generator, 1);
        c.refine(&generator, 1, &NeighborTerrain::new());
        assert_eq!(c.terrain(), Some(&restored));
        assert_eq!(c.stage(), CellStage::Refined);
    }

    #[test]
    fn distance_is_measured_from_centre() {
        let c = cell();
        assert_eq!(c.center(), Vec2::new(150.0, 250.0));
        assert_eq!(c.distance_to(Vec2::new(150.0, 260.0)), 10.0);
    }
}
