use glam::{UVec2, Vec2};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_common::{CameraView, EntityId, GroupSet, GroupTag, Rect};
use tessera_kernel::{EntityData, World, WorldParams, splitmix64};

use crate::cell::{Cell, CellCoord};
use crate::config::GridConfig;
use crate::construction::Construction;
use crate::error::GridError;
use crate::registry::{BoardTemplate, TemplateKey, WorldRegistry};
use crate::terrain::{SeededTerrain, TerrainGenerator, TerrainLayer};
use crate::textures::TextureStreamer;

/// What the index needs from an entity handle.
///
/// The current-cell back reference is not part of the handle: the grid keeps it
/// in its own entity table.
pub trait Placeable {
    fn id(&self) -> EntityId;
    fn position(&self) -> Vec2;
    fn groups(&self) -> GroupSet;

    fn draw_layer(&self) -> i32 {
        0
    }

    /// Point used for vertical draw ordering and bottom-anchored distance checks.
    fn anchor(&self) -> Vec2 {
        self.position()
    }
}

impl Placeable for (&EntityId, &EntityData) {
    fn id(&self) -> EntityId {
        *self.0
    }

    fn position(&self) -> Vec2 {
        self.1.position
    }

    fn groups(&self) -> GroupSet {
        self.1.groups
    }

    fn draw_layer(&self) -> i32 {
        self.1.draw_layer
    }

    fn anchor(&self) -> Vec2 {
        self.1.anchor()
    }
}

/// How the cell dimensions are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellSize {
    /// Scale the largest sprite footprint by `GridConfig::cell_scale`, so any
    /// entity fits inside one cell.
    FitSprites(UVec2),
    /// Keep an existing geometry (clones and restored saves).
    Explicit(UVec2),
}

/// Largest width and height over a sprite catalog.
pub fn largest_footprint(footprints: impl IntoIterator<Item = UVec2>) -> UVec2 {
    footprints.into_iter().fold(UVec2::ZERO, UVec2::max)
}

/// Collaborators a grid is built with.
///
/// The worker pool is sized from `config.max_threads` when the context is
/// created and shared by every grid built from a clone of it, so several live
/// worlds never exceed that many stage 1 threads between them.
#[derive(Clone)]
pub struct GridContext {
    pub config: GridConfig,
    pub registry: Arc<WorldRegistry>,
    pub generator: Arc<dyn TerrainGenerator>,
    pool: Arc<rayon::ThreadPool>,
}

impl GridContext {
    pub fn new(config: GridConfig, registry: Arc<WorldRegistry>) -> Result<Self, GridError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_threads)
            .thread_name(|i| format!("tessera-worker-{i}"))
            .build()?;
        Ok(Self {
            config,
            registry,
            generator: Arc::new(SeededTerrain::default()),
            pool: Arc::new(pool),
        })
    }

    pub fn with_generator(mut self, generator: Arc<dyn TerrainGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Worker pool shared by grids built from this context.
    pub fn pool(&self) -> &Arc<rayon::ThreadPool> {
        &self.pool
    }
}

/// Which point of a candidate a distance query measures to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Measure {
    #[default]
    Position,
    Anchor,
}

/// Result of preparing the background for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundPass {
    /// Cells to draw, top row first.
    pub cells: Vec<CellCoord>,
    /// At least one cell was revealed; the fog-of-war overlay must be rebuilt.
    pub fog_changed: bool,
}

#[derive(Debug, Clone, Copy)]
struct EntityEntry {
    cell: usize,
    groups: GroupSet,
    position: Vec2,
    anchor: Vec2,
    draw_layer: i32,
}

/// Inclusive range of cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CellRange {
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
}

impl CellRange {
    fn coords(self) -> impl Iterator<Item = CellCoord> {
        (self.x0..=self.x1).flat_map(move |x| (self.y0..=self.y1).map(move |y| CellCoord::new(x, y)))
    }
}

/// Spatial index over a 2D world, split into fixed-size cells.
///
/// Entity membership changes take `&mut self` and queries take `&self`, so a move
/// can never be observed half-done. A host that wants to mutate membership from
/// several threads at once must put each cell's group collections behind their
/// own lock; the grid itself does not.
pub struct Grid {
    pub(crate) world: WorldParams,
    pub(crate) cell_width: u32,
    pub(crate) cell_height: u32,
    pub(crate) cells_x: u32,
    pub(crate) cells_y: u32,
    /// All cells, x-major: index = x * cells_y + y.
    pub(crate) cells: Vec<Cell>,
    entries: HashMap<EntityId, EntityEntry>,
    pub(crate) construction: Construction,
    pub(crate) streamer: TextureStreamer,
    pub(crate) config: GridConfig,
    pub(crate) generator: Arc<dyn TerrainGenerator>,
    pub(crate) registry: Arc<WorldRegistry>,
    pub(crate) pool: Arc<rayon::ThreadPool>,
    pub(crate) board: Option<Arc<BoardTemplate>>,
}

impl Grid {
    /// Allocate every cell, precompute neighbours, then either copy a live
    /// template of the same world or start staged construction at stage 0.
    pub fn new(world: &WorldParams, size: CellSize, ctx: GridContext) -> Result<Self, GridError> {
        ctx.config.validate()?;
        if world.width == 0 || world.height == 0 {
            return Err(GridError::InvalidWorldSize {
                width: world.width,
                height: world.height,
            });
        }
        let (cell_width, cell_height) = match size {
            CellSize::FitSprites(largest) => (
                (largest.x as f32 * ctx.config.cell_scale).round() as u32,
                (largest.y as f32 * ctx.config.cell_scale).round() as u32,
            ),
            CellSize::Explicit(size) => (size.x, size.y),
        };
        if cell_width == 0 || cell_height == 0 {
            return Err(GridError::InvalidCellSize {
                width: cell_width,
                height: cell_height,
            });
        }

        let cells_x = world.width.div_ceil(cell_width);
        let cells_y = world.height.div_ceil(cell_height);
        let _span = tracing::info_span!("grid_new", seed = world.seed, cells_x, cells_y).entered();

        let mut cells = Vec::with_capacity((cells_x * cells_y) as usize);
        for x in 0..cells_x {
            for y in 0..cells_y {
                let x_min = x * cell_width;
                let y_min = y * cell_height;
                let bounds = Rect::new(
                    x_min as i32,
                    y_min as i32,
                    cell_width.min(world.width - x_min) as i32,
                    cell_height.min(world.height - y_min) as i32,
                );
                let index = cells.len() as u64;
                let placement_seed = splitmix64(world.seed ^ splitmix64(index));
                cells.push(Cell::new(CellCoord::new(x, y), bounds, placement_seed));
            }
        }
        for cell in &mut cells {
            let neighbors = neighbors_of(cell.coord(), ctx.config.neighbor_radius, cells_x, cells_y);
            cell.set_neighbors(neighbors);
        }

        let total = cells.len();
        let mut grid = Self {
            world: *world,
            cell_width,
            cell_height,
            cells_x,
            cells_y,
            cells,
            entries: HashMap::new(),
            construction: Construction::begin(total),
            streamer: TextureStreamer::new(ctx.config.textures.clone()),
            config: ctx.config,
            generator: ctx.generator,
            registry: ctx.registry,
            pool: ctx.pool,
            board: None,
        };

        if grid.copy_board_from_template() {
            grid.construction = Construction::finished();
        }
        Ok(grid)
    }

    fn copy_board_from_template(&mut self) -> bool {
        let key = self.template_key();
        let Some(board) = self.registry.find(&key) else {
            return false;
        };
        if board.terrain().len() != self.cells.len() {
            tracing::warn!(template = %key, "template cell count differs, rebuilding");
            return false;
        }
        for (cell, terrain) in self.cells.iter_mut().zip(board.terrain()) {
            cell.copy_from_template(Arc::clone(terrain));
        }
        tracing::info!(template = %key, "board copied from live template");
        self.board = Some(board);
        true
    }

    /// Parameters of the world this grid indexes.
    pub fn world(&self) -> &WorldParams {
        &self.world
    }

    /// Config the grid was built with.
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Width of a full cell in world units.
    pub fn cell_width(&self) -> u32 {
        self.cell_width
    }

    /// Height of a full cell in world units.
    pub fn cell_height(&self) -> u32 {
        self.cell_height
    }

    /// Number of cell columns.
    pub fn cells_x(&self) -> u32 {
        self.cells_x
    }

    /// Number of cell rows.
    pub fn cells_y(&self) -> u32 {
        self.cells_y
    }

    /// Key other worlds of the same seed and geometry find this board under.
    pub fn template_key(&self) -> TemplateKey {
        TemplateKey::new(&self.world, self.cell_width, self.cell_height)
    }

    /// Board published by this grid, or copied from a template. `None` while
    /// construction is running.
    pub fn board(&self) -> Option<&Arc<BoardTemplate>> {
        self.board.as_ref()
    }

    /// All cells in fixed x-major order.
    pub fn all_cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Cell at `coord`, or `None` past the grid edge.
    pub fn cell(&self, coord: CellCoord) -> Option<&Cell> {
        if coord.x < self.cells_x && coord.y < self.cells_y {
            Some(&self.cells[self.index_of(coord)])
        } else {
            None
        }
    }

    pub(crate) fn index_of(&self, coord: CellCoord) -> usize {
        (coord.x * self.cells_y + coord.y) as usize
    }

    /// Cell coordinate of a world position.
    ///
    /// Callers are expected to pass positions inside the world; out-of-range
    /// input trips a debug assertion and is clamped onto the edge cells otherwise.
    pub fn cell_coord_at(&self, position: Vec2) -> CellCoord {
        debug_assert!(
            self.world.bounds().contains_point(position),
            "position {position} lies outside the {}x{} world",
            self.world.width,
            self.world.height
        );
        CellCoord::new(
            axis_cell(position.x, self.cell_width, self.cells_x),
            axis_cell(position.y, self.cell_height, self.cells_y),
        )
    }

    /// Cell containing a world position.
    pub fn resolve_cell(&self, position: Vec2) -> &Cell {
        &self.cells[self.index_of(self.cell_coord_at(position))]
    }

    /// Cells overlapping the square of side `2 × distance` centred on `position`,
    /// clamped to the world. Conservative: corners beyond the circle are included.
    pub fn cells_in_radius(&self, position: Vec2, distance: f32) -> Vec<&Cell> {
        self.range_in_radius(position, distance)
            .coords()
            .map(|c| &self.cells[self.index_of(c)])
            .collect()
    }

    /// Cells covering `rect`, padded by one cell on every side so sprites whose
    /// position cell sits just outside the rectangle are still drawn.
    pub fn cells_in_rect(&self, rect: Rect) -> Vec<&Cell> {
        self.range_in_rect(rect)
            .into_iter()
            .flat_map(CellRange::coords)
            .map(|c| &self.cells[self.index_of(c)])
            .collect()
    }

    pub(crate) fn range_in_radius(&self, position: Vec2, distance: f32) -> CellRange {
        let max_x = self.world.width as f32 - 1.0;
        let max_y = self.world.height as f32 - 1.0;
        let x_min = (position.x - distance).clamp(0.0, max_x);
        let x_max = (position.x + distance).clamp(0.0, max_x);
        let y_min = (position.y - distance).clamp(0.0, max_y);
        let y_max = (position.y + distance).clamp(0.0, max_y);
        CellRange {
            x0: axis_cell(x_min, self.cell_width, self.cells_x),
            x1: axis_cell(x_max, self.cell_width, self.cells_x),
            y0: axis_cell(y_min, self.cell_height, self.cells_y),
            y1: axis_cell(y_max, self.cell_height, self.cells_y),
        }
    }

    /// `None` when the padded range lies entirely outside the grid.
    pub(crate) fn range_in_rect(&self, rect: Rect) -> Option<CellRange> {
        let cw = self.cell_width as i64;
        let ch = self.cell_height as i64;
        let x0 = ((rect.left() as i64).div_euclid(cw) - 1).max(0);
        let x1 = ((rect.right() as i64).div_euclid(cw) + 1).min(self.cells_x as i64 - 1);
        let y0 = ((rect.top() as i64).div_euclid(ch) - 1).max(0);
        let y1 = ((rect.bottom() as i64).div_euclid(ch) + 1).min(self.cells_y as i64 - 1);
        if x0 > x1 || y0 > y1 {
            return None;
        }
        Some(CellRange {
            x0: x0 as u32,
            x1: x1 as u32,
            y0: y0 as u32,
            y1: y1 as u32,
        })
    }

    pub(crate) fn indices_in_rect(&self, rect: Rect) -> Vec<usize> {
        self.range_in_rect(rect)
            .into_iter()
            .flat_map(CellRange::coords)
            .map(|c| self.index_of(c))
            .collect()
    }

    // --- entity membership ---

    /// Number of entities that currently have a cell.
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Cell a tracked entity is filed under.
    pub fn current_cell(&self, id: EntityId) -> Option<CellCoord> {
        self.entries.get(&id).map(|e| self.cells[e.cell].coord())
    }

    /// Last position the grid saw for `id`.
    pub fn position_of(&self, id: EntityId) -> Option<Vec2> {
        self.entries.get(&id).map(|e| e.position)
    }

    /// Bring an entity's cell membership up to date with its position and groups.
    ///
    /// Unknown entities are inserted. Returns true when the entity was inserted or
    /// changed cell.
    pub fn update_location(&mut self, entity: &impl Placeable) -> bool {
        let id = entity.id();
        let new_cell = self.index_of(self.cell_coord_at(entity.position()));
        let groups = entity.groups();

        let (old_cell, old_groups) = match self.entries.get_mut(&id) {
            None => {
                self.entries.insert(
                    id,
                    EntityEntry {
                        cell: new_cell,
                        groups,
                        position: entity.position(),
                        anchor: entity.anchor(),
                        draw_layer: entity.draw_layer(),
                    },
                );
                for tag in groups.iter() {
                    self.cells[new_cell].add(tag, id);
                }
                return true;
            }
            Some(entry) => {
                entry.position = entity.position();
                entry.anchor = entity.anchor();
                entry.draw_layer = entity.draw_layer();
                if entry.cell == new_cell && entry.groups == groups {
                    return false;
                }
                let old = (entry.cell, entry.groups);
                entry.cell = new_cell;
                entry.groups = groups;
                old
            }
        };

        for tag in old_groups.iter() {
            self.cells[old_cell].remove(tag, id);
        }
        for tag in groups.iter() {
            self.cells[new_cell].add(tag, id);
        }
        if old_cell != new_cell {
            tracing::trace!(?id, from = ?self.cells[old_cell].coord(), to = ?self.cells[new_cell].coord(), "entity changed cell");
        }
        old_cell != new_cell
    }

    /// Drop an entity from its cell. It is no longer found by any query.
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        for tag in entry.groups.iter() {
            self.cells[entry.cell].remove(tag, id);
        }
        true
    }

    /// File a tracked entity under one more group in its current cell.
    pub fn add_to_group(&mut self, id: EntityId, tag: GroupTag) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        entry.groups.insert(tag);
        self.cells[entry.cell].add(tag, id)
    }

    /// Drop a tracked entity from one group in its current cell.
    pub fn remove_from_group(&mut self, id: EntityId, tag: GroupTag) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        entry.groups.remove(tag);
        self.cells[entry.cell].remove(tag, id)
    }

    /// Mirror the whole entity table: update every entity and forget the ones the
    /// world no longer has.
    pub fn sync_world(&mut self, world: &World) -> usize {
        let mut moved = 0;
        for entity in world.entities() {
            if self.update_location(&entity) {
                moved += 1;
            }
        }
        let stale: Vec<EntityId> = self
            .entries
            .keys()
            .filter(|id| world.get(**id).is_none())
            .copied()
            .collect();
        for id in stale {
            self.remove_entity(id);
        }
        moved
    }

    // --- entity queries ---

    /// Entities of `tag` within `distance` of `center`, excluding `exclude`.
    pub fn entities_in_radius(
        &self,
        center: Vec2,
        distance: f32,
        tag: GroupTag,
        exclude: Option<EntityId>,
    ) -> Vec<EntityId> {
        self.collect_within(center, distance, tag, exclude, Measure::Position)
    }

    /// Entities of `tag` around a tracked entity. The centre is the entity's
    /// position shifted by `offset`; `measure` picks which point of each candidate
    /// is compared. The entity itself is never returned.
    pub fn entities_within_distance(
        &self,
        id: EntityId,
        distance: f32,
        tag: GroupTag,
        offset: Vec2,
        measure: Measure,
    ) -> Vec<EntityId> {
        let Some(entry) = self.entries.get(&id) else {
            return Vec::new();
        };
        let center = self.world.clamp_position(entry.position + offset);
        self.collect_within(center, distance, tag, Some(id), measure)
    }

    fn collect_within(
        &self,
        center: Vec2,
        distance: f32,
        tag: GroupTag,
        exclude: Option<EntityId>,
        measure: Measure,
    ) -> Vec<EntityId> {
        let mut found = Vec::new();
        for coord in self.range_in_radius(center, distance).coords() {
            for id in self.cells[self.index_of(coord)].entities(tag) {
                if Some(*id) == exclude {
                    continue;
                }
                let Some(entry) = self.entries.get(id) else {
                    continue;
                };
                let point = match measure {
                    Measure::Position => entry.position,
                    Measure::Anchor => entry.anchor,
                };
                if point.distance(center) <= distance {
                    found.push(*id);
                }
            }
        }
        found
    }

    /// Entities of `tag` in every cell `cells_in_rect` returns. No exact filter:
    /// the padding is what keeps boundary-crossing sprites visible.
    pub fn entities_in_rect(&self, rect: Rect, tag: GroupTag) -> Vec<EntityId> {
        self.indices_in_rect(rect)
            .into_iter()
            .flat_map(|i| self.cells[i].entities(tag).iter().copied())
            .collect()
    }

    /// Entities of `tag` in the cells around the camera view.
    pub fn entities_in_view(&self, camera: &CameraView, tag: GroupTag) -> Vec<EntityId> {
        self.entities_in_rect(camera.view_rect, tag)
    }

    /// Visible entities in draw order: layer first, then the vertical anchor.
    ///
    /// Sorting happens across all cells at once; per-cell drawing would break
    /// ordering for sprites overlapping a cell boundary.
    pub fn entities_for_draw(&self, camera: &CameraView) -> Vec<EntityId> {
        let mut visible: Vec<(i32, f32, EntityId)> = self
            .entities_in_view(camera, GroupTag::Visible)
            .into_iter()
            .filter_map(|id| self.entries.get(&id).map(|e| (e.draw_layer, e.anchor.y, id)))
            .collect();
        visible.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(a.1.total_cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });
        visible.into_iter().map(|(_, _, id)| id).collect()
    }

    /// Entities of `tag` in the precomputed neighbourhood of a tracked entity's cell.
    pub fn entities_in_neighborhood(&self, id: EntityId, tag: GroupTag) -> Vec<EntityId> {
        let Some(entry) = self.entries.get(&id) else {
            return Vec::new();
        };
        self.cells[entry.cell]
            .neighbors()
            .iter()
            .flat_map(|c| self.cells[self.index_of(*c)].entities(tag).iter().copied())
            .collect()
    }

    /// Every entity of `tag`, gathered in parallel on the worker pool.
    pub fn all_entities(&self, tag: GroupTag, visited_only: bool) -> Vec<EntityId> {
        let cells = &self.cells;
        self.pool.install(|| {
            cells
                .par_iter()
                .filter(|cell| !visited_only || cell.visited_by_player())
                .flat_map_iter(|cell| cell.entities(tag).iter().copied())
                .collect()
        })
    }

    // --- fog of war and terrain ---

    /// Cells the player has seen.
    pub fn cells_visited(&self) -> Vec<&Cell> {
        self.cells.iter().filter(|c| c.visited_by_player()).collect()
    }

    /// Cells still under fog of war.
    pub fn cells_not_visited(&self) -> Vec<&Cell> {
        self.cells.iter().filter(|c| !c.visited_by_player()).collect()
    }

    /// Cells to draw behind the sprites, top row first. With the map enabled,
    /// cells overlapping the view become visited.
    pub fn background_pass(&mut self, camera: &CameraView) -> BackgroundPass {
        let mut indices = self.indices_in_rect(camera.view_rect);
        indices.sort_by_key(|i| self.cells[*i].coord().y);

        let mut fog_changed = false;
        if self.world.map_enabled {
            for &i in &indices {
                let cell = &mut self.cells[i];
                if camera.view_rect.intersects(&cell.bounds()) && cell.mark_visited() {
                    fog_changed = true;
                }
            }
        }
        BackgroundPass {
            cells: indices.into_iter().map(|i| self.cells[i].coord()).collect(),
            fog_changed,
        }
    }

    /// Terrain value at a world position, or `None` before the cell is generated.
    pub fn field_value(&self, layer: TerrainLayer, position: Vec2) -> Option<u8> {
        let cell = self.resolve_cell(position);
        let bounds = cell.bounds();
        let local = position - Vec2::new(bounds.x as f32, bounds.y as f32);
        cell.terrain().map(|t| t.sample_at(layer, local))
    }
}

fn axis_cell(pos: f32, cell_len: u32, count: u32) -> u32 {
    ((pos / cell_len as f32).floor().max(0.0) as u32).min(count - 1)
}

/// Square neighbourhood of `radius` cells, clipped to the grid, centre included.
fn neighbors_of(coord: CellCoord, radius: u32, cells_x: u32, cells_y: u32) -> Vec<CellCoord> {
    let r = radius as i64;
    let mut out = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
    for dx in -r..=r {
        for dy in -r..=r {
            let x = coord.x as i64 + dx;
            let y = coord.y as i64 + dy;
            if x >= 0 && x < cells_x as i64 && y >= 0 && y < cells_y as i64 {
                out.push(CellCoord::new(x as u32, y as u32));
            }
        }
    }
    out
}
