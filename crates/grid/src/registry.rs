use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tessera_kernel::WorldParams;

use crate::terrain::TerrainSamples;

/// Identity of a generated board: world seed and size plus cell geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    pub cell_width: u32,
    pub cell_height: u32,
}

impl TemplateKey {
    pub fn new(world: &WorldParams, cell_width: u32, cell_height: u32) -> Self {
        Self {
            seed: world.seed,
            width: world.width,
            height: world.height,
            cell_width,
            cell_height,
        }
    }

    /// Same generated map: seed, width and height match.
    pub fn same_world(&self, other: &TemplateKey) -> bool {
        self.seed == other.seed && self.width == other.width && self.height == other.height
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seed_{}_{}x{}_{}x{}",
            self.seed, self.width, self.height, self.cell_width, self.cell_height
        )
    }
}

/// Generated data of a fully constructed grid, in `all_cells` order.
#[derive(Debug)]
pub struct BoardTemplate {
    key: TemplateKey,
    terrain: Vec<Arc<TerrainSamples>>,
}

impl BoardTemplate {
    pub(crate) fn new(key: TemplateKey, terrain: Vec<Arc<TerrainSamples>>) -> Self {
        Self { key, terrain }
    }

    pub fn key(&self) -> TemplateKey {
        self.key
    }

    pub fn terrain(&self) -> &[Arc<TerrainSamples>] {
        &self.terrain
    }
}

/// Registry of live, fully constructed worlds.
///
/// A grid registers its board when construction finishes and keeps it alive;
/// the registry only holds weak references, so a world stops being a template
/// source as soon as its grid is dropped.
#[derive(Debug, Default)]
pub struct WorldRegistry {
    boards: Mutex<Vec<Weak<BoardTemplate>>>,
}

impl WorldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, board: &Arc<BoardTemplate>) {
        let mut boards = self.boards.lock().unwrap_or_else(PoisonError::into_inner);
        boards.retain(|weak| weak.strong_count() > 0);
        boards.push(Arc::downgrade(board));
        tracing::debug!(key = %board.key(), live = boards.len(), "board registered");
    }

    /// Find a live board of the same world. Boards with different cell geometry
    /// cannot be copied cell-by-cell and are skipped.
    pub fn find(&self, key: &TemplateKey) -> Option<Arc<BoardTemplate>> {
        let boards = self.boards.lock().unwrap_or_else(PoisonError::into_inner);
        for board in boards.iter().filter_map(Weak::upgrade) {
            if !board.key().same_world(key) {
                continue;
            }
            if board.key() == *key {
                return Some(board);
            }
            tracing::debug!(
                template = %board.key(),
                wanted = %key,
                "same world but different cell geometry, not copying"
            );
        }
        None
    }

    /// Number of registered boards whose grid is still alive.
    pub fn live_count(&self) -> usize {
        self.boards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u64) -> TemplateKey {
        TemplateKey {
            seed,
            width: 1000,
            height: 800,
            cell_width: 100,
            cell_height: 100,
        }
    }

    #[test]
    fn key_display_names_the_board() {
        assert_eq!(key(5).to_string(), "seed_5_1000x800_100x100");
    }

    #[test]
    fn find_matches_live_board() {
        let registry = WorldRegistry::new();
        let board = Arc::new(BoardTemplate::new(key(5), Vec::new()));
        registry.register(&board);

        assert!(registry.find(&key(5)).is_some());
        assert!(registry.find(&key(6)).is_none());
    }

    #[test]
    fn dropped_boards_are_not_live() {
        let registry = WorldRegistry::new();
        let board = Arc::new(BoardTemplate::new(key(5), Vec::new()));
        registry.register(&board);
        assert_eq!(registry.live_count(), 1);

        drop(board);
        assert_eq!(registry.live_count(), 0);
        assert!(registry.find(&key(5)).is_none());
    }

    #[test]
    fn different_cell_geometry_is_skipped() {
        let registry = WorldRegistry::new();
        let board = Arc::new(BoardTemplate::new(key(5), Vec::new()));
        registry.register(&board);

        let other = TemplateKey {
            cell_width: 50,
            ..key(5)
        };
        assert!(registry.find(&other).is_none());
    }
}
