use glam::{UVec2, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_common::{EntityId, GroupSet, Rect};

/// Static parameters of a world instance.
///
/// Seed, width and height together identify a generated map: two worlds with the
/// same triple produce the same terrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldParams {
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    /// Demo worlds build silently (no progress reporting).
    #[serde(default)]
    pub demo_mode: bool,
    /// Whether the player map is enabled; fog of war is only tracked when it is.
    #[serde(default = "default_true")]
    pub map_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl WorldParams {
    pub fn new(seed: u64, width: u32, height: u32) -> Self {
        assert!(width > 0 && height > 0, "world dimensions must be positive");
        Self {
            seed,
            width,
            height,
            demo_mode: false,
            map_enabled: true,
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    /// Clamp a position into the world. Callers use this before handing positions
    /// to the cell index, which assumes in-bounds input.
    pub fn clamp_position(&self, pos: Vec2) -> Vec2 {
        let max_x = (self.width as f32 - 1.0).max(0.0);
        let max_y = (self.height as f32 - 1.0).max(0.0);
        Vec2::new(pos.x.clamp(0.0, max_x), pos.y.clamp(0.0, max_y))
    }
}

/// Per-entity data stored in the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub position: Vec2,
    /// Groups the cell index files this entity under.
    pub groups: GroupSet,
    /// Draw layer; lower layers are drawn first.
    pub draw_layer: i32,
    /// Size of the entity's sprite in world units.
    pub footprint: UVec2,
}

impl EntityData {
    pub fn new(position: Vec2, groups: GroupSet) -> Self {
        Self {
            position,
            groups,
            draw_layer: 0,
            footprint: UVec2::ONE,
        }
    }

    /// Bottom-centre of the sprite rectangle, used for vertical draw ordering.
    pub fn anchor(&self) -> Vec2 {
        Vec2::new(self.position.x, self.position.y + self.footprint.y as f32 / 2.0)
    }
}

/// An event record produced by every mutation to the entity table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorldEvent {
    Spawned { id: EntityId, data: EntityData },
    Despawned { id: EntityId, data: EntityData },
    Moved { id: EntityId, old: Vec2, new: Vec2 },
}

/// The authoritative world state: parameters plus the entity table.
///
/// The cell index never owns entities; it mirrors positions handed to it from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    params: WorldParams,
    entities: BTreeMap<EntityId, EntityData>,
    #[serde(skip)]
    event_log: Vec<WorldEvent>,
}

impl World {
    pub fn new(params: WorldParams) -> Self {
        Self {
            params,
            entities: BTreeMap::new(),
            event_log: Vec::new(),
        }
    }

    pub fn params(&self) -> &WorldParams {
        &self.params
    }

    pub fn seed(&self) -> u64 {
        self.params.seed
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    pub fn entities(&self) -> &BTreeMap<EntityId, EntityData> {
        &self.entities
    }

    /// Spawn a new entity. The position is clamped into the world.
    pub fn spawn(&mut self, data: EntityData) -> EntityId {
        let id = EntityId::new();
        self.spawn_with_id(id, data);
        id
    }

    /// Spawn an entity with a specific id (used for replay).
    pub fn spawn_with_id(&mut self, id: EntityId, mut data: EntityData) {
        data.position = self.params.clamp_position(data.position);
        self.entities.insert(id, data);
        self.event_log.push(WorldEvent::Spawned { id, data });
    }

    pub fn despawn(&mut self, id: EntityId) -> Option<EntityData> {
        let data = self.entities.remove(&id);
        if let Some(data) = data {
            self.event_log.push(WorldEvent::Despawned { id, data });
        }
        data
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityData> {
        self.entities.get(&id)
    }

    /// Move an entity, clamping into the world. Returns false for unknown ids.
    pub fn set_position(&mut self, id: EntityId, position: Vec2) -> bool {
        let clamped = self.params.clamp_position(position);
        let Some(data) = self.entities.get_mut(&id) else {
            return false;
        };
        let old = data.position;
        data.position = clamped;
        tracing::trace!(?id, ?old, new = ?clamped, "entity moved");
        self.event_log.push(WorldEvent::Moved {
            id,
            old,
            new: clamped,
        });
        true
    }

    /// Apply a recorded event without logging it again.
    pub fn apply(&mut self, event: &WorldEvent) {
        match event {
            WorldEvent::Spawned { id, data } => {
                self.entities.insert(*id, *data);
            }
            WorldEvent::Despawned { id, .. } => {
                self.entities.remove(id);
            }
            WorldEvent::Moved { id, new, .. } => {
                if let Some(data) = self.entities.get_mut(id) {
                    data.position = *new;
                }
            }
        }
    }

    /// Reconstruct the entity table from a sequence of events.
    pub fn replay(params: WorldParams, events: &[WorldEvent]) -> Self {
        let mut world = Self::new(params);
        for event in events {
            world.apply(event);
        }
        world
    }
}

/// Splitmix64 step. Derives reproducible per-cell seeds from the world seed.
pub fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::GroupTag;

    fn visible() -> GroupSet {
        [GroupTag::All, GroupTag::Visible].into_iter().collect()
    }

    #[test]
    fn world_starts_empty() {
        let w = World::new(WorldParams::new(1, 100, 100));
        assert_eq!(w.entity_count(), 0);
        assert_eq!(w.seed(), 1);
    }

    #[test]
    fn spawn_clamps_into_world() {
        let mut w = World::new(WorldParams::new(1, 100, 50));
        let id = w.spawn(EntityData::new(Vec2::new(250.0, -4.0), visible()));
        assert_eq!(w.get(id).unwrap().position, Vec2::new(99.0, 0.0));
    }

    #[test]
    fn set_position_logs_event() {
        let mut w = World::new(WorldParams::new(1, 100, 100));
        let id = w.spawn(EntityData::new(Vec2::new(1.0, 1.0), visible()));
        assert!(w.set_position(id, Vec2::new(20.0, 30.0)));
        assert_eq!(w.get(id).unwrap().position, Vec2::new(20.0, 30.0));
        assert_eq!(w.events().len(), 2);

        assert!(!w.set_position(EntityId::new(), Vec2::ZERO));
    }

    #[test]
    fn despawn_returns_data() {
        let mut w = World::new(WorldParams::new(1, 100, 100));
        let id = w.spawn(EntityData::new(Vec2::new(5.0, 5.0), visible()));
        assert!(w.despawn(id).is_some());
        assert!(w.despawn(id).is_none());
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn replay_reconstructs_entities() {
        let params = WorldParams::new(3, 500, 500);
        let mut w = World::new(params);
        let a = w.spawn(EntityData::new(Vec2::new(10.0, 10.0), visible()));
        let b = w.spawn(EntityData::new(Vec2::new(20.0, 20.0), visible()));
        w.set_position(a, Vec2::new(300.0, 100.0));
        w.despawn(b);

        let replayed = World::replay(params, w.events());
        assert_eq!(replayed.entity_count(), 1);
        assert_eq!(replayed.get(a).unwrap().position, Vec2::new(300.0, 100.0));
    }

    #[test]
    fn apply_does_not_log() {
        let params = WorldParams::new(3, 500, 500);
        let mut source = World::new(params);
        source.spawn(EntityData::new(Vec2::new(10.0, 10.0), visible()));

        let mut target = World::new(params);
        for event in source.events() {
            target.apply(event);
        }
        assert_eq!(target.entity_count(), 1);
        assert!(target.events().is_empty());
    }

    #[test]
    fn anchor_is_bottom_centre() {
        let mut data = EntityData::new(Vec2::new(10.0, 10.0), visible());
        data.footprint = UVec2::new(8, 20);
        assert_eq!(data.anchor(), Vec2::new(10.0, 20.0));
    }

    #[test]
    fn splitmix_is_deterministic() {
        assert_eq!(splitmix64(42), splitmix64(42));
        assert_ne!(splitmix64(1), splitmix64(2));
    }
}
