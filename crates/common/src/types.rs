use glam::Vec2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an entity in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Integer world-space rectangle. `right()` and `bottom()` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> i32 {
        self.x
    }

    pub fn top(&self) -> i32 {
        self.y
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// Whether `point` lies inside, treating the right and bottom edges as open.
    pub fn contains_point(&self, point: Vec2) -> bool {
        point.x >= self.x as f32
            && point.x < self.right() as f32
            && point.y >= self.y as f32
            && point.y < self.bottom() as f32
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        other.left() < self.right()
            && self.left() < other.right()
            && other.top() < self.bottom()
            && self.top() < other.bottom()
    }
}

/// What the camera exposes to the index: a view rectangle in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraView {
    pub view_rect: Rect,
}

impl CameraView {
    pub fn new(view_rect: Rect) -> Self {
        Self { view_rect }
    }

    /// Camera centered on `center` with a view of the given size.
    pub fn centered(center: Vec2, width: i32, height: i32) -> Self {
        Self {
            view_rect: Rect::new(
                (center.x - width as f32 / 2.0).round() as i32,
                (center.y - height as f32 / 2.0).round() as i32,
                width,
                height,
            ),
        }
    }

    pub fn center(&self) -> Vec2 {
        self.view_rect.center()
    }
}

/// Category an entity is filed under within a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum GroupTag {
    All,
    Visible,
    ColBlocking,
    ColMovement,
    StateMachine,
    LightSource,
}

impl GroupTag {
    pub const COUNT: usize = 6;

    pub const ALL: [GroupTag; Self::COUNT] = [
        GroupTag::All,
        GroupTag::Visible,
        GroupTag::ColBlocking,
        GroupTag::ColMovement,
        GroupTag::StateMachine,
        GroupTag::LightSource,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Small fixed-size set of group tags, one bit per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GroupSet(u8);

impl GroupSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn with(mut self, tag: GroupTag) -> Self {
        self.insert(tag);
        self
    }

    pub fn insert(&mut self, tag: GroupTag) -> bool {
        let had = self.contains(tag);
        self.0 |= 1 << tag.index();
        !had
    }

    pub fn remove(&mut self, tag: GroupTag) -> bool {
        let had = self.contains(tag);
        self.0 &= !(1 << tag.index());
        had
    }

    pub fn contains(&self, tag: GroupTag) -> bool {
        self.0 & (1 << tag.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = GroupTag> + '_ {
        GroupTag::ALL.into_iter().filter(|tag| self.contains(*tag))
    }
}

impl FromIterator<GroupTag> for GroupSet {
    fn from_iter<I: IntoIterator<Item = GroupTag>>(iter: I) -> Self {
        let mut set = GroupSet::empty();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_uniqueness() {
        let a = EntityId::new();
        let b = EntityId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn rect_edges_are_exclusive() {
        let r = Rect::new(100, 200, 50, 10);
        assert_eq!(r.right(), 150);
        assert_eq!(r.bottom(), 210);
        assert!(r.contains_point(Vec2::new(100.0, 200.0)));
        assert!(r.contains_point(Vec2::new(149.9, 209.9)));
        assert!(!r.contains_point(Vec2::new(150.0, 205.0)));
        assert!(!r.contains_point(Vec2::new(120.0, 210.0)));
    }

    #[test]
    fn rect_intersection_needs_overlap() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(a.intersects(&Rect::new(5, 5, 10, 10)));
        // Touching edges do not overlap.
        assert!(!a.intersects(&Rect::new(10, 0, 10, 10)));
        assert!(a.contains_rect(&Rect::new(2, 2, 8, 8)));
        assert!(!a.contains_rect(&Rect::new(2, 2, 9, 8)));
    }

    #[test]
    fn camera_centered_view() {
        let cam = CameraView::centered(Vec2::new(500.0, 300.0), 200, 100);
        assert_eq!(cam.view_rect, Rect::new(400, 250, 200, 100));
        assert_eq!(cam.center(), Vec2::new(500.0, 300.0));
    }

    #[test]
    fn group_set_membership() {
        let mut set: GroupSet = [GroupTag::All, GroupTag::Visible].into_iter().collect();
        assert!(set.contains(GroupTag::All));
        assert!(set.contains(GroupTag::Visible));
        assert!(!set.contains(GroupTag::ColBlocking));
        assert_eq!(set.len(), 2);

        assert!(!set.insert(GroupTag::All));
        assert!(set.remove(GroupTag::Visible));
        assert!(!set.remove(GroupTag::Visible));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![GroupTag::All]);
    }

    #[test]
    fn group_tag_indices_are_dense() {
        for (i, tag) in GroupTag::ALL.iter().enumerate() {
            assert_eq!(tag.index(), i);
        }
    }
}
