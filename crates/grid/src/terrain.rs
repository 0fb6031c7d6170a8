use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_common::Rect;
use tessera_kernel::splitmix64;

use crate::cell::CellCoord;

/// Named terrain fields produced by world generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TerrainLayer {
    Height,
    Humidity,
    Danger,
}

impl TerrainLayer {
    pub const COUNT: usize = 3;

    pub const ALL: [TerrainLayer; Self::COUNT] = [
        TerrainLayer::Height,
        TerrainLayer::Humidity,
        TerrainLayer::Danger,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Per-cell field samples. The index treats this as an opaque payload apart from
/// point lookups.
///
/// Each sample covers `resolution × resolution` world units, starting at the
/// cell's top-left corner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainSamples {
    resolution: u32,
    width: u32,
    height: u32,
    layers: [Vec<u8>; TerrainLayer::COUNT],
}

impl TerrainSamples {
    /// Zeroed samples sized to cover `bounds` at the given resolution.
    pub fn for_bounds(bounds: &Rect, resolution: u32) -> Self {
        assert!(resolution > 0, "terrain resolution must be positive");
        let width = (bounds.width.max(1) as u32).div_ceil(resolution);
        let height = (bounds.height.max(1) as u32).div_ceil(resolution);
        let len = (width * height) as usize;
        Self {
            resolution,
            width,
            height,
            layers: std::array::from_fn(|_| vec![0; len]),
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layer(&self, layer: TerrainLayer) -> &[u8] {
        &self.layers[layer.index()]
    }

    pub fn get(&self, layer: TerrainLayer, sx: u32, sy: u32) -> u8 {
        self.layers[layer.index()][(sy * self.width + sx) as usize]
    }

    pub fn set(&mut self, layer: TerrainLayer, sx: u32, sy: u32, value: u8) {
        let w = self.width;
        self.layers[layer.index()][(sy * w + sx) as usize] = value;
    }

    /// Sample at an offset (world units) from the cell's top-left corner.
    /// Offsets past the last sample clamp to the edge.
    pub fn sample_at(&self, layer: TerrainLayer, local: Vec2) -> u8 {
        let sx = ((local.x.max(0.0) as u32) / self.resolution).min(self.width - 1);
        let sy = ((local.y.max(0.0) as u32) / self.resolution).min(self.height - 1);
        self.get(layer, sx, sy)
    }
}

/// What a generator knows about the cell it is filling.
#[derive(Debug, Clone, Copy)]
pub struct CellSite {
    pub coord: CellCoord,
    pub bounds: Rect,
    pub world_seed: u64,
}

/// Read-only terrain of the cells around the one being refined.
///
/// Holds shared handles taken after the generate pass, so a neighbour refined
/// in the same batch is still seen with its generated samples.
#[derive(Debug, Clone, Default)]
pub struct NeighborTerrain {
    cells: Vec<(Rect, Arc<TerrainSamples>)>,
}

impl NeighborTerrain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bounds: Rect, samples: Arc<TerrainSamples>) {
        self.cells.push((bounds, samples));
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Sample at a world position, if a neighbour covers it.
    pub fn sample_world(&self, layer: TerrainLayer, point: Vec2) -> Option<u8> {
        self.cells
            .iter()
            .find(|(bounds, _)| bounds.contains_point(point))
            .map(|(bounds, samples)| {
                let local = point - Vec2::new(bounds.x as f32, bounds.y as f32);
                samples.sample_at(layer, local)
            })
    }
}

/// World generation collaborator.
///
/// `generate` runs in the first parallel pass of stage 1 and `refine` in the
/// second. `generate` only sees its own cell; `refine` also reads the terrain of
/// the cell's neighbours, which is always generated by then. Nothing covers
/// positions past the world edge.
pub trait TerrainGenerator: Send + Sync {
    fn generate(&self, site: &CellSite) -> TerrainSamples;

    fn refine(&self, site: &CellSite, neighbors: &NeighborTerrain, samples: &mut TerrainSamples) {
        let _ = (site, neighbors, samples);
    }
}

/// Deterministic lattice value-noise generator.
///
/// The same seed always yields the same samples, which is what lets two worlds
/// with an identical seed share terrain.
#[derive(Debug, Clone, Copy)]
pub struct SeededTerrain {
    pub resolution: u32,
    /// Lattice spacing in world units.
    pub feature_size: f32,
}

impl Default for SeededTerrain {
    fn default() -> Self {
        Self {
            resolution: 8,
            feature_size: 64.0,
        }
    }
}

impl SeededTerrain {
    fn lattice(seed: u64, layer: TerrainLayer, lx: i64, ly: i64) -> f32 {
        let key = (lx as u64) ^ (ly as u64).rotate_left(32) ^ ((layer as u64) << 58);
        let h = splitmix64(seed ^ splitmix64(key));
        (h >> 40) as f32 / (1u64 << 24) as f32
    }

    fn value(&self, seed: u64, layer: TerrainLayer, world: Vec2) -> u8 {
        let p = world / self.feature_size;
        let (x0, y0) = (p.x.floor(), p.y.floor());
        let (tx, ty) = (smooth(p.x - x0), smooth(p.y - y0));
        let (lx, ly) = (x0 as i64, y0 as i64);
        let a = Self::lattice(seed, layer, lx, ly);
        let b = Self::lattice(seed, layer, lx + 1, ly);
        let c = Self::lattice(seed, layer, lx, ly + 1);
        let d = Self::lattice(seed, layer, lx + 1, ly + 1);
        let top = a + (b - a) * tx;
        let bottom = c + (d - c) * tx;
        ((top + (bottom - top) * ty) * 255.0).round().clamp(0.0, 255.0) as u8
    }
}

fn smooth(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

impl TerrainGenerator for SeededTerrain {
    fn generate(&self, site: &CellSite) -> TerrainSamples {
        let mut samples = TerrainSamples::for_bounds(&site.bounds, self.resolution);
        let res = self.resolution as f32;
        for layer in TerrainLayer::ALL {
            for sy in 0..samples.height() {
                for sx in 0..samples.width() {
                    let world = Vec2::new(
                        site.bounds.x as f32 + (sx as f32 + 0.5) * res,
                        site.bounds.y as f32 + (sy as f32 + 0.5) * res,
                    );
                    samples.set(layer, sx, sy, self.value(site.world_seed, layer, world));
                }
            }
        }
        samples
    }

    fn refine(&self, site: &CellSite, neighbors: &NeighborTerrain, samples: &mut TerrainSamples) {
        blur_height(site, neighbors, samples);
    }
}

/// 3×3 box blur of the height field. Taps past the cell's edge read the
/// neighbouring cell, so adjacent cells blend into each other; taps past the
/// world edge are dropped.
pub fn blur_height(site: &CellSite, neighbors: &NeighborTerrain, samples: &mut TerrainSamples) {
    let (w, h) = (samples.width() as i64, samples.height() as i64);
    let res = samples.resolution() as f32;
    let source = samples.layer(TerrainLayer::Height).to_vec();
    for sy in 0..h {
        for sx in 0..w {
            let mut sum = 0u32;
            let mut count = 0u32;
            for ny in sy - 1..=sy + 1 {
                for nx in sx - 1..=sx + 1 {
                    let tap = if (0..w).contains(&nx) && (0..h).contains(&ny) {
                        Some(source[(ny * w + nx) as usize])
                    } else {
                        let world = Vec2::new(
                            site.bounds.x as f32 + (nx as f32 + 0.5) * res,
                            site.bounds.y as f32 + (ny as f32 + 0.5) * res,
                        );
                        neighbors.sample_world(TerrainLayer::Height, world)
                    };
                    if let Some(v) = tap {
                        sum += v as u32;
                        count += 1;
                    }
                }
            }
            samples.set(TerrainLayer::Height, sx as u32, sy as u32, (sum / count) as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(x: u32, y: u32) -> CellSite {
        CellSite {
            coord: CellCoord::new(x, y),
            bounds: Rect::new(x as i32 * 100, y as i32 * 100, 100, 100),
            world_seed: 7,
        }
    }

    #[test]
    fn samples_cover_clipped_bounds() {
        let samples = TerrainSamples::for_bounds(&Rect::new(0, 0, 37, 100), 8);
        assert_eq!(samples.width(), 5);
        assert_eq!(samples.height(), 13);
        assert_eq!(samples.layer(TerrainLayer::Height).len(), 65);
    }

    #[test]
    fn sample_at_clamps_to_edge() {
        let mut samples = TerrainSamples::for_bounds(&Rect::new(0, 0, 16, 16), 8);
        samples.set(TerrainLayer::Danger, 1, 1, 200);
        assert_eq!(samples.sample_at(TerrainLayer::Danger, Vec2::new(9.0, 9.0)), 200);
        assert_eq!(samples.sample_at(TerrainLayer::Danger, Vec2::new(99.0, 99.0)), 200);
        assert_eq!(samples.sample_at(TerrainLayer::Danger, Vec2::new(0.0, 0.0)), 0);
    }

    #[test]
    fn generation_is_deterministic() {
        let generator = SeededTerrain::default();
        assert_eq!(generator.generate(&site(2, 3)), generator.generate(&site(2, 3)));
        assert_ne!(generator.generate(&site(2, 3)), generator.generate(&site(9, 9)));
    }

    #[test]
    fn refine_keeps_values_in_source_range() {
        let generator = SeededTerrain::default();
        let s = site(1, 1);
        let raw = generator.generate(&s);
        let mut refined = raw.clone();
        generator.refine(&s, &NeighborTerrain::new(), &mut refined);

        let min = *raw.layer(TerrainLayer::Height).iter().min().unwrap();
        let max = *raw.layer(TerrainLayer::Height).iter().max().unwrap();
        for v in refined.layer(TerrainLayer::Height) {
            assert!(*v >= min && *v <= max);
        }
        // Only the height field is smoothed.
        assert_eq!(raw.layer(TerrainLayer::Humidity), refined.layer(TerrainLayer::Humidity));
    }

    fn flat(bounds: &Rect, value: u8) -> TerrainSamples {
        let mut samples = TerrainSamples::for_bounds(bounds, 10);
        for sy in 0..samples.height() {
            for sx in 0..samples.width() {
                samples.set(TerrainLayer::Height, sx, sy, value);
            }
        }
        samples
    }

    #[test]
    fn refined_edge_reads_neighbour_terrain() {
        let s = site(1, 1);
        let right = site(2, 1);
        let raw = flat(&s.bounds, 100);
        let mut view = NeighborTerrain::new();
        view.push(right.bounds, Arc::new(flat(&right.bounds, 255)));
        assert_eq!(view.len(), 1);

        let mut alone = raw.clone();
        blur_height(&s, &NeighborTerrain::new(), &mut alone);
        assert_eq!(alone, raw);

        let mut blended = raw.clone();
        blur_height(&s, &view, &mut blended);
        for sy in 0..raw.height() {
            // (6 × 100 + 3 × 255) / 9, or (4 × 100 + 2 × 255) / 6 on the edge rows.
            assert_eq!(blended.get(TerrainLayer::Height, 9, sy), 151, "row {sy}");
            assert_eq!(blended.get(TerrainLayer::Height, 8, sy), 100, "row {sy}");
            assert_eq!(blended.get(TerrainLayer::Height, 0, sy), 100, "row {sy}");
        }
    }

    #[test]
    fn neighbour_lookup_uses_world_position() {
        let mut samples = TerrainSamples::for_bounds(&Rect::new(100, 0, 100, 100), 10);
        samples.set(TerrainLayer::Danger, 1, 0, 9);
        let mut view = NeighborTerrain::new();
        view.push(Rect::new(100, 0, 100, 100), Arc::new(samples));
        assert_eq!(view.sample_world(TerrainLayer::Danger, Vec2::new(115.0, 5.0)), Some(9));
        assert_eq!(view.sample_world(TerrainLayer::Danger, Vec2::new(95.0, 5.0)), None);
    }
}
