//! The sparse voxel set that accumulates observed points.
use bevy::{log, math::Vec3};

use crate::{
    voxel::{RenderVoxel, Voxel, VoxelKey},
    FxHashSet, FxIndexMap,
};

/// Horizontal bounds of the voxel set, recomputed by a full scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extents {
    pub x_min: f32,
    pub x_max: f32,
    pub z_min: f32,
    pub z_max: f32,
}

impl Extents {
    /// Extents covering a single point.
    pub fn from_point(point: Vec3) -> Self {
        Extents {
            x_min: point.x,
            x_max: point.x,
            z_min: point.z,
            z_max: point.z,
        }
    }

    /// Grows the extents to include `point`.
    pub fn include(&mut self, point: Vec3) {
        self.x_min = self.x_min.min(point.x);
        self.x_max = self.x_max.max(point.x);
        self.z_min = self.z_min.min(point.z);
        self.z_max = self.z_max.max(point.z);
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn length(&self) -> f32 {
        self.z_max - self.z_min
    }
}

/// Mapping from quantized cell to accumulated evidence.
///
/// Keys are unique and the set only grows until [`VoxelGrid::reset`]. Iteration follows
/// insertion order, so a projection of an unchanged set is reproducible.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    resolution: f32,
    voxels: FxIndexMap<VoxelKey, Voxel>,
    ground_height: Option<f32>,
    // Keys already handed out by `render_batch`.
    rendered: FxHashSet<VoxelKey>,
}

impl VoxelGrid {
    /// Creates an empty grid quantizing at `resolution` cells per metre.
    pub fn new(resolution: f32) -> Self {
        VoxelGrid {
            resolution,
            voxels: FxIndexMap::default(),
            ground_height: None,
            rendered: FxHashSet::default(),
        }
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// Snaps `point` to the grid and merges it: a known cell gains one density,
    /// an unknown cell is inserted with density 1.
    pub fn add_point(&mut self, point: Vec3) {
        if !point.is_finite() {
            log::warn!("Ignoring non-finite point {:?}", point);
            return;
        }

        let voxel = Voxel::new(point, self.resolution);
        self.merge(voxel);
    }

    pub fn add_points<I: IntoIterator<Item = Vec3>>(&mut self, points: I) {
        for point in points {
            self.add_point(point);
        }
    }

    /// Folds a ground height sample into the running minimum.
    pub fn update_ground_height(&mut self, sample: f32) {
        if !sample.is_finite() {
            log::warn!("Ignoring non-finite ground height {}", sample);
            return;
        }

        self.ground_height = Some(match self.ground_height {
            Some(current) => current.min(sample),
            None => sample,
        });
    }

    /// Lowest ground height seen so far, if any sample has arrived.
    pub fn ground_height(&self) -> Option<f32> {
        self.ground_height
    }

    pub fn get(&self, key: VoxelKey) -> Option<&Voxel> {
        self.voxels.get(&key)
    }

    /// Density of the cell containing `point`, 0 if it was never observed.
    pub fn density_at(&self, point: Vec3) -> u32 {
        self.get(VoxelKey::quantize(point, self.resolution))
            .map_or(0, Voxel::density)
    }

    /// Iterates the voxels in insertion order.
    pub fn voxels(&self) -> impl Iterator<Item = &Voxel> + '_ {
        self.voxels.values()
    }

    /// Scans every voxel for the current horizontal bounds.
    pub fn extents(&self) -> Option<Extents> {
        let mut iter = self.voxels.values().map(Voxel::position);
        let first = iter.next()?;

        Some(iter.fold(Extents::from_point(first), |mut extents, position| {
            extents.include(position);
            extents
        }))
    }

    /// Positions of every voxel, for a point cloud renderer.
    pub fn points(&self) -> Vec<Vec3> {
        self.voxels.values().map(Voxel::position).collect()
    }

    /// Voxels dense enough to draw. Unless `redraw_all` is set, voxels returned by an
    /// earlier call are skipped.
    pub fn render_batch(
        &mut self,
        redraw_all: bool,
        noise_threshold: u32,
        ground_level: f32,
    ) -> Vec<RenderVoxel> {
        let mut batch = Vec::new();

        for (key, voxel) in self.voxels.iter() {
            if voxel.density() < noise_threshold {
                continue;
            }

            if !redraw_all && self.rendered.contains(key) {
                continue;
            }

            let position = voxel.position();
            batch.push(RenderVoxel {
                position,
                size: voxel.size(),
                density: voxel.density(),
                ground: position.y < ground_level,
            });
            self.rendered.insert(*key);
        }

        batch
    }

    /// Merges previously stored voxels. Each voxel is re-keyed at this grid's resolution
    /// and densities of voxels landing in the same cell are summed.
    pub fn load<I: IntoIterator<Item = Voxel>>(&mut self, voxels: I) {
        for voxel in voxels {
            let key = VoxelKey::quantize(voxel.position(), self.resolution);
            self.voxels
                .entry(key)
                .and_modify(|existing| existing.observe(voxel.density()))
                .or_insert_with(|| {
                    Voxel::from_parts(
                        key.center(self.resolution),
                        Vec3::splat(self.resolution),
                        voxel.density(),
                    )
                });
        }
    }

    /// Drops every voxel, the ground height and the render record.
    pub fn reset(&mut self) {
        self.voxels.clear();
        self.ground_height = None;
        self.rendered.clear();
    }

    fn merge(&mut self, voxel: Voxel) {
        self.voxels
            .entry(voxel.key())
            .and_modify(|existing| existing.observe(1))
            .or_insert(voxel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_point_merges() {
        let mut grid = VoxelGrid::new(50.0);
        for _ in 0..7 {
            grid.add_point(Vec3::new(0.1, 0.2, 0.3));
        }

        assert_eq!(grid.len(), 1);
        assert_eq!(grid.density_at(Vec3::new(0.1, 0.2, 0.3)), 7);
    }

    #[test]
    fn test_jittered_points_share_a_voxel() {
        let mut grid = VoxelGrid::new(10.0);
        grid.add_points([
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.02, 0.98, 1.04),
            Vec3::new(0.96, 1.01, 0.999),
        ]);

        assert_eq!(grid.len(), 1);
        assert_eq!(grid.voxels().next().unwrap().density(), 3);
    }

    #[test]
    fn test_distinct_points_make_distinct_voxels() {
        let mut grid = VoxelGrid::new(10.0);
        grid.add_points([Vec3::ZERO, Vec3::new(0.1, 0.0, 0.0), Vec3::new(0.0, 0.0, 0.1)]);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn test_non_finite_point_ignored() {
        let mut grid = VoxelGrid::new(10.0);
        grid.add_point(Vec3::new(f32::NAN, 0.0, 0.0));
        grid.add_point(Vec3::new(0.0, f32::INFINITY, 0.0));
        assert!(grid.is_empty());
    }

    #[test]
    fn test_ground_height_running_minimum() {
        let mut grid = VoxelGrid::new(10.0);
        assert_eq!(grid.ground_height(), None);

        grid.update_ground_height(-0.5);
        grid.update_ground_height(0.2);
        grid.update_ground_height(-1.25);
        grid.update_ground_height(f32::NAN);

        assert_eq!(grid.ground_height(), Some(-1.25));
    }

    #[test]
    fn test_extents_full_scan() {
        let mut grid = VoxelGrid::new(10.0);
        assert_eq!(grid.extents(), None);

        grid.add_points([
            Vec3::new(-1.0, 0.0, 2.0),
            Vec3::new(3.0, 5.0, -4.0),
            Vec3::new(0.5, -2.0, 0.5),
        ]);

        let extents = grid.extents().unwrap();
        assert_eq!(extents.x_min, -1.0);
        assert_eq!(extents.x_max, 3.0);
        assert_eq!(extents.z_min, -4.0);
        assert_eq!(extents.z_max, 2.0);
        assert_eq!(extents.width(), 4.0);
        assert_eq!(extents.length(), 6.0);
    }

    #[test]
    fn test_render_batch_incremental() {
        let mut grid = VoxelGrid::new(10.0);
        for _ in 0..3 {
            grid.add_point(Vec3::new(0.0, 1.0, 0.0));
        }
        grid.add_point(Vec3::new(1.0, -1.0, 0.0));
        grid.add_point(Vec3::new(1.0, -1.0, 0.0));
        grid.add_point(Vec3::new(2.0, 0.0, 0.0));

        let batch = grid.render_batch(false, 2, 0.0);
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().any(|v| v.ground && v.position.y < 0.0));
        assert!(batch.iter().any(|v| !v.ground && v.density == 3));

        assert!(grid.render_batch(false, 2, 0.0).is_empty());
        assert_eq!(grid.render_batch(true, 2, 0.0).len(), 2);
    }

    #[test]
    fn test_load_merges_and_rekeys() {
        let mut grid = VoxelGrid::new(10.0);
        grid.add_point(Vec3::new(0.1, 0.0, 0.0));

        grid.load([
            Voxel::from_parts(Vec3::new(0.1, 0.0, 0.0), Vec3::splat(10.0), 4),
            Voxel::from_parts(Vec3::new(0.5, 0.0, 0.0), Vec3::splat(10.0), 2),
            // Finer source grid, lands in the same 10 cells/m voxel as 0.5.
            Voxel::from_parts(Vec3::new(0.52, 0.0, 0.0), Vec3::splat(50.0), 1),
        ]);

        assert_eq!(grid.len(), 2);
        assert_eq!(grid.density_at(Vec3::new(0.1, 0.0, 0.0)), 5);
        assert_eq!(grid.density_at(Vec3::new(0.5, 0.0, 0.0)), 3);
    }

    #[test]
    fn test_reset() {
        let mut grid = VoxelGrid::new(10.0);
        grid.add_point(Vec3::ONE);
        grid.update_ground_height(0.0);
        grid.reset();
        assert!(grid.is_empty());
        assert_eq!(grid.ground_height(), None);
    }
}
