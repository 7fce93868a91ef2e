//! Quantized voxel cells and their observation evidence.
use bevy::math::{IVec3, Vec3};
use std::hash::{Hash, Hasher};

/// Integer cell coordinate of a point snapped to a grid resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelKey(pub IVec3);

impl VoxelKey {
    /// Snaps `point` to the nearest cell centre at `resolution` cells per metre.
    #[inline]
    pub fn quantize(point: Vec3, resolution: f32) -> Self {
        VoxelKey((point * resolution).round().as_ivec3())
    }

    /// Centre of this cell in world space.
    #[inline]
    pub fn center(self, resolution: f32) -> Vec3 {
        self.0.as_vec3() / resolution
    }
}

/// A voxel is a quantized position with a count of how often it was observed.
///
/// Equality and hashing only look at the quantized key, never at the density.
#[derive(Debug, Clone, Copy)]
pub struct Voxel {
    key: VoxelKey,
    /// Cells per metre on each axis at creation time.
    scale: Vec3,
    /// Number of observations merged into this cell, starts at 1.
    pub(crate) density: u32,
}

impl Voxel {
    /// Creates a voxel for `point` at `resolution` with a density of 1.
    pub fn new(point: Vec3, resolution: f32) -> Self {
        Voxel {
            key: VoxelKey::quantize(point, resolution),
            scale: Vec3::splat(resolution),
            density: 1,
        }
    }

    /// Rebuilds a voxel from stored parts. `position` is snapped again using `scale`.
    pub fn from_parts(position: Vec3, scale: Vec3, density: u32) -> Self {
        Voxel {
            key: VoxelKey((position * scale).round().as_ivec3()),
            scale,
            density: density.max(1),
        }
    }

    pub fn key(&self) -> VoxelKey {
        self.key
    }

    /// World position of the voxel centre.
    pub fn position(&self) -> Vec3 {
        self.key.0.as_vec3() / self.scale
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Edge lengths of the voxel in metres.
    pub fn size(&self) -> Vec3 {
        Vec3::ONE / self.scale
    }

    pub fn density(&self) -> u32 {
        self.density
    }

    pub(crate) fn observe(&mut self, count: u32) {
        self.density = self.density.saturating_add(count);
    }
}

impl PartialEq for Voxel {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Voxel {}

impl Hash for Voxel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// A voxel handed to a renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderVoxel {
    pub position: Vec3,
    pub size: Vec3,
    pub density: u32,
    /// Lies within the ground band rather than above it.
    pub ground: bool,
}
