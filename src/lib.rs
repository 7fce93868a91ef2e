//! Voxel occupancy mapping and grid path planning for Bevy.
//!
//! Points observed by a depth sensor are merged into a sparse [`voxel_grid::VoxelGrid`].
//! Path queries project the voxels onto a 2D [`occupancy::OccupancyGrid`], optionally clean
//! it with a [`filter::GridFilter`] and search it with [`astar::AStarPlanner`].
//! [`map::VoxelMap`] runs all of this on a worker thread and [`plugin::VoxelNavPlugin`]
//! exposes it to an ECS app.
use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

#[macro_use]
mod macros;

pub mod astar;
pub mod error;
pub mod filter;
mod flood_fill;
pub mod heap;
pub mod map;
pub mod neighbor;
pub mod occupancy;
pub mod path;
pub mod plugin;
pub mod projector;
pub mod settings;
pub mod snapshot;
pub mod voxel;
pub mod voxel_grid;

pub mod prelude {
    pub use crate::astar::{AStarPlanner, CancelToken, PlannerSettings, PlannerState, SearchLimits};
    pub use crate::error::{
        DecodeError, InvalidInput, MapError, PathError, ProjectionError, SettingsError,
    };
    pub use crate::filter::GridFilter;
    pub use crate::heap::Heap;
    pub use crate::map::{PathOverlay, VoxelMap};
    pub use crate::neighbor::*;
    pub use crate::occupancy::{OccupancyCode, OccupancyGrid};
    pub use crate::path::{NavPath, Path};
    pub use crate::plugin::{PathFailed, PathRequest, VoxelNav, VoxelNavPlugin, VoxelNavSet};
    pub use crate::projector::{OccupancyProjector, ProjectionSettings};
    pub use crate::settings::{NavSettings, NavSettingsBuilder};
    pub use crate::voxel::{RenderVoxel, Voxel, VoxelKey};
    pub use crate::voxel_grid::{Extents, VoxelGrid};
}

pub type NodeId = usize;

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;
