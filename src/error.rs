//! Error types returned by the map, the planner and snapshot decoding.
use bevy::math::IVec2;
use thiserror::Error;

/// Why a start or end cell was rejected before searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("start cell {0} is outside the grid")]
    StartOutOfBounds(IVec2),
    #[error("start cell {0} is blocked")]
    StartBlocked(IVec2),
    #[error("end cell {0} is outside the grid")]
    EndOutOfBounds(IVec2),
    #[error("end cell {0} is blocked")]
    EndBlocked(IVec2),
    #[error("start position is not finite")]
    StartNotFinite,
    #[error("end position is not finite")]
    EndNotFinite,
}

/// Failure of a path query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathError {
    /// Start or end rejected, see [`InvalidInput`].
    #[error("invalid path request: {0}")]
    InvalidInput(#[from] InvalidInput),
    /// The open set emptied before the goal was reached.
    #[error("no path found")]
    Exhausted,
    /// The search was cancelled through its [`crate::astar::CancelToken`].
    #[error("search cancelled")]
    Cancelled,
    /// The search ran past its deadline or expansion budget.
    #[error("search exceeded its limits")]
    TimedOut,
    /// There are no voxels to build a grid from.
    #[error("voxel map is empty")]
    EmptyMap,
    /// The projected grid would exceed [`crate::projector::ProjectionSettings::max_cells`].
    #[error("projected grid needs {requested} cells, the limit is {limit}")]
    GridTooLarge { requested: u64, limit: usize },
    /// The map worker stopped before answering.
    #[error("voxel map worker is gone")]
    Disconnected,
}

impl PathError {
    /// True for failures caused by the request itself rather than the map contents.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, PathError::InvalidInput(_))
    }
}

/// Why no occupancy grid could be projected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("voxel map is empty")]
    EmptyMap,
    #[error("projected grid needs {requested} cells, the limit is {limit}")]
    GridTooLarge { requested: u64, limit: usize },
}

impl From<ProjectionError> for PathError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::EmptyMap => PathError::EmptyMap,
            ProjectionError::GridTooLarge { requested, limit } => {
                PathError::GridTooLarge { requested, limit }
            }
        }
    }
}

/// Failure to decode a persisted voxel snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("snapshot length {len} is not a multiple of the {record_size} byte record size")]
    Truncated { len: usize, record_size: usize },
    #[error("record {record} has a non-finite value in field {field}")]
    NonFiniteField { record: usize, field: &'static str },
    #[error("record {record} has density {density}, expected at least 1")]
    InvalidDensity { record: usize, density: i64 },
    #[error("record {record} has a non-positive scale")]
    InvalidScale { record: usize },
}

/// Rejected [`crate::settings::NavSettingsBuilder`] values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("resolution must be finite and positive, got {0}")]
    Resolution(f32),
    #[error("filter kernel must be at least 1x1")]
    EmptyKernel,
    #[error("blocked cell cost must be finite and non-negative, got {0}")]
    BlockedCost(f32),
    #[error("buffer weight must be non-negative, got {0}")]
    BufferWeight(f32),
    #[error("grid cell limit must be at least 1")]
    MaxCells,
    #[error("{name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f32 },
}

/// Failures of [`crate::map::VoxelMap`] calls other than path queries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("voxel map worker is gone")]
    Disconnected,
    #[error("could not start voxel map worker: {0}")]
    Spawn(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
