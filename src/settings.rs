//! Configuration for a [`crate::map::VoxelMap`].
use crate::{
    astar::PlannerSettings, error::SettingsError, filter::GridFilter,
    projector::ProjectionSettings,
};

/// Ground height used for waypoints before any ground sample has arrived.
pub const FALLBACK_WAYPOINT_GROUND: f32 = -1.0;

/// All settings of a voxel map. Use [`NavSettingsBuilder`] to build validated settings.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NavSettings {
    pub projection: ProjectionSettings,
    pub planner: PlannerSettings,
    /// Waypoints are placed this far above the ground height.
    pub waypoint_height: f32,
    /// Hard bound on node expansions for every path query.
    pub max_expansions: Option<usize>,
}

impl Default for NavSettings {
    fn default() -> Self {
        NavSettings {
            projection: ProjectionSettings::default(),
            planner: PlannerSettings::default(),
            waypoint_height: 0.4,
            max_expansions: None,
        }
    }
}

impl NavSettings {
    /// Cells per metre, shared by voxel quantization and grid projection.
    pub fn resolution(&self) -> f32 {
        self.projection.resolution
    }
}

/// Builder for [`NavSettings`].
///
/// Example usage:
/// ```
/// use bevy::math::UVec2;
/// use bevy_voxelnav::prelude::*;
///
/// let settings = NavSettingsBuilder::new()
///     .resolution(20.0)
///     .noise_threshold(3)
///     .obstacle_buffer(2)
///     .filter(GridFilter::Morphological { kernel: UVec2::new(3, 3) })
///     .build()
///     .unwrap();
///
/// assert_eq!(settings.resolution(), 20.0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct NavSettingsBuilder {
    settings: NavSettings,
}

impl NavSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grid cells per metre. Must be finite and positive.
    pub fn resolution(mut self, resolution: f32) -> Self {
        self.settings.projection.resolution = resolution;
        self
    }

    /// Voxels above the ground band need a density strictly above this to be obstacles.
    pub fn noise_threshold(mut self, threshold: u32) -> Self {
        self.settings.projection.noise_threshold = threshold;
        self
    }

    /// Height above the lowest ground sample that still counts as ground.
    pub fn ground_offset(mut self, offset: f32) -> Self {
        self.settings.projection.ground_offset = offset;
        self
    }

    /// Cleanup pass run on every projected grid.
    pub fn filter(mut self, filter: GridFilter) -> Self {
        self.settings.projection.filter = filter;
        self
    }

    /// Largest grid, in cells, a projection may allocate. Bigger maps fail with
    /// [`crate::error::PathError::GridTooLarge`].
    pub fn max_cells(mut self, max_cells: usize) -> Self {
        self.settings.projection.max_cells = max_cells;
        self
    }

    /// Restricts the search to 4-connected movement.
    pub fn disable_diagonal(mut self) -> Self {
        self.settings.planner.diagonal = false;
        self
    }

    /// Radius in cells within which blocked cells make a step more expensive. 0 disables it.
    pub fn obstacle_buffer(mut self, radius: u32) -> Self {
        self.settings.planner.obstacle_buffer = radius;
        self
    }

    pub fn buffer_weight(mut self, weight: f32) -> Self {
        self.settings.planner.buffer_weight = weight;
        self
    }

    /// Lets the search cross blocked cells at this terrain cost instead of rejecting them.
    pub fn blocked_cost(mut self, cost: f32) -> Self {
        self.settings.planner.blocked_cost = Some(cost);
        self
    }

    pub fn waypoint_height(mut self, height: f32) -> Self {
        self.settings.waypoint_height = height;
        self
    }

    pub fn max_expansions(mut self, max: usize) -> Self {
        self.settings.max_expansions = Some(max);
        self
    }

    /// Pass in a [`ProjectionSettings`] to replace every projection value at once.
    pub fn projection_settings(mut self, projection: ProjectionSettings) -> Self {
        self.settings.projection = projection;
        self
    }

    /// Pass in a [`PlannerSettings`] to replace every planner value at once.
    pub fn planner_settings(mut self, planner: PlannerSettings) -> Self {
        self.settings.planner = planner;
        self
    }

    /// Validates and returns the settings.
    pub fn build(self) -> Result<NavSettings, SettingsError> {
        let settings = self.settings;
        let projection = &settings.projection;
        let planner = &settings.planner;

        if !projection.resolution.is_finite() || projection.resolution <= 0.0 {
            return Err(SettingsError::Resolution(projection.resolution));
        }

        finite("ground_offset", projection.ground_offset)?;
        finite("buffer_weight", planner.buffer_weight)?;
        finite("waypoint_height", settings.waypoint_height)?;

        if projection.max_cells == 0 {
            return Err(SettingsError::MaxCells);
        }

        if planner.buffer_weight < 0.0 {
            return Err(SettingsError::BufferWeight(planner.buffer_weight));
        }

        if let GridFilter::Morphological { kernel } = projection.filter {
            if kernel.x == 0 || kernel.y == 0 {
                return Err(SettingsError::EmptyKernel);
            }
        }

        if let Some(cost) = planner.blocked_cost {
            if !cost.is_finite() || cost < 0.0 {
                return Err(SettingsError::BlockedCost(cost));
            }
        }

        Ok(settings)
    }
}

fn finite(name: &'static str, value: f32) -> Result<(), SettingsError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SettingsError::NonFinite { name, value })
    }
}
