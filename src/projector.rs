//! Projects the voxel set down to a 2D [`OccupancyGrid`].
use bevy::log;

use crate::{
    error::ProjectionError,
    filter::GridFilter,
    occupancy::{OccupancyCode, OccupancyGrid, DEFAULT_MAX_CELLS},
    voxel::Voxel,
    voxel_grid::{Extents, VoxelGrid},
};

/// Ground height assumed for classification before any ground sample has arrived.
pub const FALLBACK_GROUND_HEIGHT: f32 = -10.0;

/// How voxels are classified when projected.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProjectionSettings {
    /// Grid cells per metre.
    pub resolution: f32,
    /// A voxel above the ground band needs a density strictly above this to count as an obstacle.
    pub noise_threshold: u32,
    /// Height above the ground height that is still considered ground.
    pub ground_offset: f32,
    /// Cleanup pass run on every projected grid.
    pub filter: GridFilter,
    /// Largest grid, in cells, a projection may allocate.
    pub max_cells: usize,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        ProjectionSettings {
            resolution: 50.0,
            noise_threshold: 5,
            ground_offset: 0.3,
            filter: GridFilter::None,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }
}

/// Builds fresh occupancy grids from voxel snapshots.
#[derive(Copy, Clone, Debug, Default)]
pub struct OccupancyProjector {
    settings: ProjectionSettings,
}

impl OccupancyProjector {
    pub fn new(settings: ProjectionSettings) -> Self {
        OccupancyProjector { settings }
    }

    pub fn settings(&self) -> &ProjectionSettings {
        &self.settings
    }

    /// Scans `voxels` for its extents and projects it.
    pub fn project_grid(&self, voxels: &VoxelGrid) -> Result<OccupancyGrid, ProjectionError> {
        let extents = voxels.extents().ok_or(ProjectionError::EmptyMap)?;
        self.project(voxels.voxels(), extents, voxels.ground_height())
    }

    /// Projects `voxels` into a grid covering `extents`.
    ///
    /// Voxels below `ground_height + ground_offset` mark their cell `Free`, dense voxels above
    /// it mark `Obstacle` and sparse ones leave the cell alone. When several voxels fall into
    /// one cell the last one in iteration order decides.
    pub fn project<'a, I>(
        &self,
        voxels: I,
        extents: Extents,
        ground_height: Option<f32>,
    ) -> Result<OccupancyGrid, ProjectionError>
    where
        I: IntoIterator<Item = &'a Voxel>,
    {
        let settings = &self.settings;
        let ground_level = ground_height.unwrap_or(FALLBACK_GROUND_HEIGHT) + settings.ground_offset;

        let mut grid = OccupancyGrid::new(extents, settings.resolution, settings.max_cells)
            .inspect_err(|err| log::warn!("Skipping projection: {}", err))?;

        timed!("Projected occupancy grid", {
            for voxel in voxels {
                let position = voxel.position();
                let Some(cell) = grid.world_to_cell(position).filter(|&c| grid.in_bounds(c)) else {
                    log::trace!("Voxel at {:?} projects outside the grid", position);
                    continue;
                };

                let code = if position.y < ground_level {
                    OccupancyCode::Free
                } else if voxel.density() > settings.noise_threshold {
                    OccupancyCode::Obstacle
                } else {
                    continue;
                };

                grid.set(cell.as_uvec2(), code);
            }
        });

        settings.filter.apply(&mut grid);

        log::debug!(
            "Projected {}x{} grid, {} free, {} obstacle",
            grid.rows(),
            grid.cols(),
            grid.count(OccupancyCode::Free),
            grid.count(OccupancyCode::Obstacle)
        );

        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::{UVec2, Vec3};

    fn projector(noise_threshold: u32) -> OccupancyProjector {
        OccupancyProjector::new(ProjectionSettings {
            resolution: 10.0,
            noise_threshold,
            ground_offset: 0.3,
            ..Default::default()
        })
    }

    #[test]
    fn test_grid_dimensions() {
        let mut voxels = VoxelGrid::new(10.0);
        voxels.add_points([Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.5)]);

        let grid = projector(5).project_grid(&voxels).unwrap();
        assert_eq!(grid.rows(), 10 + 10);
        assert_eq!(grid.cols(), 5 + 10);
    }

    #[test]
    fn test_empty_voxels_have_no_grid() {
        assert_eq!(
            projector(5).project_grid(&VoxelGrid::new(10.0)),
            Err(ProjectionError::EmptyMap)
        );
    }

    #[test]
    fn test_classification() {
        let mut voxels = VoxelGrid::new(10.0);
        voxels.update_ground_height(0.0);

        // Ground band.
        voxels.add_point(Vec3::new(0.0, 0.1, 0.0));
        // Dense, above ground.
        for _ in 0..6 {
            voxels.add_point(Vec3::new(0.5, 1.0, 0.0));
        }
        // Sparse, above ground.
        for _ in 0..5 {
            voxels.add_point(Vec3::new(1.0, 1.0, 0.0));
        }

        let grid = projector(5).project_grid(&voxels).unwrap();

        // x_max = 1.0, z_max = 0.0
        assert_eq!(grid.get(UVec2::new(11, 1)), Some(OccupancyCode::Free));
        assert_eq!(grid.get(UVec2::new(6, 1)), Some(OccupancyCode::Obstacle));
        assert_eq!(grid.get(UVec2::new(1, 1)), Some(OccupancyCode::Unknown));
        assert_eq!(grid.count(OccupancyCode::Free), 1);
        assert_eq!(grid.count(OccupancyCode::Obstacle), 1);
    }

    #[test]
    fn test_fallback_ground_height() {
        let mut voxels = VoxelGrid::new(10.0);
        voxels.add_point(Vec3::new(0.0, -9.9, 0.0));
        voxels.add_point(Vec3::new(0.5, -9.0, 0.0));

        let grid = projector(0).project_grid(&voxels).unwrap();
        assert_eq!(grid.get(UVec2::new(6, 1)), Some(OccupancyCode::Free));
        assert_eq!(grid.get(UVec2::new(1, 1)), Some(OccupancyCode::Obstacle));
    }

    #[test]
    fn test_last_voxel_in_cell_wins() {
        let voxels = [
            Voxel::from_parts(Vec3::new(0.0, 1.0, 0.0), Vec3::splat(50.0), 9),
            Voxel::from_parts(Vec3::new(0.02, -1.0, 0.0), Vec3::splat(50.0), 1),
        ];
        let extents = Extents::from_point(Vec3::ZERO);

        let grid = projector(5).project(voxels.iter(), extents, Some(0.0)).unwrap();
        assert_eq!(grid.get(UVec2::new(1, 1)), Some(OccupancyCode::Free));

        let grid = projector(5).project(voxels.iter().rev(), extents, Some(0.0)).unwrap();
        assert_eq!(grid.get(UVec2::new(1, 1)), Some(OccupancyCode::Obstacle));
    }

    #[test]
    fn test_filter_applied() {
        let mut voxels = VoxelGrid::new(10.0);
        voxels.update_ground_height(0.0);
        voxels.add_point(Vec3::new(0.0, 0.0, 0.0));
        voxels.add_point(Vec3::new(1.0, 0.0, 1.0));
        for _ in 0..3 {
            voxels.add_point(Vec3::new(0.5, 1.0, 0.5));
        }

        let mut settings = ProjectionSettings {
            resolution: 10.0,
            noise_threshold: 2,
            ..Default::default()
        };
        let grid = OccupancyProjector::new(settings).project_grid(&voxels).unwrap();
        assert_eq!(grid.count(OccupancyCode::Obstacle), 1);

        settings.filter = GridFilter::ClusterRemoval { max_size: 1 };
        let grid = OccupancyProjector::new(settings).project_grid(&voxels).unwrap();
        assert_eq!(grid.count(OccupancyCode::Obstacle), 0);
        assert_eq!(grid.get(UVec2::new(6, 6)), Some(OccupancyCode::Unknown));
    }

    #[test]
    fn test_oversized_grid_not_allocated() {
        let mut voxels = VoxelGrid::new(50.0);
        voxels.add_points([Vec3::ZERO, Vec3::new(2000.0, 0.0, 2000.0)]);

        let projector = OccupancyProjector::new(ProjectionSettings::default());
        assert_eq!(
            projector.project_grid(&voxels),
            Err(ProjectionError::GridTooLarge {
                requested: 100_010 * 100_010,
                limit: DEFAULT_MAX_CELLS
            })
        );

        let projector = OccupancyProjector::new(ProjectionSettings {
            resolution: 10.0,
            max_cells: 15 * 15,
            ..Default::default()
        });
        voxels.reset();
        voxels.add_points([Vec3::ZERO, Vec3::new(0.5, 0.0, 0.5)]);
        assert!(projector.project_grid(&voxels).is_ok());
        voxels.add_point(Vec3::new(0.6, 0.0, 0.0));
        assert!(projector.project_grid(&voxels).is_err());
    }
}
