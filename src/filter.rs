//! Post-processing passes over an occupancy grid.
use bevy::{log, math::UVec2};
use ndarray::{s, ArrayViewMut2};

use crate::{
    flood_fill::flood_fill_code,
    occupancy::{OccupancyCode, OccupancyGrid},
};

/// Which cleanup pass to run on a freshly projected grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GridFilter {
    /// Leave the grid as projected.
    #[default]
    None,
    /// Remove obstacle slivers smaller than `kernel` (rows x cols) while keeping solid regions.
    Morphological { kernel: UVec2 },
    /// Turn 8-connected obstacle groups of at most `max_size` cells back into `Unknown`.
    ClusterRemoval { max_size: usize },
}

impl GridFilter {
    pub fn apply(&self, grid: &mut OccupancyGrid) {
        match *self {
            GridFilter::None => {}
            GridFilter::Morphological { kernel } => {
                roast(grid.view_mut(), kernel);
            }
            GridFilter::ClusterRemoval { max_size } => {
                let removed = remove_isolated_clusters(grid.view_mut(), max_size);
                log::debug!("Removed {} obstacle clusters of size <= {}", removed, max_size);
            }
        }
    }
}

/// Two pass sliding window cleanup.
///
/// The first pass clears obstacle cells in every window of the input that is not entirely
/// obstacle. The second pass marks every window that still holds an obstacle in the
/// first pass output as obstacle. Thin obstacle edges disappear while solid regions keep
/// (and regrow to) their kernel sized footprint.
///
/// Does nothing if the grid is smaller than the kernel.
pub fn roast(mut cells: ArrayViewMut2<OccupancyCode>, kernel: UVec2) {
    let (kernel_rows, kernel_cols) = (kernel.x as usize, kernel.y as usize);
    let (rows, cols) = cells.dim();

    if kernel_rows == 0 || kernel_cols == 0 || rows < kernel_rows || cols < kernel_cols {
        return;
    }

    let input = cells.to_owned();
    for r in 0..=rows - kernel_rows {
        for c in 0..=cols - kernel_cols {
            let window = input.slice(s![r..r + kernel_rows, c..c + kernel_cols]);
            if window.iter().all(|cell| cell.is_obstacle()) {
                continue;
            }

            cells
                .slice_mut(s![r..r + kernel_rows, c..c + kernel_cols])
                .map_inplace(|cell| {
                    if cell.is_obstacle() {
                        *cell = OccupancyCode::Free;
                    }
                });
        }
    }

    let eroded = cells.to_owned();
    for r in 0..=rows - kernel_rows {
        for c in 0..=cols - kernel_cols {
            let window = eroded.slice(s![r..r + kernel_rows, c..c + kernel_cols]);
            if window.iter().any(|cell| cell.is_obstacle()) {
                cells
                    .slice_mut(s![r..r + kernel_rows, c..c + kernel_cols])
                    .fill(OccupancyCode::Obstacle);
            }
        }
    }
}

/// Reclassifies small 8-connected obstacle groups as `Unknown`, never `Free`.
/// Returns how many groups were removed.
pub fn remove_isolated_clusters(mut cells: ArrayViewMut2<OccupancyCode>, max_size: usize) -> usize {
    let groups = flood_fill_code(cells.view(), OccupancyCode::Obstacle);
    let mut removed = 0;

    for group in groups.iter().filter(|group| group.len() <= max_size) {
        for &(r, c) in group {
            cells[(r, c)] = OccupancyCode::Unknown;
        }
        removed += 1;
    }

    removed
}
