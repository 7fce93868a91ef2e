//! The 2D traversability grid built from the voxel set.
use bevy::math::{IVec2, UVec2, Vec3};
use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use strum::{Display, EnumIter, FromRepr};

use crate::{error::ProjectionError, path::Path, voxel_grid::Extents};

/// Cells added past the projected extents on each axis.
pub const GRID_MARGIN: usize = 10;

/// Default cap on the number of cells in a projected grid, 4096 x 4096.
pub const DEFAULT_MAX_CELLS: usize = 1 << 24;

/// Traversability code of a grid cell.
///
/// The discriminant doubles as the cell's raw terrain cost in the planner.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum OccupancyCode {
    /// Ground level evidence.
    Free = 0,
    /// Repeatedly observed above the ground.
    Obstacle = 1,
    /// No trusted evidence.
    #[default]
    Unknown = 2,
    /// A free cell on a planned path.
    PathMarked = 3,
    /// An obstacle cell on a planned path.
    BlockedPathMarked = 4,
}

impl OccupancyCode {
    /// Raw code value.
    #[inline]
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Blocked cells are never entered unless a substitute cost is configured.
    #[inline]
    pub fn is_blocked(self) -> bool {
        matches!(self, OccupancyCode::Obstacle | OccupancyCode::BlockedPathMarked)
    }

    #[inline]
    pub fn is_obstacle(self) -> bool {
        self == OccupancyCode::Obstacle
    }

    /// The code a cell takes when a path passes through it.
    pub fn marked(self) -> Self {
        if self.is_blocked() {
            OccupancyCode::BlockedPathMarked
        } else {
            OccupancyCode::PathMarked
        }
    }
}

/// Row/column grid of [`OccupancyCode`]s with the world frame it was projected in.
///
/// Rows run along -X from `x_max`, columns along -Z from `z_max`, both offset by one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyGrid {
    cells: Array2<OccupancyCode>,
    extents: Extents,
    resolution: f32,
}

impl OccupancyGrid {
    /// Creates an all-`Unknown` grid sized to cover `extents` at `resolution` cells per metre.
    ///
    /// Fails without allocating if the grid would hold more than `max_cells` cells.
    pub fn new(
        extents: Extents,
        resolution: f32,
        max_cells: usize,
    ) -> Result<Self, ProjectionError> {
        let (rows, cols) = Self::shape(extents, resolution, max_cells)?;

        Ok(OccupancyGrid {
            cells: Array2::from_elem((rows, cols), OccupancyCode::Unknown),
            extents,
            resolution,
        })
    }

    /// Rows and columns needed to cover `extents`, checked against `max_cells`.
    pub fn shape(
        extents: Extents,
        resolution: f32,
        max_cells: usize,
    ) -> Result<(usize, usize), ProjectionError> {
        let side = |span: f32| {
            (f64::from(span) * f64::from(resolution)).round() + GRID_MARGIN as f64
        };
        let (rows, cols) = (side(extents.width()), side(extents.length()));
        let requested = rows * cols;

        // Written negated so NaN sizes are rejected too.
        if !(requested <= max_cells as f64) {
            return Err(ProjectionError::GridTooLarge {
                requested: requested as u64,
                limit: max_cells,
            });
        }

        Ok((rows as usize, cols as usize))
    }

    /// Wraps existing cells. World conversions use the given frame.
    pub fn from_cells(cells: Array2<OccupancyCode>, extents: Extents, resolution: f32) -> Self {
        OccupancyGrid {
            cells,
            extents,
            resolution,
        }
    }

    /// Builds a grid from raw code rows, mostly useful in tests and tools.
    /// Unrecognised codes become `Unknown`; short rows are padded with `Unknown`.
    pub fn from_rows(rows: &[Vec<u8>]) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let cells = Array2::from_shape_fn((rows.len(), width), |(r, c)| {
            rows[r]
                .get(c)
                .and_then(|&code| OccupancyCode::from_repr(code))
                .unwrap_or_default()
        });

        let extents = Extents {
            x_min: 0.0,
            x_max: 0.0,
            z_min: 0.0,
            z_max: 0.0,
        };

        OccupancyGrid::from_cells(cells, extents, 1.0)
    }

    pub fn rows(&self) -> usize {
        self.cells.nrows()
    }

    pub fn cols(&self) -> usize {
        self.cells.ncols()
    }

    pub fn extents(&self) -> Extents {
        self.extents
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    pub fn view(&self) -> ArrayView2<'_, OccupancyCode> {
        self.cells.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut2<'_, OccupancyCode> {
        self.cells.view_mut()
    }

    pub fn cells(&self) -> &Array2<OccupancyCode> {
        &self.cells
    }

    pub fn in_bounds(&self, cell: IVec2) -> bool {
        cell.x >= 0
            && cell.y >= 0
            && (cell.x as usize) < self.rows()
            && (cell.y as usize) < self.cols()
    }

    pub fn get(&self, cell: UVec2) -> Option<OccupancyCode> {
        self.cells.get((cell.x as usize, cell.y as usize)).copied()
    }

    /// Sets a cell, returning false if it lies outside the grid.
    pub fn set(&mut self, cell: UVec2, code: OccupancyCode) -> bool {
        match self.cells.get_mut((cell.x as usize, cell.y as usize)) {
            Some(slot) => {
                *slot = code;
                true
            }
            None => false,
        }
    }

    /// Grid cell for a world position, possibly out of bounds.
    ///
    /// Returns `None` for a non-finite position. Positions too far away for an `i32` cell
    /// clamp to a cell that is still out of bounds.
    pub fn world_to_cell(&self, point: Vec3) -> Option<IVec2> {
        let row = axis_cell(self.extents.x_max, point.x, self.resolution)?;
        let col = axis_cell(self.extents.z_max, point.z, self.resolution)?;
        Some(IVec2::new(row, col))
    }

    /// World position of a cell, placed at height `y`.
    pub fn cell_to_world(&self, cell: UVec2, y: f32) -> Vec3 {
        let x = self.extents.x_max - (cell.x as f32 - 1.0) / self.resolution;
        let z = self.extents.z_max - (cell.y as f32 - 1.0) / self.resolution;
        Vec3::new(x, y, z)
    }

    /// Marks each cell on `path` as part of the path, keeping blocked cells distinguishable.
    pub fn mark_path(&mut self, path: &Path) {
        for &cell in path.path() {
            if let Some(code) = self.get(cell) {
                self.set(cell, code.marked());
            }
        }
    }

    /// Number of cells holding `code`.
    pub fn count(&self, code: OccupancyCode) -> usize {
        self.cells.iter().filter(|&&c| c == code).count()
    }

    /// Raw code rows, for visualisation consumers.
    pub fn to_rows(&self) -> Vec<Vec<u8>> {
        self.cells
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|c| c.value()).collect())
            .collect()
    }
}

fn axis_cell(max: f32, value: f32, resolution: f32) -> Option<i32> {
    let cell = ((f64::from(max) - f64::from(value)) * f64::from(resolution)).round();
    if !cell.is_finite() {
        return None;
    }

    let cell = cell.clamp(f64::from(i32::MIN), f64::from(i32::MAX - 1));
    Some(cell as i32 + 1)
}
