//! This module defines the `Path` result of a grid search and its world space form.
use bevy::math::{UVec2, Vec3};
use bevy::prelude::Component;
use std::collections::VecDeque;

/// Ordered grid cells from start to goal, with the total step cost.
///
/// This is returned by [`crate::astar::AStarPlanner::find_path`].
#[derive(Debug, Clone)]
pub struct Path {
    pub(crate) path: VecDeque<UVec2>,
    cost: f32,
}

impl Path {
    /// Create a new path from a vector of `UVec2` cells
    /// # Arguments
    /// * `path` - A vector of `UVec2` cells, start first
    /// * `cost` - The total movement cost of the path
    ///
    pub fn new(path: Vec<UVec2>, cost: f32) -> Self {
        Path {
            path: path.into_iter().collect(),
            cost,
        }
    }

    /// Returns true if the path contains the given cell
    pub fn is_position_in_path(&self, pos: UVec2) -> bool {
        self.path.contains(&pos)
    }

    /// Returns the path as a slice of cells.
    ///
    /// ```rust
    /// use bevy::math::UVec2;
    /// use bevy_voxelnav::prelude::*;
    ///
    /// let path = Path::new(vec![UVec2::new(1, 2), UVec2::new(1, 3)], 1.0);
    /// assert_eq!(path.path(), &[UVec2::new(1, 2), UVec2::new(1, 3)]);
    /// ```
    pub fn path(&self) -> &[UVec2] {
        self.path.as_slices().0
    }

    /// Returns the movement cost of the path
    pub fn cost(&self) -> f32 {
        self.cost
    }

    /// Returns the number of cells in the path
    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Number of moves, one less than the number of cells.
    pub fn steps(&self) -> usize {
        self.path.len().saturating_sub(1)
    }

    pub fn start(&self) -> Option<UVec2> {
        self.path.front().copied()
    }

    pub fn goal(&self) -> Option<UVec2> {
        self.path.back().copied()
    }

    /// Pops the first cell of the path.
    pub fn pop(&mut self) -> Option<UVec2> {
        self.path.pop_front()
    }

    /// Returns the next cell in the path without removing it.
    pub fn next(&self) -> Option<UVec2> {
        self.path.front().copied()
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl IntoIterator for Path {
    type Item = UVec2;
    type IntoIter = std::collections::vec_deque::IntoIter<UVec2>;

    fn into_iter(self) -> Self::IntoIter {
        self.path.into_iter()
    }
}

/// A path converted into world space waypoints, as delivered to path consumers.
///
/// If using [`crate::plugin::VoxelNavPlugin`] this is inserted as a component on the
/// requesting entity once its query completes.
#[derive(Debug, Clone, Component)]
pub struct NavPath {
    /// Waypoints from start to end.
    pub waypoints: Vec<Vec3>,
    /// The grid path the waypoints were made from.
    pub cells: Path,
}

impl NavPath {
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Sum of straight line distances between consecutive waypoints.
    pub fn length(&self) -> f32 {
        self.waypoints
            .windows(2)
            .map(|pair| pair[0].distance(pair[1]))
            .sum()
    }
}
