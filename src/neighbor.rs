//! Movement models for the grid search: which cells are adjacent and how far the goal
//! is estimated to be.
use bevy::math::{IVec2, UVec2};
use smallvec::SmallVec;
use std::fmt::Debug;

/// Step cost of an orthogonal move.
pub const ORTHOGONAL_STEP_COST: f32 = 1.0;
/// Extra cost of a diagonal move. A fixed approximation of `sqrt(2) - 1`.
pub const DIAGONAL_STEP_EXTRA: f32 = 0.4;

/// Scales Euclidean distance so it never exceeds the cost of a 1.4 diagonal step.
const DIAGONAL_HEURISTIC_SCALE: f32 =
    (ORTHOGONAL_STEP_COST + DIAGONAL_STEP_EXTRA) / std::f32::consts::SQRT_2;

pub const CARDINAL_2D_OFFSETS: [IVec2; 4] = [
    IVec2::new(-1, 0),
    IVec2::new(1, 0),
    IVec2::new(0, -1),
    IVec2::new(0, 1),
];

pub const ORDINAL_2D_OFFSETS: [IVec2; 8] = [
    IVec2::new(-1, -1),
    IVec2::new(-1, 0),
    IVec2::new(-1, 1),
    IVec2::new(0, -1),
    IVec2::new(0, 1),
    IVec2::new(1, -1),
    IVec2::new(1, 0),
    IVec2::new(1, 1),
];

/// A neighbouring cell and whether reaching it is a diagonal move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub cell: UVec2,
    pub diagonal: bool,
}

pub trait Neighborhood: Clone + Debug + Default + Sync + Send {
    fn directions(&self) -> &'static [IVec2];

    /// Pushes every in-bounds neighbour of `pos` on a `rows` x `cols` grid into `target`.
    /// The centre cell is never included.
    fn neighbors(&self, rows: usize, cols: usize, pos: UVec2, target: &mut SmallVec<[Neighbor; 8]>) {
        let origin = pos.as_ivec2();

        for offset in self.directions() {
            let next = origin + *offset;
            if next.x < 0 || next.y < 0 || next.x as usize >= rows || next.y as usize >= cols {
                continue;
            }

            target.push(Neighbor {
                cell: next.as_uvec2(),
                diagonal: offset.x != 0 && offset.y != 0,
            });
        }
    }

    /// Lower bound on the cost from `pos` to `target`.
    fn heuristic(&self, pos: UVec2, target: UVec2) -> f32;

    fn is_ordinal(&self) -> bool {
        false
    }
}

/// 4-connected movement with a Manhattan heuristic.
#[derive(Clone, Copy, Debug, Default)]
pub struct CardinalNeighborhood;

impl Neighborhood for CardinalNeighborhood {
    #[inline(always)]
    fn directions(&self) -> &'static [IVec2] {
        &CARDINAL_2D_OFFSETS
    }

    #[inline(always)]
    fn heuristic(&self, pos: UVec2, target: UVec2) -> f32 {
        let d = (pos.as_ivec2() - target.as_ivec2()).abs();
        (d.x + d.y) as f32 * ORTHOGONAL_STEP_COST
    }
}

/// 8-connected movement with a Euclidean heuristic.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrdinalNeighborhood;

impl Neighborhood for OrdinalNeighborhood {
    #[inline(always)]
    fn directions(&self) -> &'static [IVec2] {
        &ORDINAL_2D_OFFSETS
    }

    #[inline(always)]
    fn heuristic(&self, pos: UVec2, target: UVec2) -> f32 {
        pos.as_vec2().distance(target.as_vec2()) * DIAGONAL_HEURISTIC_SCALE
    }

    fn is_ordinal(&self) -> bool {
        true
    }
}
