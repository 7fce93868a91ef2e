//! A* search over an [`OccupancyGrid`](crate::occupancy::OccupancyGrid).
use bevy::{
    log,
    math::{IVec2, UVec2},
};
use ndarray::ArrayView2;
use slab::Slab;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crate::{
    error::{InvalidInput, PathError},
    heap::Heap,
    neighbor::{
        CardinalNeighborhood, Neighbor, Neighborhood, OrdinalNeighborhood, CARDINAL_2D_OFFSETS,
        DIAGONAL_STEP_EXTRA, ORTHOGONAL_STEP_COST,
    },
    occupancy::OccupancyCode,
    path::Path,
    FxHashMap, FxHashSet, NodeId,
};

/// Added on top of the raw terrain value when entering an `Unknown` cell.
pub const RISKY_CELL_PENALTY: f32 = 3.0;

// Deadline checks read the clock, so only do it every this many expansions.
const DEADLINE_CHECK_INTERVAL: usize = 64;

/// Settings for [`AStarPlanner`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannerSettings {
    /// Allow 8-connected movement. Otherwise 4-connected.
    pub diagonal: bool,
    /// Radius in cells within which nearby blocked cells make a step more expensive.
    pub obstacle_buffer: u32,
    /// Penalty per cell of closeness to the nearest blocked cell inside the buffer.
    pub buffer_weight: f32,
    /// Terrain cost used for blocked cells. `None` makes blocked cells impassable.
    pub blocked_cost: Option<f32>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        PlannerSettings {
            diagonal: true,
            obstacle_buffer: 0,
            buffer_weight: 1.0,
            blocked_cost: None,
        }
    }
}

/// Shared flag used to stop a running search from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Optional bounds on a single search, checked between node expansions.
#[derive(Clone, Debug, Default)]
pub struct SearchLimits {
    pub cancel: Option<CancelToken>,
    pub deadline: Option<Instant>,
    pub max_expansions: Option<usize>,
}

impl SearchLimits {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_max_expansions(mut self, max: usize) -> Self {
        self.max_expansions = Some(max);
        self
    }

    fn check(&self, expansions: usize) -> Result<(), PathError> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(PathError::Cancelled);
        }

        if self.max_expansions.is_some_and(|max| expansions >= max) {
            return Err(PathError::TimedOut);
        }

        if expansions % DEADLINE_CHECK_INTERVAL == 0
            && self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Err(PathError::TimedOut);
        }

        Ok(())
    }
}

/// Lifecycle of an [`AStarPlanner`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlannerState {
    Initialized,
    Searching,
    Found,
    Exhausted,
    InvalidInput,
    /// Stopped by a [`SearchLimits`] bound before finishing.
    Interrupted,
}

/// A search node. Parents are arena handles, so the tree is dropped with the arena.
#[derive(Clone, Copy, Debug)]
struct PathNode {
    cell: UVec2,
    g: f32,
    h: f32,
    parent: Option<NodeId>,
}

#[derive(Clone, Copy, Debug)]
struct OpenEntry {
    f: f32,
    g: f32,
    node: NodeId,
}

impl OpenEntry {
    // Lowest f first; on ties prefer the deeper node.
    fn is_ordered(a: &OpenEntry, b: &OpenEntry) -> bool {
        a.f < b.f || (a.f == b.f && a.g > b.g)
    }
}

/// Step costs of a grid: terrain, risky cell penalty, diagonal extra and obstacle buffer.
pub(crate) struct CostModel<'a> {
    grid: ArrayView2<'a, OccupancyCode>,
    settings: PlannerSettings,
    // Buffer penalty per cell. The grid never changes during a search.
    penalties: FxHashMap<UVec2, f32>,
    visited: FxHashSet<UVec2>,
    frontier: VecDeque<(UVec2, u32)>,
}

impl<'a> CostModel<'a> {
    pub(crate) fn new(grid: ArrayView2<'a, OccupancyCode>, settings: PlannerSettings) -> Self {
        CostModel {
            grid,
            settings,
            penalties: FxHashMap::default(),
            visited: FxHashSet::default(),
            frontier: VecDeque::new(),
        }
    }

    #[inline]
    fn code(&self, cell: UVec2) -> Option<OccupancyCode> {
        self.grid.get((cell.x as usize, cell.y as usize)).copied()
    }

    /// Cost of stepping onto `to`, or `None` if it cannot be entered.
    pub(crate) fn step_cost(&mut self, to: Neighbor) -> Option<f32> {
        let code = self.code(to.cell)?;

        let terrain = if code.is_blocked() {
            self.settings.blocked_cost?
        } else {
            code.value() as f32
        };

        let mut cost = ORTHOGONAL_STEP_COST + terrain;
        if code == OccupancyCode::Unknown {
            cost += RISKY_CELL_PENALTY;
        }
        if to.diagonal {
            cost += DIAGONAL_STEP_EXTRA;
        }

        Some(cost + self.buffer_penalty(to.cell))
    }

    fn buffer_penalty(&mut self, cell: UVec2) -> f32 {
        let radius = self.settings.obstacle_buffer;
        if radius == 0 {
            return 0.0;
        }

        if let Some(&penalty) = self.penalties.get(&cell) {
            return penalty;
        }

        let penalty = match self.nearest_blocked(cell) {
            Some(distance) => self.settings.buffer_weight * (radius - distance + 1) as f32,
            None => 0.0,
        };

        self.penalties.insert(cell, penalty);
        penalty
    }

    /// Breadth first probe over cardinal moves, at most `obstacle_buffer` steps out.
    /// Returns the step distance of the closest blocked cell, excluding `origin`.
    fn nearest_blocked(&mut self, origin: UVec2) -> Option<u32> {
        let radius = self.settings.obstacle_buffer;
        let rows = self.grid.nrows() as i32;
        let cols = self.grid.ncols() as i32;

        self.visited.clear();
        self.frontier.clear();
        self.visited.insert(origin);
        self.frontier.push_back((origin, 0));

        while let Some((cell, distance)) = self.frontier.pop_front() {
            if distance >= radius {
                continue;
            }

            for offset in CARDINAL_2D_OFFSETS {
                let next = cell.as_ivec2() + offset;
                if next.x < 0 || next.y < 0 || next.x >= rows || next.y >= cols {
                    continue;
                }

                let next = next.as_uvec2();
                if !self.visited.insert(next) {
                    continue;
                }

                if self.code(next).is_some_and(OccupancyCode::is_blocked) {
                    return Some(distance + 1);
                }

                self.frontier.push_back((next, distance + 1));
            }
        }

        None
    }
}

/// A* planner over a borrowed occupancy grid, from a fixed start cell.
///
/// An invalid start is recorded at construction and reported by [`AStarPlanner::find_path`].
pub struct AStarPlanner<'a> {
    grid: ArrayView2<'a, OccupancyCode>,
    start: IVec2,
    settings: PlannerSettings,
    state: PlannerState,
    start_error: Option<InvalidInput>,
    expansions: usize,
}

impl<'a> AStarPlanner<'a> {
    /// # Arguments
    /// * `grid` - The occupancy codes to search, indexed `[row, col]`.
    /// * `start` - The start cell. May lie outside the grid.
    /// * `settings` - Movement and cost settings.
    pub fn new(grid: ArrayView2<'a, OccupancyCode>, start: IVec2, settings: PlannerSettings) -> Self {
        let start_error = match cell_code(&grid, start) {
            None => Some(InvalidInput::StartOutOfBounds(start)),
            Some(code) if code.is_blocked() && settings.blocked_cost.is_none() => {
                Some(InvalidInput::StartBlocked(start))
            }
            Some(_) => None,
        };

        if let Some(err) = start_error {
            log::warn!("Planner start rejected: {}", err);
        }

        AStarPlanner {
            grid,
            start,
            settings,
            state: PlannerState::Initialized,
            start_error,
            expansions: 0,
        }
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn start(&self) -> IVec2 {
        self.start
    }

    /// Nodes expanded by the last call to [`AStarPlanner::find_path`].
    pub fn expansions(&self) -> usize {
        self.expansions
    }

    /// Searches for the cheapest path from the start cell to `end`.
    ///
    /// # Returns
    /// * `Ok(Path)` - Cells ordered start to end, with the summed step cost.
    /// * `Err(PathError::InvalidInput)` - Start or end is out of bounds or blocked.
    /// * `Err(PathError::Exhausted)` - Every reachable cell was expanded without reaching `end`.
    /// * `Err(PathError::Cancelled | PathError::TimedOut)` - A [`SearchLimits`] bound was hit.
    pub fn find_path(&mut self, end: IVec2, limits: &SearchLimits) -> Result<Path, PathError> {
        self.expansions = 0;

        if let Err(err) = self.validate(end) {
            log::warn!("Path request rejected: {}", err);
            self.state = PlannerState::InvalidInput;
            return Err(err.into());
        }

        self.state = PlannerState::Searching;

        let start = self.start.as_uvec2();
        let goal = end.as_uvec2();

        let result = if self.settings.diagonal {
            self.search(&OrdinalNeighborhood, start, goal, limits)
        } else {
            self.search(&CardinalNeighborhood, start, goal, limits)
        };

        self.state = match &result {
            Ok(_) => PlannerState::Found,
            Err(PathError::Exhausted) => PlannerState::Exhausted,
            Err(_) => PlannerState::Interrupted,
        };

        log::debug!(
            "A* {:?} -> {:?}: {:?} after {} expansions",
            start,
            goal,
            self.state,
            self.expansions
        );

        result
    }

    fn validate(&self, end: IVec2) -> Result<(), InvalidInput> {
        match cell_code(&self.grid, end) {
            None => return Err(InvalidInput::EndOutOfBounds(end)),
            Some(code) if code.is_blocked() && self.settings.blocked_cost.is_none() => {
                return Err(InvalidInput::EndBlocked(end));
            }
            Some(_) => {}
        }

        match self.start_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn search<N: Neighborhood>(
        &mut self,
        neighborhood: &N,
        start: UVec2,
        goal: UVec2,
        limits: &SearchLimits,
    ) -> Result<Path, PathError> {
        let rows = self.grid.nrows();
        let cols = self.grid.ncols();
        let size_hint = (rows * cols / 4).max(16);

        let mut costs = CostModel::new(self.grid, self.settings);
        let mut nodes: Slab<PathNode> = Slab::with_capacity(size_hint);
        let mut open = Heap::with_capacity(size_hint, OpenEntry::is_ordered);
        let mut open_ids: FxHashMap<UVec2, NodeId> = FxHashMap::default();
        let mut closed: FxHashSet<UVec2> = FxHashSet::default();
        let mut neighbors: SmallVec<[Neighbor; 8]> = SmallVec::new();

        let h = neighborhood.heuristic(start, goal);
        let root = nodes.insert(PathNode {
            cell: start,
            g: 0.0,
            h,
            parent: None,
        });
        open.insert(OpenEntry { f: h, g: 0.0, node: root });
        open_ids.insert(start, root);

        while let Some(entry) = open.pop() {
            let current = nodes[entry.node];

            // Superseded by a cheaper route to the same cell.
            if entry.g > current.g {
                continue;
            }

            if current.cell == goal {
                return Ok(reconstruct(&nodes, entry.node));
            }

            limits.check(self.expansions)?;

            open_ids.remove(&current.cell);
            closed.insert(current.cell);
            self.expansions += 1;

            log::trace!("Expanding {:?} g={} h={}", current.cell, current.g, current.h);

            neighbors.clear();
            neighborhood.neighbors(rows, cols, current.cell, &mut neighbors);

            for &neighbor in neighbors.iter() {
                if closed.contains(&neighbor.cell) {
                    continue;
                }

                let Some(step) = costs.step_cost(neighbor) else {
                    continue;
                };
                let g = current.g + step;

                match open_ids.get(&neighbor.cell) {
                    Some(&id) => {
                        let node = &mut nodes[id];
                        if g < node.g {
                            node.g = g;
                            node.parent = Some(entry.node);
                            open.insert(OpenEntry {
                                f: g + node.h,
                                g,
                                node: id,
                            });
                        }
                    }
                    None => {
                        let h = neighborhood.heuristic(neighbor.cell, goal);
                        let id = nodes.insert(PathNode {
                            cell: neighbor.cell,
                            g,
                            h,
                            parent: Some(entry.node),
                        });
                        open_ids.insert(neighbor.cell, id);
                        open.insert(OpenEntry { f: g + h, g, node: id });
                    }
                }
            }
        }

        Err(PathError::Exhausted)
    }
}

fn cell_code(grid: &ArrayView2<OccupancyCode>, cell: IVec2) -> Option<OccupancyCode> {
    if cell.x < 0 || cell.y < 0 {
        return None;
    }
    grid.get((cell.x as usize, cell.y as usize)).copied()
}

fn reconstruct(nodes: &Slab<PathNode>, goal: NodeId) -> Path {
    let cost = nodes[goal].g;
    let mut steps = vec![];
    let mut current = Some(goal);

    while let Some(id) = current {
        let node = &nodes[id];
        steps.push(node.cell);
        current = node.parent;
    }

    steps.reverse();
    Path::new(steps, cost)
}
