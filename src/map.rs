//! [`VoxelMap`] owns a voxel set on a worker thread and serves it through messages.
//!
//! Every mutation and every full scan runs on the worker, one message at a time. A path
//! query projects the grid on the worker, then searches on the rayon pool while holding the
//! query slot. Mutations and further path queries that arrive while the slot is held wait in
//! a queue and are applied in arrival order once the search reports back. Reads are answered
//! right away and see the state the running query was planned on.
//!
//! Handlers passed to the asynchronous calls run on the rayon pool, never on the caller's
//! thread.
use bevy::{log, math::Vec3};
use crossbeam_channel::{self as channel, select, Receiver, Sender};
use std::collections::VecDeque;
use std::thread;

use crate::{
    astar::{AStarPlanner, PlannerSettings, SearchLimits},
    error::{InvalidInput, MapError, PathError, ProjectionError},
    occupancy::OccupancyGrid,
    path::NavPath,
    projector::{OccupancyProjector, FALLBACK_GROUND_HEIGHT},
    settings::{NavSettings, FALLBACK_WAYPOINT_GROUND},
    snapshot,
    voxel::{RenderVoxel, Voxel},
    voxel_grid::{Extents, VoxelGrid},
};

type Handler<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// A found path together with the grid it was planned on, path cells marked.
pub type PathOverlay = (NavPath, OccupancyGrid);

enum PathReply {
    Waypoints(Handler<Result<NavPath, PathError>>),
    Overlay(Handler<Result<PathOverlay, PathError>>),
}

impl PathReply {
    fn send(self, result: Result<PathOverlay, PathError>) {
        match self {
            PathReply::Waypoints(handler) => handler(result.map(|(path, _)| path)),
            PathReply::Overlay(handler) => handler(result.map(|(path, mut grid)| {
                grid.mark_path(&path.cells);
                (path, grid)
            })),
        }
    }
}

struct PathQuery {
    start: Vec3,
    end: Vec3,
    limits: SearchLimits,
    reply: PathReply,
}

enum Command {
    AddPoints(Vec<Vec3>),
    GroundHeight(f32),
    Load(Vec<Voxel>),
    Reset,
    Extents(Sender<Option<Extents>>),
    Snapshot(Sender<Vec<u8>>),
    ProjectGrid(Handler<Result<OccupancyGrid, ProjectionError>>),
    Points(Handler<Vec<Vec3>>),
    Render {
        redraw_all: bool,
        handler: Handler<Vec<RenderVoxel>>,
    },
    FindPath(PathQuery),
}

impl Command {
    /// Commands that have to wait until the running path query is done.
    fn waits_for_query(&self) -> bool {
        matches!(
            self,
            Command::AddPoints(_)
                | Command::GroundHeight(_)
                | Command::Load(_)
                | Command::Reset
                | Command::FindPath(_)
        )
    }
}

/// Handle to a voxel map running on its own worker thread.
///
/// Cloning the handle is cheap; the worker stops once every handle is dropped.
///
/// ```no_run
/// use bevy::math::Vec3;
/// use bevy_voxelnav::prelude::*;
///
/// let map = VoxelMap::new(NavSettings::default()).unwrap();
/// map.add_points([Vec3::ZERO, Vec3::new(0.5, 0.0, 0.5)]).unwrap();
/// map.update_ground_height(0.0).unwrap();
///
/// map.find_path(Vec3::ZERO, Vec3::new(0.5, 0.0, 0.5), SearchLimits::none(), |result| {
///     match result {
///         Ok(path) => println!("{} waypoints", path.len()),
///         Err(err) => println!("no path: {err}"),
///     }
/// })
/// .unwrap();
/// ```
#[derive(Clone)]
pub struct VoxelMap {
    commands: Sender<Command>,
    settings: NavSettings,
}

impl VoxelMap {
    /// Starts the worker thread.
    pub fn new(settings: NavSettings) -> Result<Self, MapError> {
        let (commands, inbox) = channel::unbounded();
        let (release, released) = channel::unbounded();
        let worker = MapWorker::new(settings, release);

        thread::Builder::new()
            .name("voxel-map".to_string())
            .spawn(move || worker.run(inbox, released))
            .map_err(|err| MapError::Spawn(err.to_string()))?;

        Ok(VoxelMap { commands, settings })
    }

    pub fn settings(&self) -> &NavSettings {
        &self.settings
    }

    pub fn add_point(&self, point: Vec3) -> Result<(), MapError> {
        self.send(Command::AddPoints(vec![point]))
    }

    /// Adds a batch of points as one message.
    pub fn add_points<I: IntoIterator<Item = Vec3>>(&self, points: I) -> Result<(), MapError> {
        self.send(Command::AddPoints(points.into_iter().collect()))
    }

    /// Folds a ground height sample into the running minimum.
    pub fn update_ground_height(&self, sample: f32) -> Result<(), MapError> {
        self.send(Command::GroundHeight(sample))
    }

    /// Drops every voxel and the ground height.
    pub fn reset(&self) -> Result<(), MapError> {
        self.send(Command::Reset)
    }

    /// Decodes a snapshot and merges its voxels into the map. Returns the number of records.
    ///
    /// Nothing is merged if any record fails to decode.
    pub fn load_snapshot(&self, bytes: &[u8]) -> Result<usize, MapError> {
        let voxels = snapshot::decode(bytes)?;
        let count = voxels.len();
        self.send(Command::Load(voxels))?;
        Ok(count)
    }

    /// Encodes the current voxels. Blocks until the worker answers.
    pub fn snapshot(&self) -> Result<Vec<u8>, MapError> {
        self.request(Command::Snapshot)
    }

    /// Scans the current voxels for their bounds. Blocks until the worker answers.
    pub fn snapshot_extents(&self) -> Result<Option<Extents>, MapError> {
        self.request(Command::Extents)
    }

    /// Projects a fresh occupancy grid.
    pub fn project_grid<F>(&self, handler: F) -> Result<(), MapError>
    where
        F: FnOnce(Result<OccupancyGrid, ProjectionError>) + Send + 'static,
    {
        self.send(Command::ProjectGrid(Box::new(handler)))
    }

    /// Position of every voxel.
    pub fn points<F>(&self, handler: F) -> Result<(), MapError>
    where
        F: FnOnce(Vec<Vec3>) + Send + 'static,
    {
        self.send(Command::Points(Box::new(handler)))
    }

    /// Voxels dense enough to draw. Unless `redraw_all` is set only voxels not delivered by
    /// an earlier call are included.
    pub fn render_voxels<F>(&self, redraw_all: bool, handler: F) -> Result<(), MapError>
    where
        F: FnOnce(Vec<RenderVoxel>) + Send + 'static,
    {
        self.send(Command::Render {
            redraw_all,
            handler: Box::new(handler),
        })
    }

    /// Plans a path between two world positions on a freshly projected grid.
    pub fn find_path<F>(&self, start: Vec3, end: Vec3, limits: SearchLimits, handler: F) -> Result<(), MapError>
    where
        F: FnOnce(Result<NavPath, PathError>) + Send + 'static,
    {
        self.send(Command::FindPath(PathQuery {
            start,
            end,
            limits,
            reply: PathReply::Waypoints(Box::new(handler)),
        }))
    }

    /// Like [`VoxelMap::find_path`], also handing back the grid with the path cells marked.
    pub fn find_path_overlay<F>(&self, start: Vec3, end: Vec3, limits: SearchLimits, handler: F) -> Result<(), MapError>
    where
        F: FnOnce(Result<PathOverlay, PathError>) + Send + 'static,
    {
        self.send(Command::FindPath(PathQuery {
            start,
            end,
            limits,
            reply: PathReply::Overlay(Box::new(handler)),
        }))
    }

    fn request<T>(&self, command: impl FnOnce(Sender<T>) -> Command) -> Result<T, MapError> {
        let (reply, response) = channel::bounded(1);
        self.send(command(reply))?;
        response.recv().map_err(|_| MapError::Disconnected)
    }

    fn send(&self, command: Command) -> Result<(), MapError> {
        self.commands.send(command).map_err(|_| MapError::Disconnected)
    }
}

/// Frees the query slot when dropped.
struct QueryToken(Sender<()>);

impl Drop for QueryToken {
    fn drop(&mut self) {
        // The worker is gone if this fails, nothing is waiting on the slot.
        let _ = self.0.send(());
    }
}

struct MapWorker {
    voxels: VoxelGrid,
    settings: NavSettings,
    projector: OccupancyProjector,
    query_in_flight: bool,
    deferred: VecDeque<Command>,
    release: Sender<()>,
}

impl MapWorker {
    fn new(settings: NavSettings, release: Sender<()>) -> Self {
        MapWorker {
            voxels: VoxelGrid::new(settings.resolution()),
            settings,
            projector: OccupancyProjector::new(settings.projection),
            query_in_flight: false,
            deferred: VecDeque::new(),
            release,
        }
    }

    fn run(mut self, inbox: Receiver<Command>, released: Receiver<()>) {
        loop {
            select! {
                recv(inbox) -> command => match command {
                    Ok(command) => self.handle(command),
                    Err(_) => break,
                },
                recv(released) -> _ => self.release(),
            }
        }

        for command in self.deferred.drain(..) {
            if let Command::FindPath(query) = command {
                query.reply.send(Err(PathError::Disconnected));
            }
        }

        log::debug!("Voxel map worker stopped");
    }

    fn handle(&mut self, command: Command) {
        if self.query_in_flight && command.waits_for_query() {
            self.deferred.push_back(command);
            log::trace!("Deferred command, {} waiting", self.deferred.len());
            return;
        }

        match command {
            Command::AddPoints(points) => self.voxels.add_points(points),
            Command::GroundHeight(sample) => self.voxels.update_ground_height(sample),
            Command::Load(voxels) => {
                let before = self.voxels.len();
                self.voxels.load(voxels);
                log::debug!("Loaded snapshot, {} new voxels", self.voxels.len() - before);
            }
            Command::Reset => self.voxels.reset(),
            Command::Extents(reply) => reply_to(reply, self.voxels.extents()),
            Command::Snapshot(reply) => reply_to(reply, snapshot::encode(self.voxels.voxels())),
            Command::ProjectGrid(handler) => {
                let grid = self.projector.project_grid(&self.voxels);
                rayon::spawn(move || handler(grid));
            }
            Command::Points(handler) => {
                let points = self.voxels.points();
                rayon::spawn(move || handler(points));
            }
            Command::Render {
                redraw_all,
                handler,
            } => {
                let projection = &self.settings.projection;
                let ground_level = self.voxels.ground_height().unwrap_or(FALLBACK_GROUND_HEIGHT)
                    + projection.ground_offset;
                let batch =
                    self.voxels
                        .render_batch(redraw_all, projection.noise_threshold, ground_level);
                rayon::spawn(move || handler(batch));
            }
            Command::FindPath(query) => self.start_query(query),
        }
    }

    fn start_query(&mut self, query: PathQuery) {
        let grid = match self.projector.project_grid(&self.voxels) {
            Ok(grid) => grid,
            Err(err) => {
                log::debug!("No grid to plan on: {}", err);
                rayon::spawn(move || query.reply.send(Err(err.into())));
                return;
            }
        };

        let waypoint_y = self.voxels.ground_height().unwrap_or(FALLBACK_WAYPOINT_GROUND)
            + self.settings.waypoint_height;
        let planner = self.settings.planner;
        let mut limits = query.limits;
        if limits.max_expansions.is_none() {
            limits.max_expansions = self.settings.max_expansions;
        }

        let token = QueryToken(self.release.clone());
        self.query_in_flight = true;

        let (start, end, reply) = (query.start, query.end, query.reply);
        rayon::spawn(move || {
            let _token = token;
            let result = plan(grid, start, end, planner, &limits, waypoint_y);
            reply.send(result);
        });
    }

    fn release(&mut self) {
        self.query_in_flight = false;

        while !self.query_in_flight {
            let Some(command) = self.deferred.pop_front() else {
                break;
            };
            self.handle(command);
        }
    }
}

fn plan(
    grid: OccupancyGrid,
    start: Vec3,
    end: Vec3,
    settings: PlannerSettings,
    limits: &SearchLimits,
    waypoint_y: f32,
) -> Result<PathOverlay, PathError> {
    let end_cell = grid.world_to_cell(end).ok_or(InvalidInput::EndNotFinite)?;
    let start_cell = grid.world_to_cell(start).ok_or(InvalidInput::StartNotFinite)?;

    let cells = timed!("Path search", {
        AStarPlanner::new(grid.view(), start_cell, settings).find_path(end_cell, limits)
    })?;

    let waypoints = cells
        .path
        .iter()
        .map(|&cell| grid.cell_to_world(cell, waypoint_y))
        .collect();

    Ok((NavPath { waypoints, cells }, grid))
}

fn reply_to<T>(reply: Sender<T>, value: T) {
    if reply.send(value).is_err() {
        log::error!("Voxel map caller stopped waiting for its reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        astar::CancelToken,
        error::DecodeError,
        occupancy::OccupancyCode,
        settings::NavSettingsBuilder,
    };
    use bevy::math::IVec2;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn settings() -> NavSettings {
        NavSettingsBuilder::new()
            .resolution(10.0)
            .noise_threshold(2)
            .build()
            .unwrap()
    }

    /// Handler that forwards its argument to the returned receiver.
    fn collect<T: Send + 'static>() -> (impl FnOnce(T) + Send + 'static, Receiver<T>) {
        let (tx, rx) = channel::bounded(1);
        (
            move |value| {
                let _ = tx.send(value);
            },
            rx,
        )
    }

    /// A 5x5 floor from (0, 0) to (0.4, 0.4) at ground height 0.
    fn floor() -> Vec<Vec3> {
        let mut points = Vec::new();
        for x in 0..5 {
            for z in 0..5 {
                points.push(Vec3::new(x as f32 * 0.1, 0.0, z as f32 * 0.1));
            }
        }
        points
    }

    fn floor_map() -> VoxelMap {
        let map = VoxelMap::new(settings()).unwrap();
        map.add_points(floor()).unwrap();
        map.update_ground_height(0.0).unwrap();
        map
    }

    #[test]
    fn test_extents_after_points() {
        let map = floor_map();
        let extents = map.snapshot_extents().unwrap().unwrap();
        assert_eq!(extents.x_min, 0.0);
        assert!((extents.x_max - 0.4).abs() < 1e-6);
        assert!((extents.z_max - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_find_path_waypoints() {
        let map = floor_map();
        let (handler, result) = collect::<Result<NavPath, PathError>>();
        map.find_path(Vec3::ZERO, Vec3::new(0.4, 0.0, 0.4), SearchLimits::none(), handler)
            .unwrap();

        let path = result.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(path.len(), 5);
        assert!((path.cells.cost() - 5.6).abs() < 1e-4);

        let first = path.waypoints[0];
        let last = path.waypoints[4];
        assert!((first - Vec3::new(0.0, 0.4, 0.0)).length() < 1e-4);
        assert!((last - Vec3::new(0.4, 0.4, 0.4)).length() < 1e-4);
    }

    #[test]
    fn test_find_path_end_on_obstacle() {
        let map = floor_map();
        for _ in 0..3 {
            map.add_point(Vec3::new(0.2, 1.0, 0.2)).unwrap();
        }

        let (handler, result) = collect::<Result<NavPath, PathError>>();
        map.find_path(Vec3::ZERO, Vec3::new(0.2, 0.0, 0.2), SearchLimits::none(), handler)
            .unwrap();

        assert_eq!(
            result.recv_timeout(TIMEOUT).unwrap().unwrap_err(),
            PathError::InvalidInput(InvalidInput::EndBlocked(IVec2::new(3, 3)))
        );
    }

    #[test]
    fn test_find_path_start_out_of_bounds() {
        let map = floor_map();
        let (handler, result) = collect::<Result<NavPath, PathError>>();
        map.find_path(Vec3::new(50.0, 0.0, 0.0), Vec3::ZERO, SearchLimits::none(), handler)
            .unwrap();

        let err = result.recv_timeout(TIMEOUT).unwrap().unwrap_err();
        assert!(matches!(
            err,
            PathError::InvalidInput(InvalidInput::StartOutOfBounds(_))
        ));
    }

    fn find_path_error(map: &VoxelMap, start: Vec3, end: Vec3) -> PathError {
        let (handler, result) = collect::<Result<NavPath, PathError>>();
        map.find_path(start, end, SearchLimits::none(), handler).unwrap();
        result.recv_timeout(TIMEOUT).unwrap().unwrap_err()
    }

    #[test]
    fn test_find_path_far_positions_rejected() {
        let map = floor_map();

        for far in [-1.0e9, 1.0e9] {
            assert!(matches!(
                find_path_error(&map, Vec3::new(far, 0.0, 0.0), Vec3::ZERO),
                PathError::InvalidInput(InvalidInput::StartOutOfBounds(_))
            ));
            assert!(matches!(
                find_path_error(&map, Vec3::ZERO, Vec3::new(0.0, 0.0, far)),
                PathError::InvalidInput(InvalidInput::EndOutOfBounds(_))
            ));
        }

        // The map keeps serving after the rejected requests.
        let (handler, result) = collect::<Result<NavPath, PathError>>();
        map.find_path(Vec3::ZERO, Vec3::new(0.4, 0.0, 0.0), SearchLimits::none(), handler)
            .unwrap();
        assert_eq!(result.recv_timeout(TIMEOUT).unwrap().unwrap().len(), 5);
    }

    #[test]
    fn test_find_path_non_finite_positions_rejected() {
        let map = floor_map();
        let nan = Vec3::new(f32::NAN, 0.0, f32::NAN);

        assert_eq!(
            find_path_error(&map, nan, Vec3::ZERO),
            PathError::InvalidInput(InvalidInput::StartNotFinite)
        );
        assert_eq!(
            find_path_error(&map, Vec3::ZERO, Vec3::new(0.1, 0.0, f32::INFINITY)),
            PathError::InvalidInput(InvalidInput::EndNotFinite)
        );
        assert_eq!(
            find_path_error(&map, nan, nan),
            PathError::InvalidInput(InvalidInput::EndNotFinite)
        );
    }

    #[test]
    fn test_find_path_on_oversized_map() {
        let map = VoxelMap::new(NavSettings::default()).unwrap();
        map.add_points([Vec3::ZERO, Vec3::new(2000.0, 0.0, 2000.0)])
            .unwrap();

        assert!(matches!(
            find_path_error(&map, Vec3::ZERO, Vec3::ONE),
            PathError::GridTooLarge { .. }
        ));

        let (handler, grid) = collect::<Result<OccupancyGrid, ProjectionError>>();
        map.project_grid(handler).unwrap();
        assert!(matches!(
            grid.recv_timeout(TIMEOUT).unwrap(),
            Err(ProjectionError::GridTooLarge { .. })
        ));
    }

    #[test]
    fn test_find_path_on_empty_map() {
        let map = VoxelMap::new(settings()).unwrap();
        let (handler, result) = collect::<Result<NavPath, PathError>>();
        map.find_path(Vec3::ZERO, Vec3::ONE, SearchLimits::none(), handler)
            .unwrap();
        assert_eq!(
            result.recv_timeout(TIMEOUT).unwrap().unwrap_err(),
            PathError::EmptyMap
        );
    }

    #[test]
    fn test_find_path_cancelled() {
        let map = floor_map();
        let token = CancelToken::new();
        token.cancel();

        let (handler, result) = collect::<Result<NavPath, PathError>>();
        map.find_path(
            Vec3::ZERO,
            Vec3::new(0.4, 0.0, 0.4),
            SearchLimits::none().with_cancel(token),
            handler,
        )
        .unwrap();
        assert_eq!(
            result.recv_timeout(TIMEOUT).unwrap().unwrap_err(),
            PathError::Cancelled
        );
    }

    #[test]
    fn test_path_overlay_marks_cells() {
        let map = floor_map();
        let (handler, result) = collect::<Result<PathOverlay, PathError>>();
        map.find_path_overlay(Vec3::ZERO, Vec3::new(0.4, 0.0, 0.0), SearchLimits::none(), handler)
            .unwrap();

        let (path, grid) = result.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(grid.count(OccupancyCode::PathMarked), path.len());
        for &cell in path.cells.path() {
            assert_eq!(grid.get(cell), Some(OccupancyCode::PathMarked));
        }
    }

    #[test]
    fn test_points_and_render() {
        let map = floor_map();
        for _ in 0..2 {
            map.add_point(Vec3::new(0.1, 1.0, 0.1)).unwrap();
        }

        let (handler, points) = collect::<Vec<Vec3>>();
        map.points(handler).unwrap();
        assert_eq!(points.recv_timeout(TIMEOUT).unwrap().len(), 26);

        let (handler, batch) = collect::<Vec<RenderVoxel>>();
        map.render_voxels(false, handler).unwrap();
        let batch = batch.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(!batch[0].ground);

        let (handler, batch) = collect::<Vec<RenderVoxel>>();
        map.render_voxels(false, handler).unwrap();
        assert!(batch.recv_timeout(TIMEOUT).unwrap().is_empty());
    }

    #[test]
    fn test_project_grid() {
        let map = floor_map();
        let (handler, grid) = collect::<Result<OccupancyGrid, ProjectionError>>();
        map.project_grid(handler).unwrap();

        let grid = grid.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(grid.rows(), 14);
        assert_eq!(grid.count(OccupancyCode::Free), 25);
    }

    #[test]
    fn test_snapshot_into_new_map() {
        let map = floor_map();
        let bytes = map.snapshot().unwrap();
        assert_eq!(bytes.len(), 25 * snapshot::RECORD_SIZE);

        let copy = VoxelMap::new(settings()).unwrap();
        assert_eq!(copy.load_snapshot(&bytes).unwrap(), 25);
        assert_eq!(copy.snapshot_extents().unwrap(), map.snapshot_extents().unwrap());

        assert_eq!(
            copy.load_snapshot(&bytes[..40]),
            Err(MapError::Decode(DecodeError::Truncated {
                len: 40,
                record_size: snapshot::RECORD_SIZE
            }))
        );
    }

    #[test]
    fn test_reset() {
        let map = floor_map();
        map.reset().unwrap();
        assert_eq!(map.snapshot_extents().unwrap(), None);
    }

    #[test]
    fn test_mutations_wait_for_running_query() {
        let (release, released) = channel::unbounded();
        let mut worker = MapWorker::new(settings(), release);
        worker.handle(Command::AddPoints(floor()));
        worker.handle(Command::GroundHeight(0.0));

        let (handler, result) = collect::<Result<NavPath, PathError>>();
        worker.handle(Command::FindPath(PathQuery {
            start: Vec3::ZERO,
            end: Vec3::new(0.4, 0.0, 0.4),
            limits: SearchLimits::none(),
            reply: PathReply::Waypoints(Box::new(handler)),
        }));
        assert!(worker.query_in_flight);

        worker.handle(Command::AddPoints(vec![Vec3::new(2.0, 0.0, 2.0)]));
        let (handler, second) = collect::<Result<NavPath, PathError>>();
        worker.handle(Command::FindPath(PathQuery {
            start: Vec3::ZERO,
            end: Vec3::new(2.0, 0.0, 2.0),
            limits: SearchLimits::none(),
            reply: PathReply::Waypoints(Box::new(handler)),
        }));

        assert_eq!(worker.voxels.len(), 25);
        assert_eq!(worker.deferred.len(), 2);

        // Reads are answered while the query runs.
        let (reply, extents) = channel::bounded(1);
        worker.handle(Command::Extents(reply));
        assert!((extents.recv().unwrap().unwrap().x_max - 0.4).abs() < 1e-6);

        assert!(result.recv_timeout(TIMEOUT).unwrap().is_ok());
        released.recv_timeout(TIMEOUT).unwrap();
        worker.release();

        // The point landed before the second query projected its grid.
        assert_eq!(worker.voxels.len(), 26);
        assert!(worker.query_in_flight);
        assert!(worker.deferred.is_empty());

        let path = second.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert!((path.waypoints.last().unwrap().x - 2.0).abs() < 1e-4);
    }
}
