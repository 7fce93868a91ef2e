//! Bevy plugin that serves path requests from a shared [`VoxelMap`].
use bevy::{log, math::Vec3, prelude::*};
use crossbeam_channel::{self as channel, Receiver, Sender};
use std::ops::Deref;

use crate::{
    astar::SearchLimits,
    error::{MapError, PathError},
    map::VoxelMap,
    path::NavPath,
    settings::NavSettings,
};

type PathResult = (Entity, Result<NavPath, PathError>);

/// Inserts a [`VoxelNav`] resource and the systems that answer [`PathRequest`]s.
#[derive(Default)]
pub struct VoxelNavPlugin {
    pub settings: NavSettings,
}

impl VoxelNavPlugin {
    pub fn new(settings: NavSettings) -> Self {
        VoxelNavPlugin { settings }
    }
}

impl Plugin for VoxelNavPlugin {
    fn build(&self, app: &mut App) {
        let nav = match VoxelNav::new(self.settings) {
            Ok(nav) => nav,
            Err(err) => {
                log::error!("VoxelNavPlugin disabled: {}", err);
                return;
            }
        };

        app.insert_resource(nav).add_systems(
            Update,
            (dispatch_path_requests, collect_path_results)
                .chain()
                .in_set(VoxelNavSet),
        );
    }
}

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoxelNavSet;

/// The voxel map shared by the app. Feed it points through the [`VoxelMap`] methods.
#[derive(Resource)]
pub struct VoxelNav {
    map: VoxelMap,
    sender: Sender<PathResult>,
    results: Receiver<PathResult>,
}

impl VoxelNav {
    pub fn new(settings: NavSettings) -> Result<Self, MapError> {
        let (sender, results) = channel::unbounded();
        Ok(VoxelNav {
            map: VoxelMap::new(settings)?,
            sender,
            results,
        })
    }

    pub fn map(&self) -> &VoxelMap {
        &self.map
    }
}

impl Deref for VoxelNav {
    type Target = VoxelMap;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

/// Asks for a path between two world positions. Changing the component sends a new query.
///
/// The entity receives a [`NavPath`] or a [`PathFailed`] once the query completes.
#[derive(Component, Clone, Debug, Default)]
pub struct PathRequest {
    pub start: Vec3,
    pub end: Vec3,
    pub limits: SearchLimits,
}

impl PathRequest {
    pub fn new(start: Vec3, end: Vec3) -> Self {
        PathRequest {
            start,
            end,
            limits: SearchLimits::none(),
        }
    }
}

/// Inserted when a [`PathRequest`] could not be answered with a path.
#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct PathFailed(pub PathError);

fn dispatch_path_requests(
    nav: Res<VoxelNav>,
    mut commands: Commands,
    query: Query<(Entity, &PathRequest), Changed<PathRequest>>,
) {
    for (entity, request) in &query {
        log::debug!("Path request for entity: {:?}", entity);

        let mut entity_commands = commands.entity(entity);
        entity_commands.remove::<(NavPath, PathFailed)>();

        let results = nav.sender.clone();
        let sent = nav.map.find_path(
            request.start,
            request.end,
            request.limits.clone(),
            move |result| {
                // The receiver lives in the resource, so this only fails during app teardown.
                let _ = results.send((entity, result));
            },
        );

        if sent.is_err() {
            entity_commands.insert(PathFailed(PathError::Disconnected));
        }
    }
}

fn collect_path_results(nav: Res<VoxelNav>, mut commands: Commands) {
    for (entity, result) in nav.results.try_iter() {
        let Ok(mut entity_commands) = commands.get_entity(entity) else {
            log::debug!("Dropping path result for despawned entity: {:?}", entity);
            continue;
        };

        match result {
            Ok(path) => {
                entity_commands.try_remove::<PathFailed>().try_insert(path);
            }
            Err(err) => {
                log::debug!("Path request for {:?} failed: {}", entity, err);
                entity_commands.try_remove::<NavPath>().try_insert(PathFailed(err));
            }
        }
    }
}
