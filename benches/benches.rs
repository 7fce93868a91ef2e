use bevy::math::{IVec2, UVec2, Vec3};
use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::Array2;

use bevy_voxelnav::{
    astar::{AStarPlanner, PlannerSettings, SearchLimits},
    filter::{remove_isolated_clusters, roast},
    occupancy::OccupancyCode,
    projector::{OccupancyProjector, ProjectionSettings},
    voxel_grid::VoxelGrid,
};

fn room(size: usize) -> VoxelGrid {
    let mut voxels = VoxelGrid::new(50.0);
    voxels.update_ground_height(0.0);

    let step = 1.0 / 50.0;
    for x in 0..size {
        for z in 0..size {
            let (fx, fz) = (x as f32 * step, z as f32 * step);
            voxels.add_point(Vec3::new(fx, 0.0, fz));

            // A wall every 32 cells with a gap at the far end.
            if x % 32 == 16 && z + 4 < size {
                for _ in 0..8 {
                    voxels.add_point(Vec3::new(fx, 1.0, fz));
                }
            }
        }
    }

    voxels
}

fn noisy_grid(size: usize) -> Array2<OccupancyCode> {
    Array2::from_shape_fn((size, size), |(r, c)| {
        if (r * 7 + c * 13) % 11 == 0 || (r / 8 + c / 8) % 5 == 0 {
            OccupancyCode::Obstacle
        } else {
            OccupancyCode::Free
        }
    })
}

fn benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("voxelnav");
    group.sample_size(10);

    let projector = OccupancyProjector::new(ProjectionSettings::default());

    for size in [64, 256] {
        let voxels = room(size);

        group.bench_function(format!("project_{size}x{size}"), |b| {
            b.iter(|| projector.project_grid(&voxels))
        });

        let Ok(grid) = projector.project_grid(&voxels) else {
            continue;
        };
        let start = IVec2::new(grid.rows() as i32 - 6, grid.cols() as i32 - 6);
        let end = IVec2::new(1, 1);

        group.bench_function(format!("astar_ordinal_{size}x{size}"), |b| {
            b.iter(|| {
                AStarPlanner::new(grid.view(), start, PlannerSettings::default())
                    .find_path(end, &SearchLimits::none())
            })
        });

        let buffered = PlannerSettings {
            diagonal: false,
            obstacle_buffer: 3,
            ..Default::default()
        };
        group.bench_function(format!("astar_cardinal_buffer3_{size}x{size}"), |b| {
            b.iter(|| {
                AStarPlanner::new(grid.view(), start, buffered).find_path(end, &SearchLimits::none())
            })
        });
    }

    let cells = noisy_grid(512);

    group.bench_function("roast_512x512_3x3", |b| {
        b.iter(|| {
            let mut cells = cells.clone();
            roast(cells.view_mut(), UVec2::new(3, 3));
            cells
        })
    });

    group.bench_function("cluster_removal_512x512", |b| {
        b.iter(|| {
            let mut cells = cells.clone();
            remove_isolated_clusters(cells.view_mut(), 4)
        })
    });

    group.finish();
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
