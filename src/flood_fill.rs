use ndarray::{Array2, ArrayView2};

use crate::occupancy::OccupancyCode;

/// Groups cells matching `code` into 8-connected components.
pub(crate) fn flood_fill_code(
    grid: ArrayView2<OccupancyCode>,
    code: OccupancyCode,
) -> Vec<Vec<(usize, usize)>> {
    let (rows, cols) = grid.dim();
    let mut visited = Array2::from_elem(grid.raw_dim(), false);
    let mut groups = Vec::new();

    for ((x, y), &cell) in grid.indexed_iter() {
        if visited[(x, y)] || cell != code {
            continue;
        }

        let mut group = Vec::new();
        let mut stack = vec![(x, y)];

        while let Some((cx, cy)) = stack.pop() {
            if visited[(cx, cy)] || grid[(cx, cy)] != code {
                continue;
            }

            visited[(cx, cy)] = true;
            group.push((cx, cy));

            for dx in -1..=1 {
                for dy in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }

                    let nx = cx as isize + dx;
                    let ny = cy as isize + dy;

                    if nx >= 0 && ny >= 0 && (nx as usize) < rows && (ny as usize) < cols {
                        stack.push((nx as usize, ny as usize));
                    }
                }
            }
        }

        groups.push(group);
    }

    groups
}
