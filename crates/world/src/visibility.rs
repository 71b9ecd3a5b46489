//! Precomputed static visibility.
//!
//! The world is covered by a coarse grid of cells. For every supported zoom
//! radius, each cell stores the ids of static entities whose bounds
//! intersect the culling rectangle centered on that cell. At runtime a
//! lookup rounds the observer's position to the nearest cell and returns
//! the stored set, so per-tick visibility never scans the statics.
//!
//! The culling shape is a rectangle, not a circle: half extents are
//! `zoom * 1.5` horizontally and `zoom * 1.25` vertically, matching the
//! client viewport aspect.

use glam::Vec2;
use redzone_core::{EntityId, CULL_FACTOR_X, CULL_FACTOR_Y, VISIBILITY_CELL_STRIDE, WORLD_SIZE};
use redzone_physics::Aabb;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Per-zoom, per-cell sets of visible static entity ids.
#[derive(Debug, Default)]
pub struct VisibilityGrid {
    cells_per_axis: usize,
    /// zoom radius -> row-major cell sets.
    grids: BTreeMap<u32, Vec<BTreeSet<EntityId>>>,
}

/// Culling rectangle for an observer at `center` with the given zoom radius.
pub fn cull_rect(center: Vec2, zoom: u32) -> Aabb {
    let half = Vec2::new(zoom as f32 * CULL_FACTOR_X, zoom as f32 * CULL_FACTOR_Y);
    Aabb::new(center - half, center + half)
}

impl VisibilityGrid {
    /// Precompute the grid for every zoom in `zoom_levels` over the given
    /// static entities.
    pub fn build<'a, I>(zoom_levels: &[u32], statics: I) -> Self
    where
        I: IntoIterator<Item = (EntityId, Aabb)>,
        I::IntoIter: Clone,
    {
        let cells_per_axis = (WORLD_SIZE / VISIBILITY_CELL_STRIDE) as usize + 1;
        let statics = statics.into_iter();
        let mut grids = BTreeMap::new();

        for &zoom in zoom_levels {
            let mut cells = vec![BTreeSet::new(); cells_per_axis * cells_per_axis];
            for cy in 0..cells_per_axis {
                for cx in 0..cells_per_axis {
                    let center = Vec2::new(
                        cx as f32 * VISIBILITY_CELL_STRIDE,
                        cy as f32 * VISIBILITY_CELL_STRIDE,
                    );
                    let rect = cull_rect(center, zoom);
                    let cell = &mut cells[cy * cells_per_axis + cx];
                    for (id, bounds) in statics.clone() {
                        if rect.intersects(&bounds) {
                            cell.insert(id);
                        }
                    }
                }
            }
            grids.insert(zoom, cells);
        }

        debug!(
            zooms = zoom_levels.len(),
            cells_per_axis, "visibility grid built"
        );
        Self {
            cells_per_axis,
            grids,
        }
    }

    /// Static ids visible from `position` at `zoom`. Positions snap to the
    /// nearest cell center. Unknown zooms fall back to the largest
    /// precomputed radius so nothing visible is ever omitted.
    pub fn visible_statics(&self, zoom: u32, position: Vec2) -> Option<&BTreeSet<EntityId>> {
        let grid = match self.grids.get(&zoom) {
            Some(grid) => grid,
            None => self.grids.values().next_back()?,
        };
        let clamp = |v: f32| -> usize {
            let cell = (v / VISIBILITY_CELL_STRIDE).round();
            (cell.max(0.0) as usize).min(self.cells_per_axis - 1)
        };
        Some(&grid[clamp(position.y) * self.cells_per_axis + clamp(position.x)])
    }

    /// Zoom radii this grid was built for.
    pub fn zoom_levels(&self) -> impl Iterator<Item = u32> + '_ {
        self.grids.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(id: u32, center: Vec2, half: f32) -> (EntityId, Aabb) {
        (
            EntityId(id),
            Aabb::new(center - Vec2::splat(half), center + Vec2::splat(half)),
        )
    }

    #[test]
    fn nearby_statics_are_visible_and_distant_ones_are_not() {
        let statics = vec![
            square(1, Vec2::new(100.0, 100.0), 2.0),
            square(2, Vec2::new(500.0, 500.0), 2.0),
        ];
        let grid = VisibilityGrid::build(&[28], statics);
        let seen = grid
            .visible_statics(28, Vec2::new(100.0, 100.0))
            .expect("zoom 28 precomputed");
        assert!(seen.contains(&EntityId(1)));
        assert!(!seen.contains(&EntityId(2)));
    }

    #[test]
    fn cull_rect_is_wider_than_tall() {
        let rect = cull_rect(Vec2::ZERO, 28);
        let extent = rect.max - rect.min;
        assert!(extent.x > extent.y);
        assert_eq!(extent.x, 2.0 * 28.0 * 1.5);
        assert_eq!(extent.y, 2.0 * 28.0 * 1.25);
    }

    #[test]
    fn edge_of_rect_vertical_asymmetry_matters() {
        // 38 units away: inside the horizontal reach of zoom 28 (42) but
        // outside the vertical reach (35).
        let east = square(1, Vec2::new(138.0, 100.0), 0.5);
        let north = square(2, Vec2::new(100.0, 138.0), 0.5);
        let grid = VisibilityGrid::build(&[28], vec![east, north]);
        let seen = grid.visible_statics(28, Vec2::new(100.0, 100.0)).unwrap();
        assert!(seen.contains(&EntityId(1)));
        assert!(!seen.contains(&EntityId(2)));
    }

    #[test]
    fn positions_snap_to_the_nearest_cell() {
        let statics = vec![square(1, Vec2::new(100.0, 100.0), 2.0)];
        let grid = VisibilityGrid::build(&[28], statics);
        let a = grid.visible_statics(28, Vec2::new(101.0, 99.0)).unwrap();
        let b = grid.visible_statics(28, Vec2::new(100.0, 100.0)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn grid_lookup_matches_a_direct_rect_scan() {
        let statics: Vec<_> = (0..40)
            .map(|i| {
                square(
                    i,
                    Vec2::new((i as f32 * 37.0) % 900.0, (i as f32 * 53.0) % 900.0),
                    1.5,
                )
            })
            .collect();
        let grid = VisibilityGrid::build(&[28], statics.clone());
        // Cell-aligned observer so the lookup and the scan share a center.
        for center in [Vec2::new(200.0, 200.0), Vec2::new(600.0, 400.0)] {
            let rect = cull_rect(center, 28);
            let scanned: BTreeSet<EntityId> = statics
                .iter()
                .filter(|(_, bounds)| rect.intersects(bounds))
                .map(|(id, _)| *id)
                .collect();
            let looked_up = grid.visible_statics(28, center).unwrap();
            assert_eq!(*looked_up, scanned);
        }
    }

    #[test]
    fn out_of_world_positions_clamp_into_the_grid() {
        let statics = vec![square(1, Vec2::new(5.0, 5.0), 2.0)];
        let grid = VisibilityGrid::build(&[28], statics);
        let seen = grid
            .visible_statics(28, Vec2::new(-50.0, -50.0))
            .expect("clamped lookup");
        assert!(seen.contains(&EntityId(1)));
    }
}
