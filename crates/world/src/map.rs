//! Map generation and spawn placement.
//!
//! The map is derived from the game seed: scattered destructible obstacles
//! on the ground layer plus one bunker (a basement room reached by a stair
//! region). Generation inserts the statics into the registry and physics
//! world and then precomputes the visibility grid over them.

use crate::content::{ContentTables, ObstacleShape};
use crate::dirty::DirtySets;
use crate::entity::{Entity, EntityCore, EntityKind, ObstacleState};
use crate::registry::Registry;
use crate::visibility::VisibilityGrid;
use anyhow::{Context, Result};
use glam::Vec2;
use rand::Rng;
use redzone_core::{
    clamp_to_world, scoped_rng, EntityFlags, EntityId, Layer, Orientation, BASE_ZOOM_LEVELS,
    PLAYER_RADIUS, SPAWN_ATTEMPTS, WORLD_SIZE, ZOOM_LEVELS_15X, ZOOM_LEVELS_8X,
};
use redzone_physics::{Body, BodyKind, PhysicsWorld, Shape};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Obstacle counts for the default map.
const TREE_COUNT: u32 = 220;
const ROCK_COUNT: u32 = 90;
const CRATE_COUNT: u32 = 60;

/// RNG domain separators.
const RNG_DOMAIN_MAP: u64 = 0x6d61_7067_656e;
const RNG_DOMAIN_SPAWN: u64 = 0x7370_6177_6e73;

/// A rectangle where players transition between ground and basement.
///
/// Standing inside puts the player on the stair variant of their layer;
/// crossing out through the `down` edge lands in the basement, any other
/// edge lands on the ground.
#[derive(Debug, Clone)]
pub struct StairRegion {
    /// Footprint of the stairwell.
    pub min: Vec2,
    /// Footprint of the stairwell.
    pub max: Vec2,
    /// Edge leading down, as the direction from the rect center.
    pub down_direction: Orientation,
}

impl StairRegion {
    fn contains(&self, pos: Vec2) -> bool {
        pos.x >= self.min.x && pos.x <= self.max.x && pos.y >= self.min.y && pos.y <= self.max.y
    }

    /// Layer a body at `pos` should be on, given the layer it had last tick.
    pub fn resolve_layer(&self, pos: Vec2, current: Layer) -> Layer {
        if self.contains(pos) {
            return current.to_stairs();
        }
        if !current.on_stairs() {
            return current;
        }
        // Leaving the stairwell: the exit side decides the destination.
        let center = (self.min + self.max) * 0.5;
        let delta = pos - center;
        let exited_down = match self.down_direction {
            Orientation::East => delta.x > 0.0,
            Orientation::West => delta.x < 0.0,
            Orientation::North => delta.y > 0.0,
            Orientation::South => delta.y < 0.0,
        };
        if exited_down {
            Layer::Basement
        } else {
            Layer::Ground
        }
    }
}

/// The generated static world.
#[derive(Debug)]
pub struct GameMap {
    /// Stairwells linking ground and basement.
    pub stairs: Vec<StairRegion>,
    /// Precomputed static visibility.
    pub visibility: VisibilityGrid,
    /// Seed the map was generated from.
    pub seed: u64,
}

impl GameMap {
    /// Generate the static world for `seed`, inserting obstacles into the
    /// registry and physics world.
    pub fn generate(
        seed: u64,
        content: &ContentTables,
        registry: &mut Registry,
        physics: &mut PhysicsWorld,
        dirty: &mut DirtySets,
    ) -> Result<Self> {
        let mut rng = scoped_rng(seed, RNG_DOMAIN_MAP);
        let mut stairs = Vec::new();

        // Bunker first so scattered obstacles avoid its footprint.
        place_bunker(content, registry, physics, dirty, &mut rng, &mut stairs)?;

        for (type_id, count) in [(1u16, TREE_COUNT), (2, ROCK_COUNT), (3, CRATE_COUNT)] {
            for _ in 0..count {
                let def = content
                    .obstacles
                    .get(&type_id)
                    .with_context(|| format!("obstacle {type_id} missing from content tables"))?;
                let shape = obstacle_shape(def.shape);
                let pos = scatter_position(&mut rng, physics, &shape);
                let Some(pos) = pos else {
                    // Dense seed: skip this one rather than fail generation.
                    continue;
                };
                spawn_obstacle(
                    registry,
                    physics,
                    dirty,
                    type_id,
                    def.health,
                    shape,
                    pos,
                    Layer::Ground,
                    def.alters_visibility,
                );
            }
        }

        let zooms = zoom_table();
        let visibility = VisibilityGrid::build(
            &zooms,
            registry
                .static_ids()
                .filter_map(|id| {
                    let e = registry.get(id)?;
                    Some((id, e.static_bounds()?))
                })
                .collect::<Vec<_>>(),
        );

        info!(
            seed,
            statics = registry.static_ids().count(),
            stairs = stairs.len(),
            "map generated"
        );
        Ok(Self {
            stairs,
            visibility,
            seed,
        })
    }

    /// Rebuild the visibility grid after a sight-altering obstacle died.
    pub fn rebuild_visibility(&mut self, registry: &Registry) {
        let zooms = zoom_table();
        self.visibility = VisibilityGrid::build(
            &zooms,
            registry
                .static_ids()
                .filter_map(|id| {
                    let e = registry.get(id)?;
                    if e.core.dead {
                        return None;
                    }
                    Some((id, e.static_bounds()?))
                })
                .collect::<Vec<_>>(),
        );
    }

    /// Layer a player at `pos` belongs on, given their previous layer.
    pub fn resolve_layer(&self, pos: Vec2, current: Layer) -> Layer {
        for stair in &self.stairs {
            let resolved = stair.resolve_layer(pos, current);
            if resolved != current {
                return resolved;
            }
            if stair.contains(pos) {
                return resolved;
            }
        }
        // Not near any stairwell: stair variants collapse back.
        if current.on_stairs() {
            current.to_ground()
        } else {
            current
        }
    }

    /// Pick a collision-free spawn position. Placement is best effort:
    /// after the attempt budget the last candidate is used even if it
    /// overlaps, and physics resolves the overlap on the next step.
    pub fn random_spawn_position(&self, attempt_seed: u64, physics: &PhysicsWorld) -> Vec2 {
        let mut rng = scoped_rng(self.seed, RNG_DOMAIN_SPAWN ^ attempt_seed);
        let margin = 16.0;
        let mut candidate = Vec2::splat(WORLD_SIZE / 2.0);
        for _ in 0..SPAWN_ATTEMPTS {
            candidate = Vec2::new(
                rng.gen_range(margin..WORLD_SIZE - margin),
                rng.gen_range(margin..WORLD_SIZE - margin),
            );
            let blocked = physics.probe_circle(candidate, PLAYER_RADIUS, Layer::Ground, |b| {
                b.kind == BodyKind::Static
            });
            if !blocked {
                return candidate;
            }
        }
        warn!(
            x = candidate.x,
            y = candidate.y,
            "no free spawn found in budget, using last candidate"
        );
        candidate
    }
}

fn zoom_table() -> Vec<u32> {
    let mut zooms: BTreeSet<u32> = BASE_ZOOM_LEVELS.into_iter().collect();
    zooms.extend(ZOOM_LEVELS_8X);
    zooms.extend(ZOOM_LEVELS_15X);
    zooms.into_iter().collect()
}

fn obstacle_shape(shape: ObstacleShape) -> Shape {
    match shape {
        ObstacleShape::Circle { radius } => Shape::Circle { radius },
        ObstacleShape::Rect { half_x, half_y } => Shape::Rect {
            half: Vec2::new(half_x, half_y),
        },
    }
}

/// Find a position where `shape` fits without touching existing statics.
fn scatter_position(rng: &mut impl Rng, physics: &PhysicsWorld, shape: &Shape) -> Option<Vec2> {
    let margin = 8.0;
    let clearance = match *shape {
        Shape::Circle { radius } => radius,
        Shape::Rect { half } => half.length(),
    } + 1.0;
    for _ in 0..SPAWN_ATTEMPTS {
        let pos = Vec2::new(
            rng.gen_range(margin..WORLD_SIZE - margin),
            rng.gen_range(margin..WORLD_SIZE - margin),
        );
        if !physics.probe_circle(pos, clearance, Layer::Ground, |b| b.kind == BodyKind::Static) {
            return Some(pos);
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn spawn_obstacle(
    registry: &mut Registry,
    physics: &mut PhysicsWorld,
    dirty: &mut DirtySets,
    type_id: u16,
    health: Option<f32>,
    shape: Shape,
    position: Vec2,
    layer: Layer,
    alters_visibility: bool,
) -> EntityId {
    let id = registry.allocate_id();
    let body = physics.create_body(Body {
        entity: id,
        kind: BodyKind::Static,
        layer,
        shape,
        position,
        velocity: Vec2::ZERO,
        damping: 1.0,
    });
    registry.insert(
        Entity {
            core: EntityCore {
                id,
                flags: EntityFlags::OBSTACLE,
                layer,
                position,
                orientation: Orientation::East,
                scale: 1.0,
                dead: false,
                body: Some(body),
            },
            kind: EntityKind::Obstacle(ObstacleState {
                type_id,
                health,
                max_health: health.unwrap_or(1.0),
                shape,
                alters_visibility,
            }),
        },
        dirty,
    );
    id
}

/// Build the bunker: a ceiling obstacle on the ground layer, walls in the
/// basement, and the stair region linking the two.
fn place_bunker(
    content: &ContentTables,
    registry: &mut Registry,
    physics: &mut PhysicsWorld,
    dirty: &mut DirtySets,
    rng: &mut impl Rng,
    stairs: &mut Vec<StairRegion>,
) -> Result<()> {
    let center = clamp_to_world(Vec2::new(
        rng.gen_range(200.0..WORLD_SIZE - 200.0),
        rng.gen_range(200.0..WORLD_SIZE - 200.0),
    ));

    let ceiling = content
        .obstacles
        .get(&5)
        .context("bunker ceiling missing from content tables")?;
    spawn_obstacle(
        registry,
        physics,
        dirty,
        5,
        ceiling.health,
        obstacle_shape(ceiling.shape),
        center,
        Layer::Ground,
        ceiling.alters_visibility,
    );

    let wall = content
        .obstacles
        .get(&4)
        .context("bunker wall missing from content tables")?;
    let wall_shape = obstacle_shape(wall.shape);
    for offset in [
        Vec2::new(0.0, 8.0),
        Vec2::new(0.0, -8.0),
        Vec2::new(8.0, 0.0),
        Vec2::new(-8.0, 0.0),
    ] {
        // Side walls rotate 90 degrees: swap the half extents.
        let shape = if offset.x != 0.0 {
            match wall_shape {
                Shape::Rect { half } => Shape::Rect {
                    half: Vec2::new(half.y, half.x),
                },
                other => other,
            }
        } else {
            wall_shape
        };
        spawn_obstacle(
            registry,
            physics,
            dirty,
            4,
            wall.health,
            shape,
            center + offset,
            Layer::Basement,
            wall.alters_visibility,
        );
    }

    stairs.push(StairRegion {
        min: center + Vec2::new(9.0, -2.0),
        max: center + Vec2::new(13.0, 2.0),
        down_direction: Orientation::West,
    });
    Ok(())
}
