#![warn(missing_docs)]
//! 2D rigid-body collaborator for the simulation core.
//!
//! The simulation treats this crate as a black box: create and destroy
//! bodies, step the world once per tick, query or set position/velocity, and
//! cast segments for hitscan resolution. Iteration over bodies is keyed on
//! a `BTreeMap` so results are deterministic.

use glam::Vec2;
use redzone_core::{clamp_to_world, EntityId, Layer};
use std::collections::BTreeMap;

/// Axis-aligned bounding box used for collisions and visibility bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec2,
    /// Maximum corner.
    pub max: Vec2,
}

impl Aabb {
    /// Create a new AABB ensuring min <= max per axis.
    pub fn new(min: Vec2, max: Vec2) -> Self {
        debug_assert!(min.x <= max.x && min.y <= max.y);
        Self { min, max }
    }

    /// Build from a center point and half extents.
    pub fn from_center(center: Vec2, half: Vec2) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Tests intersection with another AABB.
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    /// Whether `point` lies strictly inside the box.
    pub fn contains(&self, point: Vec2) -> bool {
        point.x > self.min.x && point.x < self.max.x && point.y > self.min.y && point.y < self.max.y
    }

    /// Closest point on or inside the box to `point`.
    pub fn clamp_point(&self, point: Vec2) -> Vec2 {
        point.clamp(self.min, self.max)
    }
}

/// Collision shape of a body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    /// Circle with the given radius.
    Circle {
        /// Radius in world units.
        radius: f32,
    },
    /// Axis-aligned rectangle given by half extents around the body position.
    Rect {
        /// Half extents in world units.
        half: Vec2,
    },
}

impl Shape {
    /// Bounding box of the shape placed at `position`.
    pub fn bounds(&self, position: Vec2) -> Aabb {
        match *self {
            Shape::Circle { radius } => Aabb::from_center(position, Vec2::splat(radius)),
            Shape::Rect { half } => Aabb::from_center(position, half),
        }
    }
}

/// Collision class of a body; determines who pushes whom apart.
///
/// Players collide with obstacles only, loot with obstacles and other loot,
/// projectiles with obstacles. Bullets never own bodies; they are resolved
/// with [`PhysicsWorld::cast_segment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Immovable world geometry.
    Static,
    /// Player avatar.
    Player,
    /// Ground pickup; spreads out against other loot.
    Loot,
    /// Thrown projectile.
    Projectile,
}

/// A rigid body registered with the world.
#[derive(Debug, Clone)]
pub struct Body {
    /// Entity this body belongs to.
    pub entity: EntityId,
    /// Collision class.
    pub kind: BodyKind,
    /// Logical layer; bodies on non-interacting layers never collide.
    pub layer: Layer,
    /// Collision shape.
    pub shape: Shape,
    /// World position (center).
    pub position: Vec2,
    /// Linear velocity in world units per second.
    pub velocity: Vec2,
    /// Fraction of velocity retained per second (1.0 = no damping).
    pub damping: f32,
}

/// Handle to a registered body. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BodyHandle(u32);

/// Result of a segment cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentHit {
    /// Entity owning the struck body.
    pub entity: EntityId,
    /// Point of impact.
    pub position: Vec2,
    /// Distance from the segment origin to the impact.
    pub distance: f32,
}

/// The collaborator world: a flat set of bodies stepped once per tick.
#[derive(Debug, Default)]
pub struct PhysicsWorld {
    bodies: BTreeMap<BodyHandle, Body>,
    next_handle: u32,
}

impl PhysicsWorld {
    /// Create an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a body and return its handle.
    pub fn create_body(&mut self, body: Body) -> BodyHandle {
        let handle = BodyHandle(self.next_handle);
        self.next_handle += 1;
        self.bodies.insert(handle, body);
        handle
    }

    /// Remove a body. Removing an already-destroyed body is a no-op, so
    /// late timers firing after entity destruction stay harmless.
    pub fn destroy_body(&mut self, handle: BodyHandle) {
        self.bodies.remove(&handle);
    }

    /// Shared access to a body.
    pub fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(&handle)
    }

    /// Position query; `None` once the body is destroyed.
    pub fn position(&self, handle: BodyHandle) -> Option<Vec2> {
        self.bodies.get(&handle).map(|b| b.position)
    }

    /// Velocity query.
    pub fn velocity(&self, handle: BodyHandle) -> Option<Vec2> {
        self.bodies.get(&handle).map(|b| b.velocity)
    }

    /// Overwrite a body's velocity.
    pub fn set_velocity(&mut self, handle: BodyHandle, velocity: Vec2) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            body.velocity = velocity;
        }
    }

    /// Add to a body's velocity (loot knock-back from explosions).
    pub fn apply_impulse(&mut self, handle: BodyHandle, delta: Vec2) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            body.velocity += delta;
        }
    }

    /// Teleport a body.
    pub fn set_position(&mut self, handle: BodyHandle, position: Vec2) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            body.position = clamp_to_world(position);
        }
    }

    /// Update a body's layer after a stair transition.
    pub fn set_layer(&mut self, handle: BodyHandle, layer: Layer) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            body.layer = layer;
        }
    }

    /// Number of live bodies.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Advance every dynamic body by `dt` seconds and resolve penetrations.
    pub fn step(&mut self, dt: f32) {
        let handles: Vec<BodyHandle> = self.bodies.keys().copied().collect();

        // Integrate.
        for &handle in &handles {
            let body = match self.bodies.get_mut(&handle) {
                Some(b) => b,
                None => continue,
            };
            if body.kind == BodyKind::Static {
                continue;
            }
            body.position = clamp_to_world(body.position + body.velocity * dt);
            if body.damping < 1.0 {
                body.velocity *= body.damping.powf(dt);
                if body.velocity.length_squared() < 1e-4 {
                    body.velocity = Vec2::ZERO;
                }
            }
        }

        // Push dynamic bodies out of statics, and loot out of loot.
        for &handle in &handles {
            let (kind, layer, shape, position) = match self.bodies.get(&handle) {
                Some(b) if b.kind != BodyKind::Static => (b.kind, b.layer, b.shape, b.position),
                _ => continue,
            };
            let mut corrected = position;
            for (&other_handle, other) in &self.bodies {
                if other_handle == handle || !collides(kind, other.kind) {
                    continue;
                }
                if !layer.same_as(other.layer) {
                    continue;
                }
                if let Some(push) = penetration(shape, corrected, other.shape, other.position) {
                    corrected += push;
                }
            }
            if corrected != position {
                if let Some(body) = self.bodies.get_mut(&handle) {
                    body.position = clamp_to_world(corrected);
                }
            }
        }
    }

    /// Whether a circle placed at `position` would overlap any body on an
    /// interacting layer accepted by `filter`. Used for spawn placement.
    pub fn probe_circle(
        &self,
        position: Vec2,
        radius: f32,
        layer: Layer,
        mut filter: impl FnMut(&Body) -> bool,
    ) -> bool {
        let shape = Shape::Circle { radius };
        self.bodies.values().any(|body| {
            layer.same_as(body.layer)
                && filter(body)
                && penetration(shape, position, body.shape, body.position).is_some()
        })
    }

    /// Every entity whose body overlaps a circle at `position`, on an
    /// interacting layer and accepted by `filter`, in entity-id order.
    pub fn overlap_circle(
        &self,
        position: Vec2,
        radius: f32,
        layer: Layer,
        mut filter: impl FnMut(&Body) -> bool,
    ) -> Vec<EntityId> {
        let shape = Shape::Circle { radius };
        let mut hits: Vec<EntityId> = self
            .bodies
            .values()
            .filter(|body| {
                layer.same_as(body.layer)
                    && filter(body)
                    && penetration(shape, position, body.shape, body.position).is_some()
            })
            .map(|body| body.entity)
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Cast a segment and return the nearest struck body.
    ///
    /// Only bodies on a layer interacting with `layer` and accepted by
    /// `filter` are considered. Equal-distance ties break toward the lower
    /// entity id so resolution is deterministic.
    pub fn cast_segment(
        &self,
        from: Vec2,
        to: Vec2,
        layer: Layer,
        mut filter: impl FnMut(&Body) -> bool,
    ) -> Option<SegmentHit> {
        let mut best: Option<SegmentHit> = None;
        for body in self.bodies.values() {
            if !layer.same_as(body.layer) || !filter(body) {
                continue;
            }
            let hit = match body.shape {
                Shape::Circle { radius } => segment_circle(from, to, body.position, radius),
                Shape::Rect { half } => {
                    segment_aabb(from, to, Aabb::from_center(body.position, half))
                }
            };
            if let Some((point, distance)) = hit {
                let better = match &best {
                    None => true,
                    Some(prev) => {
                        distance < prev.distance
                            || (distance == prev.distance && body.entity < prev.entity)
                    }
                };
                if better {
                    best = Some(SegmentHit {
                        entity: body.entity,
                        position: point,
                        distance,
                    });
                }
            }
        }
        best
    }
}

fn collides(kind: BodyKind, other: BodyKind) -> bool {
    match kind {
        BodyKind::Player => other == BodyKind::Static,
        BodyKind::Loot => matches!(other, BodyKind::Static | BodyKind::Loot),
        BodyKind::Projectile => other == BodyKind::Static,
        BodyKind::Static => false,
    }
}

/// Minimum translation pushing shape A out of shape B, if they overlap.
fn penetration(shape_a: Shape, pos_a: Vec2, shape_b: Shape, pos_b: Vec2) -> Option<Vec2> {
    match (shape_a, shape_b) {
        (Shape::Circle { radius: ra }, Shape::Circle { radius: rb }) => {
            let delta = pos_a - pos_b;
            let dist = delta.length();
            let overlap = ra + rb - dist;
            if overlap > 0.0 {
                let dir = if dist > 1e-6 { delta / dist } else { Vec2::X };
                Some(dir * overlap)
            } else {
                None
            }
        }
        (Shape::Circle { radius }, Shape::Rect { half }) => {
            let rect = Aabb::from_center(pos_b, half);
            let closest = rect.clamp_point(pos_a);
            let delta = pos_a - closest;
            let dist = delta.length();
            if dist < radius {
                let dir = if dist > 1e-6 {
                    delta / dist
                } else {
                    // Center inside the rect: push out along the shallow axis.
                    let to_center = pos_a - pos_b;
                    if to_center.x.abs() > to_center.y.abs() {
                        Vec2::new(to_center.x.signum(), 0.0)
                    } else {
                        Vec2::new(0.0, to_center.y.signum())
                    }
                };
                Some(dir * (radius - dist))
            } else {
                None
            }
        }
        // Rect-shaped dynamics do not exist; rects are static geometry only.
        (Shape::Rect { .. }, _) => None,
    }
}

/// Segment/circle intersection; returns the entry point and its distance.
fn segment_circle(from: Vec2, to: Vec2, center: Vec2, radius: f32) -> Option<(Vec2, f32)> {
    let d = to - from;
    let f = from - center;
    let a = d.dot(d);
    if a < 1e-12 {
        return None;
    }
    let b = 2.0 * f.dot(d);
    let c = f.dot(f) - radius * radius;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let sqrt_disc = disc.sqrt();
    let t1 = (-b - sqrt_disc) / (2.0 * a);
    let t2 = (-b + sqrt_disc) / (2.0 * a);
    let t = if (0.0..=1.0).contains(&t1) {
        t1
    } else if (0.0..=1.0).contains(&t2) {
        // Segment starts inside the circle.
        0.0
    } else {
        return None;
    };
    let point = from + d * t;
    Some((point, d.length() * t))
}

/// Segment/AABB intersection via slab clipping.
fn segment_aabb(from: Vec2, to: Vec2, aabb: Aabb) -> Option<(Vec2, f32)> {
    let d = to - from;
    let mut t_min = 0.0f32;
    let mut t_max = 1.0f32;
    for axis in 0..2 {
        let (start, dir, lo, hi) = if axis == 0 {
            (from.x, d.x, aabb.min.x, aabb.max.x)
        } else {
            (from.y, d.y, aabb.min.y, aabb.max.y)
        };
        if dir.abs() < 1e-12 {
            if start < lo || start > hi {
                return None;
            }
        } else {
            let inv = 1.0 / dir;
            let (mut t0, mut t1) = ((lo - start) * inv, (hi - start) * inv);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
    }
    let point = from + d * t_min;
    Some((point, d.length() * t_min))
}
