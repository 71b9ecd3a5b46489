#![warn(missing_docs)]
//! World state: entities, content tables, map geometry, visibility
//! precomputation, dirty-set tracking, and the red zone.

pub mod bullet;
pub mod content;
pub mod dirty;
pub mod entity;
pub mod gas;
pub mod map;
pub mod player;
pub mod registry;
pub mod visibility;

pub use bullet::{Bullet, Explosion};
pub use content::ContentTables;
pub use dirty::DirtySets;
pub use entity::{Entity, EntityKind, ObjectKind};
pub use gas::{GasMode, GasState};
pub use map::{GameMap, StairRegion};
pub use player::PlayerState;
pub use registry::Registry;
pub use visibility::VisibilityGrid;
