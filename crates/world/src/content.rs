//! Static gameplay definitions: weapons, bullets, explosions, obstacles,
//! throwables, items, and the red-zone stage table.
//!
//! Tables are keyed by dense u16 ids, the same ids the wire protocol
//! carries in its 10-bit game-type fields. `validate` runs once at startup
//! and fails fast on any dangling cross-reference, so gameplay code can
//! index the tables without re-checking.

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel id meaning "nothing" in 10-bit game-type fields.
pub const TYPE_NONE: u16 = 0;
/// Exclusive upper bound of a 10-bit game-type id.
pub const TYPE_ID_LIMIT: u16 = 1 << 10;

/// A firearm definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponDef {
    /// Display name.
    pub name: String,
    /// Bullet fired per shot.
    pub bullet: u16,
    /// Bullets per trigger pull (shotguns fire several).
    pub bullet_count: u32,
    /// Seconds between shots.
    pub fire_delay_secs: f32,
    /// Half-angle of random spread, degrees.
    pub spread_deg: f32,
    /// Magazine capacity.
    pub mag_size: u32,
    /// Seconds for a full reload.
    pub reload_secs: f32,
    /// Seconds before the weapon can fire after being switched to.
    pub switch_delay_secs: f32,
    /// Ammo item consumed by reloads.
    pub ammo: u16,
}

/// A bullet definition shared by every weapon firing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletDef {
    /// Travel speed, world units per second.
    pub speed: f32,
    /// Maximum travel distance before the bullet expires.
    pub distance: f32,
    /// Damage on a direct player hit.
    pub damage: f32,
    /// Damage multiplier against obstacles.
    pub obstacle_mult: f32,
    /// Explosion detonated where the bullet stops (impact or expiry);
    /// [`TYPE_NONE`] for plain rounds.
    pub on_hit: u16,
}

/// An explosion definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplosionDef {
    /// Damage at the center.
    pub damage: f32,
    /// Radius of full damage.
    pub inner_radius: f32,
    /// Radius beyond which no damage applies; damage falls off linearly
    /// between the two.
    pub outer_radius: f32,
}

/// A melee weapon definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeleeDef {
    /// Display name.
    pub name: String,
    /// Damage per landed strike.
    pub damage: f32,
    /// Damage multiplier against obstacles.
    pub obstacle_mult: f32,
    /// Strike circle center, this far along the aim direction.
    pub offset: f32,
    /// Strike circle radius.
    pub radius: f32,
    /// Seconds between the swing and the damage landing.
    pub wind_up_secs: f32,
    /// Seconds between swings.
    pub cooldown_secs: f32,
}

/// A throwable (grenade) definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrowableDef {
    /// Display name.
    pub name: String,
    /// Fuse length in seconds, counted from the throw.
    pub fuse_secs: f32,
    /// Explosion detonated when the fuse expires.
    pub explosion: u16,
    /// Initial speed, world units per second.
    pub throw_speed: f32,
}

/// Collision footprint of an obstacle type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ObstacleShape {
    /// Circular footprint.
    Circle {
        /// Radius in world units.
        radius: f32,
    },
    /// Axis-aligned rectangular footprint.
    Rect {
        /// Half extents in world units.
        half_x: f32,
        half_y: f32,
    },
}

/// A static obstacle definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstacleDef {
    /// Display name.
    pub name: String,
    /// Starting health; `None` marks indestructible geometry.
    pub health: Option<f32>,
    /// Collision footprint at scale 1.
    pub shape: ObstacleShape,
    /// Whether destruction changes what other entities can see.
    pub alters_visibility: bool,
    /// Loot spilled on destruction: (item, count) pairs.
    pub loot: Vec<(u16, u32)>,
}

/// Broad behavior class of an inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemClass {
    /// Stackable ammunition.
    Ammo,
    /// Consumable restoring health over a use delay.
    Heal,
    /// Consumable granting boost (adrenaline).
    Boost,
    /// Scope raising the zoom radius.
    Scope,
    /// A firearm; picking it up fills a weapon slot.
    Gun,
    /// A throwable; picking it up stacks into the grenade slot.
    Throwable,
}

/// A pickup-able item definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDef {
    /// Display name.
    pub name: String,
    /// Behavior class.
    pub class: ItemClass,
    /// Maximum stack in the inventory.
    pub max_stack: u32,
    /// `Scope`: zoom radius. `Heal`/`Boost`: restored amount.
    pub magnitude: u32,
    /// `Gun`: weapon table id. `Throwable`: throwable table id.
    pub linked: u16,
    /// Seconds a `Heal`/`Boost` takes to use.
    pub use_secs: f32,
}

/// One stage of the shrinking red zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasStage {
    /// Seconds this stage lasts.
    pub duration_secs: f32,
    /// Circle radius at the start of the stage (fraction of world size).
    pub old_radius: f32,
    /// Circle radius at the end of the stage (fraction of world size).
    pub new_radius: f32,
    /// Damage per application while outside the safe circle.
    pub damage: f32,
    /// Whether the circle moves during this stage (vs. a waiting stage).
    pub moving: bool,
}

/// All static gameplay tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentTables {
    /// Firearms by id.
    pub weapons: BTreeMap<u16, WeaponDef>,
    /// Bullets by id.
    pub bullets: BTreeMap<u16, BulletDef>,
    /// Explosions by id.
    pub explosions: BTreeMap<u16, ExplosionDef>,
    /// Melee weapons by id.
    pub melees: BTreeMap<u16, MeleeDef>,
    /// Throwables by id.
    pub throwables: BTreeMap<u16, ThrowableDef>,
    /// Obstacles by id.
    pub obstacles: BTreeMap<u16, ObstacleDef>,
    /// Items by id.
    pub items: BTreeMap<u16, ItemDef>,
    /// Red-zone stages in play order.
    pub gas_stages: Vec<GasStage>,
}

impl ContentTables {
    /// Built-in tables: a small but complete arsenal, obstacles for the
    /// default map, and the standard red-zone schedule.
    pub fn builtin() -> Self {
        let mut t = Self::default();

        // Bullets.
        t.bullets.insert(
            1,
            BulletDef {
                speed: 110.0,
                distance: 120.0,
                damage: 12.0,
                obstacle_mult: 1.0,
                on_hit: TYPE_NONE,
            },
        );
        t.bullets.insert(
            2,
            BulletDef {
                speed: 66.0,
                distance: 27.0,
                damage: 10.0,
                obstacle_mult: 1.0,
                on_hit: TYPE_NONE,
            },
        );
        t.bullets.insert(
            3,
            BulletDef {
                speed: 88.0,
                distance: 100.0,
                damage: 14.0,
                obstacle_mult: 1.0,
                on_hit: TYPE_NONE,
            },
        );
        t.bullets.insert(
            4,
            BulletDef {
                speed: 24.0,
                distance: 26.0,
                damage: 25.0,
                obstacle_mult: 1.0,
                on_hit: 2,
            },
        );

        // Weapons.
        t.weapons.insert(
            1,
            WeaponDef {
                name: "m9".into(),
                bullet: 1,
                bullet_count: 1,
                fire_delay_secs: 0.12,
                spread_deg: 4.0,
                mag_size: 15,
                reload_secs: 1.6,
                switch_delay_secs: 0.25,
                ammo: 101,
            },
        );
        t.weapons.insert(
            2,
            WeaponDef {
                name: "m870".into(),
                bullet: 2,
                bullet_count: 9,
                fire_delay_secs: 0.9,
                spread_deg: 10.0,
                mag_size: 5,
                reload_secs: 2.6,
                switch_delay_secs: 0.9,
                ammo: 102,
            },
        );
        t.weapons.insert(
            3,
            WeaponDef {
                name: "ak47".into(),
                bullet: 3,
                bullet_count: 1,
                fire_delay_secs: 0.1,
                spread_deg: 2.5,
                mag_size: 30,
                reload_secs: 2.35,
                switch_delay_secs: 0.75,
                ammo: 103,
            },
        );
        t.weapons.insert(
            4,
            WeaponDef {
                name: "m79".into(),
                bullet: 4,
                bullet_count: 1,
                fire_delay_secs: 1.5,
                spread_deg: 1.0,
                mag_size: 1,
                reload_secs: 2.3,
                switch_delay_secs: 0.9,
                ammo: 104,
            },
        );

        // Explosions.
        t.explosions.insert(
            1,
            ExplosionDef {
                damage: 125.0,
                inner_radius: 5.0,
                outer_radius: 12.0,
            },
        );
        t.explosions.insert(
            2,
            ExplosionDef {
                damage: 36.0,
                inner_radius: 3.0,
                outer_radius: 8.0,
            },
        );

        // Melees.
        t.melees.insert(
            1,
            MeleeDef {
                name: "fists".into(),
                damage: 24.0,
                obstacle_mult: 1.0,
                offset: 1.35,
                radius: 0.9,
                wind_up_secs: 0.1,
                cooldown_secs: 0.25,
            },
        );

        // Throwables.
        t.throwables.insert(
            1,
            ThrowableDef {
                name: "frag".into(),
                fuse_secs: 4.0,
                explosion: 1,
                throw_speed: 20.0,
            },
        );

        // Obstacles.
        t.obstacles.insert(
            1,
            ObstacleDef {
                name: "tree_oak".into(),
                health: Some(175.0),
                shape: ObstacleShape::Circle { radius: 1.6 },
                alters_visibility: false,
                loot: vec![],
            },
        );
        t.obstacles.insert(
            2,
            ObstacleDef {
                name: "rock".into(),
                health: Some(250.0),
                shape: ObstacleShape::Circle { radius: 2.0 },
                alters_visibility: false,
                loot: vec![],
            },
        );
        t.obstacles.insert(
            3,
            ObstacleDef {
                name: "crate_wood".into(),
                health: Some(100.0),
                shape: ObstacleShape::Rect {
                    half_x: 2.25,
                    half_y: 2.25,
                },
                alters_visibility: false,
                loot: vec![(101, 30), (201, 1)],
            },
        );
        t.obstacles.insert(
            4,
            ObstacleDef {
                name: "bunker_wall".into(),
                health: None,
                shape: ObstacleShape::Rect {
                    half_x: 6.0,
                    half_y: 0.5,
                },
                alters_visibility: false,
                loot: vec![],
            },
        );
        t.obstacles.insert(
            5,
            ObstacleDef {
                name: "bunker_ceiling".into(),
                health: Some(200.0),
                shape: ObstacleShape::Rect {
                    half_x: 8.0,
                    half_y: 8.0,
                },
                alters_visibility: true,
                loot: vec![],
            },
        );

        // Items.
        t.items.insert(
            101,
            ItemDef {
                name: "9mm".into(),
                class: ItemClass::Ammo,
                max_stack: 120,
                magnitude: 0,
                linked: TYPE_NONE,
                use_secs: 0.0,
            },
        );
        t.items.insert(
            102,
            ItemDef {
                name: "12gauge".into(),
                class: ItemClass::Ammo,
                max_stack: 30,
                magnitude: 0,
                linked: TYPE_NONE,
                use_secs: 0.0,
            },
        );
        t.items.insert(
            103,
            ItemDef {
                name: "762mm".into(),
                class: ItemClass::Ammo,
                max_stack: 120,
                magnitude: 0,
                linked: TYPE_NONE,
                use_secs: 0.0,
            },
        );
        t.items.insert(
            104,
            ItemDef {
                name: "40mm".into(),
                class: ItemClass::Ammo,
                max_stack: 10,
                magnitude: 0,
                linked: TYPE_NONE,
                use_secs: 0.0,
            },
        );
        t.items.insert(
            201,
            ItemDef {
                name: "bandage".into(),
                class: ItemClass::Heal,
                max_stack: 15,
                magnitude: 15,
                linked: TYPE_NONE,
                use_secs: 3.0,
            },
        );
        t.items.insert(
            202,
            ItemDef {
                name: "soda".into(),
                class: ItemClass::Boost,
                max_stack: 15,
                magnitude: 25,
                linked: TYPE_NONE,
                use_secs: 3.0,
            },
        );
        t.items.insert(
            211,
            ItemDef {
                name: "2xscope".into(),
                class: ItemClass::Scope,
                max_stack: 1,
                magnitude: 36,
                linked: TYPE_NONE,
                use_secs: 0.0,
            },
        );
        t.items.insert(
            212,
            ItemDef {
                name: "4xscope".into(),
                class: ItemClass::Scope,
                max_stack: 1,
                magnitude: 48,
                linked: TYPE_NONE,
                use_secs: 0.0,
            },
        );
        t.items.insert(
            301,
            ItemDef {
                name: "m9_loot".into(),
                class: ItemClass::Gun,
                max_stack: 1,
                magnitude: 0,
                linked: 1,
                use_secs: 0.0,
            },
        );
        t.items.insert(
            302,
            ItemDef {
                name: "m870_loot".into(),
                class: ItemClass::Gun,
                max_stack: 1,
                magnitude: 0,
                linked: 2,
                use_secs: 0.0,
            },
        );
        t.items.insert(
            303,
            ItemDef {
                name: "ak47_loot".into(),
                class: ItemClass::Gun,
                max_stack: 1,
                magnitude: 0,
                linked: 3,
                use_secs: 0.0,
            },
        );
        t.items.insert(
            304,
            ItemDef {
                name: "m79_loot".into(),
                class: ItemClass::Gun,
                max_stack: 1,
                magnitude: 0,
                linked: 4,
                use_secs: 0.0,
            },
        );
        t.items.insert(
            401,
            ItemDef {
                name: "frag_loot".into(),
                class: ItemClass::Throwable,
                max_stack: 6,
                magnitude: 0,
                linked: 1,
                use_secs: 0.0,
            },
        );

        t.gas_stages = vec![
            GasStage {
                duration_secs: 80.0,
                old_radius: 0.71,
                new_radius: 0.71,
                damage: 0.0,
                moving: false,
            },
            GasStage {
                duration_secs: 35.0,
                old_radius: 0.71,
                new_radius: 0.42,
                damage: 1.4,
                moving: true,
            },
            GasStage {
                duration_secs: 60.0,
                old_radius: 0.42,
                new_radius: 0.42,
                damage: 2.2,
                moving: false,
            },
            GasStage {
                duration_secs: 30.0,
                old_radius: 0.42,
                new_radius: 0.18,
                damage: 3.5,
                moving: true,
            },
            GasStage {
                duration_secs: 45.0,
                old_radius: 0.18,
                new_radius: 0.18,
                damage: 4.5,
                moving: false,
            },
            GasStage {
                duration_secs: 25.0,
                old_radius: 0.18,
                new_radius: 0.02,
                damage: 7.5,
                moving: true,
            },
            GasStage {
                duration_secs: 20.0,
                old_radius: 0.02,
                new_radius: 0.0,
                damage: 10.0,
                moving: true,
            },
        ];

        t
    }

    /// Check every cross-table reference. Called once at startup; any
    /// failure aborts server start.
    pub fn validate(&self) -> Result<()> {
        for (&id, w) in &self.weapons {
            ensure!(id < TYPE_ID_LIMIT, "weapon id {id} exceeds 10-bit limit");
            if !self.bullets.contains_key(&w.bullet) {
                bail!("weapon {:?} ({id}) references unknown bullet {}", w.name, w.bullet);
            }
            if !self.items.contains_key(&w.ammo) {
                bail!("weapon {:?} ({id}) references unknown ammo item {}", w.name, w.ammo);
            }
            ensure!(w.bullet_count >= 1, "weapon {:?} fires zero bullets", w.name);
        }
        for (&id, b) in &self.bullets {
            ensure!(id < TYPE_ID_LIMIT, "bullet id {id} exceeds 10-bit limit");
            if b.on_hit != TYPE_NONE && !self.explosions.contains_key(&b.on_hit) {
                bail!("bullet {id} references unknown on-hit explosion {}", b.on_hit);
            }
        }
        for (&id, m) in &self.melees {
            ensure!(id < TYPE_ID_LIMIT, "melee id {id} exceeds 10-bit limit");
            ensure!(m.damage > 0.0, "melee {:?} deals no damage", m.name);
            ensure!(m.radius > 0.0, "melee {:?} has no strike area", m.name);
        }
        for (&id, th) in &self.throwables {
            ensure!(id < TYPE_ID_LIMIT, "throwable id {id} exceeds 10-bit limit");
            if !self.explosions.contains_key(&th.explosion) {
                bail!(
                    "throwable {:?} ({id}) references unknown explosion {}",
                    th.name,
                    th.explosion
                );
            }
        }
        for (&id, ob) in &self.obstacles {
            ensure!(id < TYPE_ID_LIMIT, "obstacle id {id} exceeds 10-bit limit");
            for &(item, count) in &ob.loot {
                if !self.items.contains_key(&item) {
                    bail!("obstacle {:?} ({id}) drops unknown item {item}", ob.name);
                }
                ensure!(count >= 1, "obstacle {:?} drops empty stack", ob.name);
            }
        }
        for (&id, item) in &self.items {
            ensure!(id < TYPE_ID_LIMIT, "item id {id} exceeds 10-bit limit");
            match item.class {
                ItemClass::Gun => {
                    if !self.weapons.contains_key(&item.linked) {
                        bail!("gun item {:?} ({id}) links unknown weapon {}", item.name, item.linked);
                    }
                }
                ItemClass::Throwable => {
                    if !self.throwables.contains_key(&item.linked) {
                        bail!(
                            "throwable item {:?} ({id}) links unknown throwable {}",
                            item.name,
                            item.linked
                        );
                    }
                }
                _ => {}
            }
        }
        ensure!(!self.gas_stages.is_empty(), "red-zone stage table is empty");
        for (i, pair) in self.gas_stages.windows(2).enumerate() {
            ensure!(
                (pair[0].new_radius - pair[1].old_radius).abs() < 1e-3,
                "red-zone stage {} ends at radius {} but stage {} starts at {}",
                i,
                pair[0].new_radius,
                i + 1,
                pair[1].old_radius
            );
        }
        Ok(())
    }
}
