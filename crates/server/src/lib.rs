#![warn(missing_docs)]
//! Authoritative game server: match simulation, per-client replication,
//! and the fixed-step runtime driving both.

pub mod effects;
pub mod emit;
pub mod game;
pub mod observer;
pub mod runtime;

pub use game::{Game, GameOptions};
pub use runtime::{run, ServerOptions};
