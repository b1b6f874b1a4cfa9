//! Zone playback engines
//!
//! - `player`: the per-zone state machine (cursor, dispatch, render modes)
//! - `controller`: the control thread that owns a player

mod controller;
mod player;

pub use controller::{ZoneController, ZoneMessage};
pub use player::{PlayerEvent, PlayerSettings};
