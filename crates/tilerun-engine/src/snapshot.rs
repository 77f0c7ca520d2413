//! Frame snapshots and state hashing for determinism checks.
//!
//! A [`FrameSnapshot`] captures everything a replay must reproduce: the
//! frame counter, the global state, and each live entity's id, position and
//! life. Wall-clock values (elapsed time, frame deltas) are left out because
//! they legitimately differ between a recording and its playback.
//!
//! The hash is a BLAKE3 digest over a fixed little-endian encoding, so it is
//! stable across runs and platforms and bit-exact for float positions.

use serde::{Deserialize, Serialize};
use tilerun_core::entity::EntityId;
use tilerun_core::object::LifeState;
use tilerun_core::world::World;

use crate::state::GameState;

/// One live entity as seen by the determinism check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub life: Option<LifeState>,
    pub health: Option<i32>,
}

/// The deterministic part of the session state at the end of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub frame: u64,
    pub state: GameState,
    pub entities: Vec<EntitySnapshot>,
}

impl FrameSnapshot {
    pub fn capture(world: &World, state: GameState) -> Self {
        let entities = world
            .entities()
            .map(|e| EntitySnapshot {
                id: e.id(),
                name: e.name.clone(),
                x: e.pos.x,
                y: e.pos.y,
                life: e.pilot().map(|p| p.life),
                health: e.pilot().map(|p| p.health),
            })
            .collect();
        Self {
            frame: world.frame(),
            state,
            entities,
        }
    }

    /// BLAKE3 hex digest of this snapshot.
    pub fn state_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.frame.to_le_bytes());
        hasher.update(&[state_tag(self.state)]);
        hasher.update(&(self.entities.len() as u64).to_le_bytes());
        for e in &self.entities {
            hasher.update(&e.id.to_raw().to_le_bytes());
            hasher.update(&(e.name.len() as u64).to_le_bytes());
            hasher.update(e.name.as_bytes());
            hasher.update(&e.x.to_bits().to_le_bytes());
            hasher.update(&e.y.to_bits().to_le_bytes());
            hasher.update(&[e.life.map_or(0, life_tag)]);
            hasher.update(&e.health.unwrap_or(0).to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

fn state_tag(state: GameState) -> u8 {
    match state {
        GameState::Ongoing => 1,
        GameState::Paused => 2,
        GameState::Ended => 3,
        GameState::Completed => 4,
    }
}

fn life_tag(life: LifeState) -> u8 {
    match life {
        LifeState::Alive => 1,
        LifeState::Dead => 2,
        LifeState::Finish => 3,
    }
}
