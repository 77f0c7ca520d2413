//! tilerun core -- entity model, tile grid, and object registry.
//!
//! This crate holds the data the per-frame simulation works on. Entities are
//! a closed tagged variant (scenery, movable, controllable) kept in a
//! z-ordered live set owned by the [`World`](world::World). Additions and
//! discards are staged and applied at a single flush point per frame.
//! Generational entity ids make stale handles detectable.
//!
//! # Quick Start
//!
//! ```
//! use tilerun_core::prelude::*;
//!
//! let grid = TileGrid::from_rows(&[[1u8, 1, 1], [0, 0, 0]]).unwrap();
//! let mut world = World::new(grid);
//!
//! let hero = world.add_entity(Entity::controllable("hero", 1.0, 0.0, 1.0, 1.0, 0));
//! assert!(!world.is_live(hero));
//!
//! world.flush();
//! assert_eq!(world.entity(hero).unwrap().name, "hero");
//! ```

#![deny(unsafe_code)]

pub mod entity;
pub mod geometry;
pub mod hooks;
pub mod input;
pub mod kinematics;
pub mod object;
pub mod tile;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by registry and grid operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The entity is not live (stale generation, never added, or still pending).
    #[error("entity {entity:?} is not live")]
    StaleEntity { entity: entity::EntityId },

    /// The operation needs a capability the entity's kind does not have.
    #[error("entity {entity:?} is not {capability}")]
    MissingCapability {
        entity: entity::EntityId,
        capability: &'static str,
    },

    /// A tile write addressed a cell outside the grid.
    #[error("cell ({x}, {y}) is outside the tile grid")]
    OutOfGrid { x: i64, y: i64 },

    /// A trigger band index past the last content-defined band.
    #[error("trigger band {band} does not exist")]
    UnknownTriggerBand { band: u8 },

    /// Grid rows passed to a constructor differ in length.
    #[error("tile grid row {row} has {found} cells, expected {expected}")]
    RaggedGrid {
        row: usize,
        expected: usize,
        found: usize,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::entity::{EntityAllocator, EntityId, EventId, Handle};
    pub use crate::geometry::{Direction, Rect, Vec2};
    pub use crate::hooks::{Controls, EventFlow};
    pub use crate::input::Buttons;
    pub use crate::kinematics::Kinematics;
    pub use crate::object::{
        Entity, FacingMode, GhostTrack, Kind, LifeState, Motion, Pilot, PilotSource, RenderHints,
    };
    pub use crate::tile::{Tile, TileGrid};
    pub use crate::world::{FlushReport, World};
    pub use crate::CoreError;
}
