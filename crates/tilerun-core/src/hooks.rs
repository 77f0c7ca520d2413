//! Callback types content attaches to the world and its entities.
//!
//! Every hook receives the [`World`] mutably, so it can read other entities,
//! edit tiles, and stage additions or discards. Structural changes requested
//! from a hook only take effect at the next flush. Hooks return
//! `anyhow::Result`: an error is an unhandled fault that halts the session.

use crate::entity::EntityId;
use crate::input::Buttons;
use crate::object::Entity;
use crate::tile::Tile;
use crate::world::World;

/// Whether an event wants to keep running on later frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFlow {
    Continue,
    /// Unregister after this run.
    Finished,
}

/// A free-standing event, run once per frame in registration order.
pub type FreeEventFn = Box<dyn FnMut(&mut World) -> anyhow::Result<EventFlow>>;

/// An event attached to an entity, run with that entity's id.
pub type EntityEventFn = Box<dyn FnMut(&mut World, EntityId) -> anyhow::Result<EventFlow>>;

/// Per-frame movement logic of a non-controllable entity, or a death action.
pub type EntityHookFn = Box<dyn FnMut(&mut World, EntityId) -> anyhow::Result<()>>;

/// Invoked for every non-hollow tile code an entity intersects this frame.
pub type TileFn = Box<dyn FnMut(&mut World, EntityId, Tile) -> anyhow::Result<()>>;

/// Invoked with `(me, other)` for every live entity overlapping `me`.
pub type OverlapFn = Box<dyn FnMut(&mut World, EntityId, EntityId) -> anyhow::Result<()>>;

/// Releases entity-owned resources. Runs synchronously when the entity is discarded.
pub type TeardownFn = Box<dyn FnOnce(&mut Entity)>;

/// Turns one frame of resolved input into motion for a controllable entity.
pub trait Controls {
    fn drive(&mut self, world: &mut World, me: EntityId, input: &Buttons) -> anyhow::Result<()>;
}
