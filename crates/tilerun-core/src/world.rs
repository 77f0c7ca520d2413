//! The object registry.
//!
//! [`World`] owns the live entity and event sets, the tile grid, the focus
//! list and the session RNG. Structural changes go through a two-phase
//! command buffer:
//!
//! 1. [`World::add_entity`], [`World::add_event`] and [`World::discard`] may be
//!    called at any time, including from inside hooks. They only stage the
//!    request. `discard` additionally runs the entity's teardown right away.
//! 2. [`World::flush`] applies every staged request at once. It is called
//!    exactly once per frame, before any movement logic runs, so the update
//!    pipeline never iterates a collection that is being restructured.
//!
//! Discarded handles are appended to a bounded trash list that exists only
//! for diagnostics: once it grows past its capacity it is cleared.
//!
//! # Hooks and borrowing
//!
//! Hooks receive `&mut World`, so the world cannot lend out the closure and
//! itself at the same time. The runners on this type take the closure out of
//! its owner, call it, and put it back afterwards.

use std::collections::{HashMap, HashSet};

use rand::SeedableRng;
use rand_pcg::Pcg32;
use tracing::debug;

use crate::entity::{EntityAllocator, EntityId, EventId, Handle};
use crate::hooks::{EventFlow, FreeEventFn};
use crate::input::Buttons;
use crate::object::{AttachedEvent, Entity, LifeState};
use crate::tile::{Tile, TileGrid};
use crate::CoreError;

/// Default number of trash entries kept before the list is cleared.
pub const DEFAULT_TRASH_CAPACITY: usize = 200;

struct EventSlot {
    id: EventId,
    run: Option<FreeEventFn>,
}

/// Summary of one [`World::flush`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub added_entities: usize,
    pub added_events: usize,
    /// Live entities and events removed.
    pub removed: usize,
    /// Pending additions discarded before they became live.
    pub cancelled: usize,
    /// Whether the trash list overflowed and was cleared.
    pub trash_cleared: bool,
    /// Whether the entity list was re-sorted by z-index.
    pub resorted: bool,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.added_entities == 0 && self.added_events == 0 && self.removed == 0 && self.cancelled == 0
    }
}

/// Live simulation state plus the deferred add/discard buffer.
pub struct World {
    /// Live entities, sorted by z-index after every flush that added one.
    entities: Vec<Entity>,
    /// Position of each live entity in `entities`.
    index: HashMap<EntityId, usize>,
    events: Vec<EventSlot>,
    tiles: TileGrid,
    focus: Vec<EntityId>,
    allocator: EntityAllocator,
    next_event: u64,

    staged_entities: Vec<Entity>,
    staged_events: Vec<EventSlot>,
    staged_discards: Vec<Handle>,
    discard_set: HashSet<Handle>,

    trash: Vec<Handle>,
    trash_capacity: usize,
    needs_sort: bool,

    rng: Pcg32,
    frame: u64,
    delta_ms: f64,
}

impl World {
    /// An empty world over `tiles`, with the RNG seeded from 0.
    pub fn new(tiles: TileGrid) -> Self {
        Self {
            entities: Vec::new(),
            index: HashMap::new(),
            events: Vec::new(),
            tiles,
            focus: Vec::new(),
            allocator: EntityAllocator::new(),
            next_event: 0,
            staged_entities: Vec::new(),
            staged_events: Vec::new(),
            staged_discards: Vec::new(),
            discard_set: HashSet::new(),
            trash: Vec::new(),
            trash_capacity: DEFAULT_TRASH_CAPACITY,
            needs_sort: false,
            rng: Pcg32::seed_from_u64(0),
            frame: 0,
            delta_ms: 0.0,
        }
    }

    pub fn with_trash_capacity(mut self, capacity: usize) -> Self {
        self.trash_capacity = capacity;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Pcg32::seed_from_u64(seed);
        self
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    /// Stage an entity for addition. It becomes live at the next flush, but
    /// its id is assigned now so content can refer to it immediately.
    pub fn add_entity(&mut self, mut entity: Entity) -> EntityId {
        let id = self.allocator.allocate();
        entity.id = id;
        self.staged_entities.push(entity);
        id
    }

    /// Stage a free event for addition.
    pub fn add_event<F>(&mut self, f: F) -> EventId
    where
        F: FnMut(&mut World) -> anyhow::Result<EventFlow> + 'static,
    {
        let id = EventId(self.next_event);
        self.next_event += 1;
        self.staged_events.push(EventSlot {
            id,
            run: Some(Box::new(f)),
        });
        id
    }

    /// Stage a discard.
    ///
    /// An entity's teardown runs immediately, but the entity stays live and
    /// visible to the pipeline until the next flush. Unknown handles and
    /// repeated discards within a frame are ignored.
    pub fn discard(&mut self, handle: impl Into<Handle>) {
        let handle = handle.into();
        if self.discard_set.contains(&handle) || !self.is_known(handle) {
            return;
        }
        if let Handle::Entity(id) = handle {
            let entity = match self.index.get(&id) {
                Some(&i) => Some(&mut self.entities[i]),
                None => self.staged_entities.iter_mut().find(|e| e.id == id),
            };
            if let Some(entity) = entity {
                if let Some(teardown) = entity.teardown.take() {
                    teardown(entity);
                }
            }
        }
        self.discard_set.insert(handle);
        self.staged_discards.push(handle);
    }

    fn is_known(&self, handle: Handle) -> bool {
        match handle {
            Handle::Entity(id) => {
                self.index.contains_key(&id) || self.staged_entities.iter().any(|e| e.id == id)
            }
            Handle::Event(id) => {
                self.events.iter().any(|s| s.id == id)
                    || self.staged_events.iter().any(|s| s.id == id)
            }
        }
    }

    /// Whether a discard of `handle` is waiting for the next flush.
    pub fn is_discard_pending(&self, handle: impl Into<Handle>) -> bool {
        self.discard_set.contains(&handle.into())
    }

    // -----------------------------------------------------------------------
    // Flush
    // -----------------------------------------------------------------------

    /// Apply all staged discards, then all staged additions.
    ///
    /// A pending addition discarded before this flush is cancelled: it never
    /// becomes live. The live set afterwards is `(previous ∪ adds) − discards`
    /// regardless of the order of calls.
    pub fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();

        let discards = std::mem::take(&mut self.staged_discards);
        self.discard_set.clear();
        if !discards.is_empty() {
            let mut dead_entities = HashSet::new();
            let mut dead_events = HashSet::new();
            for &handle in &discards {
                match handle {
                    Handle::Entity(id) => {
                        if self.index.contains_key(&id) {
                            report.removed += 1;
                        } else {
                            report.cancelled += 1;
                        }
                        dead_entities.insert(id);
                        self.allocator.release(id);
                    }
                    Handle::Event(id) => {
                        if self.events.iter().any(|s| s.id == id) {
                            report.removed += 1;
                        } else {
                            report.cancelled += 1;
                        }
                        dead_events.insert(id);
                    }
                }
                self.trash.push(handle);
            }
            self.entities.retain(|e| !dead_entities.contains(&e.id));
            self.staged_entities.retain(|e| !dead_entities.contains(&e.id));
            self.events.retain(|s| !dead_events.contains(&s.id));
            self.staged_events.retain(|s| !dead_events.contains(&s.id));
        }

        if self.trash.len() > self.trash_capacity {
            self.trash.clear();
            report.trash_cleared = true;
        }

        report.added_entities = self.staged_entities.len();
        report.added_events = self.staged_events.len();
        if report.added_entities > 0 {
            self.needs_sort = true;
        }
        self.entities.append(&mut self.staged_entities);
        self.events.append(&mut self.staged_events);

        if self.needs_sort {
            // `sort_by_key` is stable: equal z-indices keep insertion order.
            self.entities.sort_by_key(|e| e.z_index);
            self.needs_sort = false;
            report.resorted = true;
        }
        if report.resorted || report.removed > 0 {
            self.reindex();
        }

        let allocator = &self.allocator;
        self.focus.retain(|&id| allocator.is_alive(id));

        if !report.is_empty() {
            debug!(
                frame = self.frame,
                added_entities = report.added_entities,
                added_events = report.added_events,
                removed = report.removed,
                cancelled = report.cancelled,
                trash_cleared = report.trash_cleared,
                "registry flushed"
            );
        }
        report
    }

    fn reindex(&mut self) {
        self.index.clear();
        self.index
            .extend(self.entities.iter().enumerate().map(|(i, e)| (e.id, i)));
    }

    /// Force a z-order re-sort at the next flush, e.g. after content changed
    /// an entity's `z_index`.
    pub fn mark_unsorted(&mut self) {
        self.needs_sort = true;
    }

    /// Tear down and forget everything, restore the tile grid from its
    /// pristine copy and reseed the RNG. Used when a stage is rebuilt.
    pub fn reset(&mut self, seed: u64) {
        for entity in self.entities.iter_mut().chain(self.staged_entities.iter_mut()) {
            if let Some(teardown) = entity.teardown.take() {
                teardown(entity);
            }
        }
        self.entities.clear();
        self.index.clear();
        self.events.clear();
        self.staged_entities.clear();
        self.staged_events.clear();
        self.staged_discards.clear();
        self.discard_set.clear();
        self.focus.clear();
        self.trash.clear();
        self.allocator.reset();
        self.next_event = 0;
        self.needs_sort = false;
        self.tiles.revert_all();
        self.rng = Pcg32::seed_from_u64(seed);
        self.frame = 0;
        self.delta_ms = 0.0;
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Live entity by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleEntity`] if `id` is not live (never added,
    /// still pending, or already flushed out).
    pub fn entity(&self, id: EntityId) -> Result<&Entity, CoreError> {
        self.index
            .get(&id)
            .map(|&i| &self.entities[i])
            .ok_or(CoreError::StaleEntity { entity: id })
    }

    /// Mutable live entity by id. Same errors as [`World::entity`].
    pub fn entity_mut(&mut self, id: EntityId) -> Result<&mut Entity, CoreError> {
        match self.index.get(&id) {
            Some(&i) => Ok(&mut self.entities[i]),
            None => Err(CoreError::StaleEntity { entity: id }),
        }
    }

    pub fn try_entity(&self, id: EntityId) -> Option<&Entity> {
        self.index.get(&id).map(|&i| &self.entities[i])
    }

    /// Live entities in z-order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Ids of the live entities in z-order, detached from the world borrow.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|e| e.id).collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Ids of the live free events in registration order.
    pub fn event_ids(&self) -> Vec<EventId> {
        self.events.iter().map(|s| s.id).collect()
    }

    /// Number of staged additions not yet flushed.
    pub fn pending_count(&self) -> usize {
        self.staged_entities.len() + self.staged_events.len()
    }

    pub fn is_live(&self, handle: impl Into<Handle>) -> bool {
        match handle.into() {
            Handle::Entity(id) => self.index.contains_key(&id),
            Handle::Event(id) => self.events.iter().any(|s| s.id == id),
        }
    }

    /// Recently discarded handles, oldest first.
    pub fn trash(&self) -> &[Handle] {
        &self.trash
    }

    pub fn trash_capacity(&self) -> usize {
        self.trash_capacity
    }

    // -- tiles --------------------------------------------------------------

    pub fn tiles(&self) -> &TileGrid {
        &self.tiles
    }

    pub fn tiles_mut(&mut self) -> &mut TileGrid {
        &mut self.tiles
    }

    /// Tile code under a world-space point.
    pub fn tile_at(&self, x: f32, y: f32) -> Option<Tile> {
        self.tiles.get(x.floor() as i64, y.floor() as i64)
    }

    /// Pristine tile code under a world-space point.
    pub fn pristine_tile_at(&self, x: f32, y: f32) -> Option<Tile> {
        self.tiles.pristine(x.floor() as i64, y.floor() as i64)
    }

    /// Paint a tile under a world-space point.
    pub fn set_tile(&mut self, x: f32, y: f32, tile: Tile) -> Result<(), CoreError> {
        self.tiles.set(x.floor() as i64, y.floor() as i64, tile)
    }

    /// Restore the pristine code under a world-space point.
    pub fn revert_tile(&mut self, x: f32, y: f32) {
        self.tiles.revert(x.floor() as i64, y.floor() as i64);
    }

    // -- focus --------------------------------------------------------------

    /// Entities the camera keeps in view.
    pub fn focus(&self) -> &[EntityId] {
        &self.focus
    }

    pub fn add_focus(&mut self, id: EntityId) {
        if !self.focus.contains(&id) {
            self.focus.push(id);
        }
    }

    pub fn remove_focus(&mut self, id: EntityId) {
        self.focus.retain(|&f| f != id);
    }

    pub fn clear_focus(&mut self) {
        self.focus.clear();
    }

    // -- clock and randomness -----------------------------------------------

    /// The session RNG. Part of the deterministic state: it is reseeded on
    /// every rebuild.
    pub fn rng(&mut self) -> &mut Pcg32 {
        &mut self.rng
    }

    /// Frames simulated since the last rebuild.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Wall-clock delta of the current frame in milliseconds.
    pub fn delta_ms(&self) -> f64 {
        self.delta_ms
    }

    pub fn set_clock(&mut self, frame: u64, delta_ms: f64) {
        self.frame = frame;
        self.delta_ms = delta_ms;
    }

    // -----------------------------------------------------------------------
    // Life state
    // -----------------------------------------------------------------------

    fn require_pilot(&mut self, id: EntityId) -> Result<&mut Entity, CoreError> {
        let entity = self.entity_mut(id)?;
        if entity.pilot().is_none() {
            return Err(CoreError::MissingCapability {
                entity: id,
                capability: "controllable",
            });
        }
        Ok(entity)
    }

    /// Add `power` to a controllable entity's health (negative values hurt).
    /// Reaching zero or less kills it.
    pub fn hit(&mut self, id: EntityId, power: i32) -> anyhow::Result<()> {
        let entity = self.require_pilot(id)?;
        let Some(pilot) = entity.pilot_mut() else {
            return Ok(());
        };
        pilot.health += power;
        if pilot.health <= 0 {
            self.kill(id)?;
        }
        Ok(())
    }

    /// Mark a living controllable entity dead and run its death hook. Dead or
    /// finished entities are left alone, so the hook fires at most once.
    pub fn kill(&mut self, id: EntityId) -> anyhow::Result<()> {
        let entity = self.require_pilot(id)?;
        let Some(pilot) = entity.pilot_mut() else {
            return Ok(());
        };
        if pilot.life != LifeState::Alive {
            return Ok(());
        }
        pilot.life = LifeState::Dead;
        let hook = pilot.on_death.take();
        if let Some(mut hook) = hook {
            let result = hook(self, id);
            if let Some(pilot) = self.entity_mut(id)?.pilot_mut() {
                if pilot.on_death.is_none() {
                    pilot.on_death = Some(hook);
                }
            }
            result?;
        }
        Ok(())
    }

    /// Mark a living controllable entity as having reached the goal.
    pub fn finish(&mut self, id: EntityId) -> Result<(), CoreError> {
        let entity = self.require_pilot(id)?;
        if let Some(pilot) = entity.pilot_mut() {
            if pilot.life == LifeState::Alive {
                pilot.life = LifeState::Finish;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Hook runners
    // -----------------------------------------------------------------------

    /// Run a movable entity's per-frame behaviour, if it has one.
    pub fn run_behavior(&mut self, id: EntityId) -> anyhow::Result<()> {
        let Some(motion) = self.entity_mut(id)?.motion_mut() else {
            return Ok(());
        };
        let Some(mut behavior) = motion.behavior.take() else {
            return Ok(());
        };
        let result = behavior(self, id);
        if let Some(motion) = self.entity_mut(id)?.motion_mut() {
            if motion.behavior.is_none() {
                motion.behavior = Some(behavior);
            }
        }
        result
    }

    /// Drive a controllable entity with one frame of resolved input.
    pub fn run_controls(&mut self, id: EntityId, input: &Buttons) -> anyhow::Result<()> {
        let entity = self.require_pilot(id)?;
        let Some(mut controls) = entity.pilot_mut().and_then(|p| p.controls.take()) else {
            return Ok(());
        };
        let result = controls.drive(self, id, input);
        if let Some(pilot) = self.entity_mut(id)?.pilot_mut() {
            if pilot.controls.is_none() {
                pilot.controls = Some(controls);
            }
        }
        result
    }

    /// Recompute the cells an entity occupies and return the distinct
    /// non-hollow codes found there, in first-seen order. Cells outside the
    /// grid are ignored.
    pub fn scan_tiles(&mut self, id: EntityId) -> Result<Vec<Tile>, CoreError> {
        let i = *self
            .index
            .get(&id)
            .ok_or(CoreError::StaleEntity { entity: id })?;
        let entity = &mut self.entities[i];
        let (x0, y0, x1, y1) = entity.rect().cell_span();
        let (x0, y0, x1, y1) = self.tiles.clip_span(x0, y0, x1, y1);
        let cells = entity.occupied_cells_mut();
        let mut found = Vec::new();
        for y in y0..y1 {
            for x in x0..x1 {
                let Some(tile) = self.tiles.get(x, y) else {
                    continue;
                };
                cells.push((x, y));
                if tile != Tile::HOLLOW && !found.contains(&tile) {
                    found.push(tile);
                }
            }
        }
        Ok(found)
    }

    /// Invoke an entity's tile handlers for each code in `tiles`.
    pub fn dispatch_tiles(&mut self, id: EntityId, tiles: &[Tile]) -> anyhow::Result<()> {
        if tiles.is_empty() {
            return Ok(());
        }
        let Some(motion) = self.entity_mut(id)?.motion_mut() else {
            return Ok(());
        };
        let mut handlers = std::mem::take(&mut motion.tile_handlers);
        let mut result = Ok(());
        'outer: for &tile in tiles {
            for handler in handlers.iter_mut() {
                if let Err(e) = handler(self, id, tile) {
                    result = Err(e);
                    break 'outer;
                }
            }
        }
        if let Some(motion) = self.entity_mut(id)?.motion_mut() {
            handlers.append(&mut motion.tile_handlers);
            motion.tile_handlers = handlers;
        }
        result
    }

    /// Live entities other than `id` whose rectangles overlap it, in z-order.
    pub fn overlapping(&self, id: EntityId) -> Result<Vec<EntityId>, CoreError> {
        let rect = self.entity(id)?.rect();
        Ok(self
            .entities
            .iter()
            .filter(|e| e.id != id && e.rect().overlaps(&rect))
            .map(|e| e.id)
            .collect())
    }

    /// Invoke an entity's overlap handlers against every overlapping entity.
    pub fn dispatch_overlaps(&mut self, id: EntityId) -> anyhow::Result<()> {
        let has_handlers = self
            .entity(id)?
            .motion()
            .is_some_and(|m| !m.overlap_handlers.is_empty());
        if !has_handlers {
            return Ok(());
        }
        let others = self.overlapping(id)?;
        if others.is_empty() {
            return Ok(());
        }
        let Some(motion) = self.entity_mut(id)?.motion_mut() else {
            return Ok(());
        };
        let mut handlers = std::mem::take(&mut motion.overlap_handlers);
        let mut result = Ok(());
        'outer: for &other in &others {
            for handler in handlers.iter_mut() {
                if let Err(e) = handler(self, id, other) {
                    result = Err(e);
                    break 'outer;
                }
            }
        }
        if let Some(motion) = self.entity_mut(id)?.motion_mut() {
            handlers.append(&mut motion.overlap_handlers);
            motion.overlap_handlers = handlers;
        }
        result
    }

    /// Tile scan plus tile and overlap dispatch for a triggerable entity.
    /// Returns the codes found, or nothing if the entity is not triggerable.
    pub fn trigger_pass(&mut self, id: EntityId) -> anyhow::Result<Vec<Tile>> {
        let triggerable = self.entity(id)?.motion().is_some_and(|m| m.triggerable);
        if !triggerable {
            return Ok(Vec::new());
        }
        let tiles = self.scan_tiles(id)?;
        self.dispatch_tiles(id, &tiles)?;
        self.dispatch_overlaps(id)?;
        Ok(tiles)
    }

    /// Attach a persistent event to a live entity.
    pub fn attach_event<F>(&mut self, id: EntityId, f: F) -> Result<(), CoreError>
    where
        F: FnMut(&mut World, EntityId) -> anyhow::Result<EventFlow> + 'static,
    {
        self.entity_mut(id)?.attach(Box::new(f), false);
        Ok(())
    }

    /// Attach a one-shot event to a live entity.
    pub fn attach_once<F>(&mut self, id: EntityId, mut f: F) -> Result<(), CoreError>
    where
        F: FnMut(&mut World, EntityId) -> anyhow::Result<()> + 'static,
    {
        let run = Box::new(move |w: &mut World, me: EntityId| f(w, me).map(|()| EventFlow::Finished));
        self.entity_mut(id)?.attach(run, true);
        Ok(())
    }

    /// Run an entity's attached events in attachment order. One-shot events
    /// and events returning [`EventFlow::Finished`] are dropped afterwards;
    /// events attached while running are kept for the next frame.
    pub fn run_entity_events(&mut self, id: EntityId) -> anyhow::Result<()> {
        let entity = self.entity_mut(id)?;
        if entity.events.is_empty() {
            return Ok(());
        }
        let mut pending = std::mem::take(&mut entity.events).into_iter();
        let mut kept: Vec<AttachedEvent> = Vec::new();
        let mut result = Ok(());
        for mut event in pending.by_ref() {
            match (event.run)(self, id) {
                Ok(EventFlow::Continue) if !event.once => kept.push(event),
                Ok(_) => {}
                Err(e) => {
                    kept.push(event);
                    result = Err(e);
                    break;
                }
            }
        }
        kept.extend(pending);
        let entity = self.entity_mut(id)?;
        kept.append(&mut entity.events);
        entity.events = kept;
        result
    }

    /// Run every live free event once, in registration order. Events that
    /// return [`EventFlow::Finished`] are discarded.
    pub fn run_free_events(&mut self) -> anyhow::Result<()> {
        let mut i = 0;
        while i < self.events.len() {
            let id = self.events[i].id;
            let taken = self.events[i].run.take();
            i += 1;
            let Some(mut run) = taken else {
                continue;
            };
            let result = run(self);
            if let Some(slot) = self.events.iter_mut().find(|s| s.id == id) {
                slot.run = Some(run);
            }
            if result? == EventFlow::Finished {
                self.discard(id);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities)
            .field("events", &self.events.len())
            .field("pending", &self.pending_count())
            .field("focus", &self.focus)
            .field("trash", &self.trash.len())
            .field("frame", &self.frame)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;

    fn world() -> World {
        World::new(TileGrid::filled(16, 16, Tile::HOLLOW))
    }

    // -- 1. Staging is deferred ---------------------------------------------

    #[test]
    fn add_becomes_live_at_flush() {
        let mut w = world();
        let id = w.add_entity(Entity::scenery("a", 0.0, 0.0, 1.0, 1.0));
        assert!(!w.is_live(id));
        assert_eq!(w.pending_count(), 1);

        let report = w.flush();
        assert_eq!(report.added_entities, 1);
        assert!(w.is_live(id));
        assert_eq!(w.entity(id).unwrap().id(), id);
    }

    #[test]
    fn discard_tears_down_now_removes_later() {
        let mut w = world();
        let torn = Rc::new(Cell::new(false));
        let flag = Rc::clone(&torn);
        let id = w.add_entity(
            Entity::scenery("a", 0.0, 0.0, 1.0, 1.0).on_teardown(move |_| flag.set(true)),
        );
        w.flush();

        w.discard(id);
        assert!(torn.get(), "teardown runs synchronously");
        assert!(w.is_live(id), "structural removal waits for flush");

        let report = w.flush();
        assert_eq!(report.removed, 1);
        assert!(!w.is_live(id));
        assert_eq!(w.trash(), &[Handle::Entity(id)]);
    }

    // -- 2. Idempotence and unknown handles ---------------------------------

    #[test]
    fn double_discard_trashed_once() {
        let mut w = world();
        let id = w.add_entity(Entity::scenery("a", 0.0, 0.0, 1.0, 1.0));
        w.flush();
        w.discard(id);
        w.discard(id);
        w.flush();
        assert_eq!(w.trash().len(), 1);
    }

    #[test]
    fn unknown_and_stale_discards_are_noops() {
        let mut w = world();
        w.discard(EntityId::new(99, 0));
        w.discard(EventId(7));
        let id = w.add_entity(Entity::scenery("a", 0.0, 0.0, 1.0, 1.0));
        w.flush();
        w.discard(id);
        w.flush();
        w.discard(id);
        let report = w.flush();
        assert!(report.is_empty());
        assert_eq!(w.trash().len(), 1);
    }

    #[test]
    fn pending_add_discarded_is_cancelled() {
        let mut w = world();
        let id = w.add_entity(Entity::scenery("a", 0.0, 0.0, 1.0, 1.0));
        w.discard(id);
        let report = w.flush();
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.added_entities, 0);
        assert!(!w.is_live(id));
        assert_eq!(w.entity_count(), 0);
    }

    // -- 3. Trash overflow --------------------------------------------------

    #[test]
    fn trash_clears_past_capacity() {
        let mut w = world().with_trash_capacity(3);
        let ids: Vec<_> = (0..4)
            .map(|i| w.add_entity(Entity::scenery("a", i as f32, 0.0, 1.0, 1.0)))
            .collect();
        w.flush();
        for &id in &ids[..3] {
            w.discard(id);
        }
        assert!(!w.flush().trash_cleared);
        assert_eq!(w.trash().len(), 3);

        w.discard(ids[3]);
        assert!(w.flush().trash_cleared);
        assert!(w.trash().is_empty());
    }

    // -- 4. Z-order ---------------------------------------------------------

    #[test]
    fn stable_sort_by_z_after_add() {
        let mut w = world();
        let a = w.add_entity(Entity::scenery("a", 0.0, 0.0, 1.0, 1.0).with_z(1));
        let b = w.add_entity(Entity::scenery("b", 0.0, 0.0, 1.0, 1.0).with_z(0));
        let c = w.add_entity(Entity::scenery("c", 0.0, 0.0, 1.0, 1.0).with_z(1));
        let d = w.add_entity(Entity::scenery("d", 0.0, 0.0, 1.0, 1.0).with_z(0));
        assert!(w.flush().resorted);
        assert_eq!(w.entity_ids(), vec![b, d, a, c]);

        // Discards alone do not re-sort.
        w.discard(d);
        assert!(!w.flush().resorted);
        assert_eq!(w.entity_ids(), vec![b, a, c]);
        assert_eq!(w.entity(c).unwrap().name, "c");
    }

    // -- 5. Events ----------------------------------------------------------

    #[test]
    fn free_events_run_in_order_and_self_unregister() {
        let mut w = world();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        w.add_event(move |_| {
            l1.borrow_mut().push("first");
            Ok(EventFlow::Finished)
        });
        let l2 = Rc::clone(&log);
        w.add_event(move |_| {
            l2.borrow_mut().push("second");
            Ok(EventFlow::Continue)
        });
        w.flush();

        w.run_free_events().unwrap();
        w.flush();
        w.run_free_events().unwrap();
        assert_eq!(*log.borrow(), vec!["first", "second", "second"]);
        assert_eq!(w.event_count(), 1);
    }

    #[test]
    fn event_added_from_hook_is_staged() {
        let mut w = world();
        w.add_event(|world| {
            world.add_entity(Entity::scenery("spawned", 0.0, 0.0, 1.0, 1.0));
            Ok(EventFlow::Finished)
        });
        w.flush();
        w.run_free_events().unwrap();
        assert_eq!(w.entity_count(), 0);
        w.flush();
        assert_eq!(w.entity_count(), 1);
        assert_eq!(w.event_count(), 0);
    }

    #[test]
    fn once_events_run_once_persistent_until_finished() {
        let mut w = world();
        let count = Rc::new(Cell::new(0));
        let (c1, c2) = (Rc::clone(&count), Rc::clone(&count));
        let id = w.add_entity(
            Entity::movable("m", 0.0, 0.0, 1.0, 1.0)
                .with_once(move |_, _| {
                    c1.set(c1.get() + 100);
                    Ok(())
                })
                .with_event(move |_, _| {
                    c2.set(c2.get() + 1);
                    Ok(if c2.get() >= 103 {
                        EventFlow::Finished
                    } else {
                        EventFlow::Continue
                    })
                }),
        );
        w.flush();
        for _ in 0..5 {
            w.run_entity_events(id).unwrap();
        }
        assert_eq!(count.get(), 103);
        assert_eq!(w.entity(id).unwrap().event_count(), 0);
    }

    // -- 6. Tiles and overlaps ----------------------------------------------

    #[test]
    fn scan_reports_distinct_non_hollow_codes() {
        let mut w = world();
        w.tiles_mut().set(1, 0, Tile::LETHAL).unwrap();
        w.tiles_mut().set(2, 0, Tile::LETHAL).unwrap();
        w.tiles_mut().set(2, 1, Tile::trigger(0).unwrap()).unwrap();
        let id = w.add_entity(Entity::movable("m", 0.0, 0.0, 3.0, 2.0));
        w.flush();

        let tiles = w.scan_tiles(id).unwrap();
        assert_eq!(tiles, vec![Tile::LETHAL, Tile::trigger(0).unwrap()]);
        assert_eq!(w.entity(id).unwrap().occupied_cells().len(), 6);
    }

    #[test]
    fn scan_of_huge_or_broken_rect_stays_in_grid() {
        let mut w = world();
        w.tiles_mut().set(15, 15, Tile::GOAL).unwrap();
        let huge = w.add_entity(Entity::movable("huge", -1e30, -1e30, 3e30, 3e30));
        let broken = w.add_entity(Entity::movable("broken", f32::NAN, 0.0, 1.0, 1.0));
        w.flush();

        assert_eq!(w.scan_tiles(huge).unwrap(), vec![Tile::GOAL]);
        assert_eq!(w.entity(huge).unwrap().occupied_cells().len(), 256);
        assert!(w.scan_tiles(broken).unwrap().is_empty());
    }

    #[test]
    fn trigger_pass_dispatches_tiles_and_overlaps() {
        let mut w = world();
        w.tiles_mut().set(0, 0, Tile::GOAL).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (s1, s2) = (Rc::clone(&seen), Rc::clone(&seen));
        let other = w.add_entity(Entity::scenery("rock", 0.5, 0.5, 1.0, 1.0));
        let id = w.add_entity(
            Entity::movable("m", 0.0, 0.0, 1.0, 1.0)
                .on_tile(move |_, _, t| {
                    s1.borrow_mut().push(format!("{t:?}"));
                    Ok(())
                })
                .on_overlap(move |_, _, o| {
                    s2.borrow_mut().push(format!("{o}"));
                    Ok(())
                }),
        );
        w.flush();
        w.trigger_pass(id).unwrap();
        assert_eq!(*seen.borrow(), vec!["Tile::GOAL".to_owned(), other.to_string()]);
    }

    #[test]
    fn non_triggerable_skips_scan() {
        let mut w = world();
        w.tiles_mut().set(0, 0, Tile::LETHAL).unwrap();
        let id = w.add_entity(Entity::movable("m", 0.0, 0.0, 1.0, 1.0).non_triggerable());
        w.flush();
        assert!(w.trigger_pass(id).unwrap().is_empty());
        assert!(w.entity(id).unwrap().occupied_cells().is_empty());
    }

    #[test]
    fn pristine_lookup_survives_painting() {
        let mut w = world();
        w.set_tile(3.5, 2.2, Tile::SOLID).unwrap();
        assert_eq!(w.tile_at(3.9, 2.0), Some(Tile::SOLID));
        assert_eq!(w.pristine_tile_at(3.0, 2.0), Some(Tile::HOLLOW));
        w.revert_tile(3.0, 2.0);
        assert_eq!(w.tile_at(3.0, 2.0), Some(Tile::HOLLOW));
    }

    // -- 7. Life state ------------------------------------------------------

    #[test]
    fn death_hook_fires_once() {
        let mut w = world();
        let deaths = Rc::new(Cell::new(0));
        let d = Rc::clone(&deaths);
        let id = w.add_entity(
            Entity::controllable("hero", 0.0, 0.0, 1.0, 1.0, 0)
                .with_health(2)
                .on_death(move |_, _| {
                    d.set(d.get() + 1);
                    Ok(())
                }),
        );
        w.flush();
        w.hit(id, -1).unwrap();
        assert_eq!(deaths.get(), 0);
        w.hit(id, -1).unwrap();
        w.hit(id, -1).unwrap();
        w.kill(id).unwrap();
        assert_eq!(deaths.get(), 1);
        assert_eq!(w.entity(id).unwrap().pilot().unwrap().life, LifeState::Dead);
    }

    #[test]
    fn life_ops_require_controllable() {
        let mut w = world();
        let id = w.add_entity(Entity::movable("m", 0.0, 0.0, 1.0, 1.0));
        w.flush();
        let err = w.finish(id).unwrap_err();
        assert!(matches!(err, CoreError::MissingCapability { .. }));
    }

    // -- 8. Focus and reset -------------------------------------------------

    #[test]
    fn focus_pruned_when_entity_removed() {
        let mut w = world();
        let id = w.add_entity(Entity::movable("m", 0.0, 0.0, 1.0, 1.0));
        w.add_focus(id);
        w.flush();
        assert_eq!(w.focus(), &[id]);
        w.discard(id);
        w.flush();
        assert!(w.focus().is_empty());
    }

    #[test]
    fn reset_restores_tiles_and_ids() {
        let mut w = world();
        let first = w.add_entity(Entity::scenery("a", 0.0, 0.0, 1.0, 1.0));
        w.flush();
        w.set_tile(0.0, 0.0, Tile::SOLID).unwrap();

        w.reset(9);
        assert_eq!(w.entity_count(), 0);
        assert_eq!(w.tile_at(0.0, 0.0), Some(Tile::HOLLOW));
        assert_eq!(w.add_entity(Entity::scenery("a", 0.0, 0.0, 1.0, 1.0)), first);
    }
}
