//! The entity model.
//!
//! Every simulation object is an [`Entity`]: a positioned, sized, z-ordered
//! record with rendering hints and attached events. What else it can do is
//! decided by its [`Kind`], a closed tagged variant:
//!
//! - [`Kind::Scenery`]: drawn and ordered, never moved by the pipeline.
//! - [`Kind::Movable`]: tracks its previous position, runs an optional
//!   behaviour each frame, and raises tile and overlap callbacks while
//!   triggerable.
//! - [`Kind::Controllable`]: a movable entity driven by one input source,
//!   with health and a life state.
//!
//! The update pipeline branches on the variant instead of on runtime type
//! identity.

use std::collections::VecDeque;
use std::fmt;

use crate::entity::EntityId;
use crate::geometry::{Direction, Rect, Vec2};
use crate::hooks::{
    Controls, EntityEventFn, EntityHookFn, EventFlow, OverlapFn, TeardownFn, TileFn,
};
use crate::input::Buttons;
use crate::tile::Tile;
use crate::world::World;

// ---------------------------------------------------------------------------
// RenderHints
// ---------------------------------------------------------------------------

/// Values only the render collaborator interprets.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderHints {
    pub rotation: f32,
    pub scale: f32,
    pub alpha: f32,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl Default for RenderHints {
    fn default() -> Self {
        Self {
            rotation: 0.0,
            scale: 1.0,
            alpha: 1.0,
            flip_x: false,
            flip_y: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Movable / controllable capability records
// ---------------------------------------------------------------------------

/// How the pipeline derives [`Motion::facing`] from movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Content sets the facing itself.
    Manual,
    /// Only horizontal directions are taken; vertical movement keeps the old facing.
    DoubleFaced,
    /// All eight directions.
    MultiFaced,
}

/// Life state of a controllable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LifeState {
    Alive,
    Dead,
    Finish,
}

/// State shared by movable and controllable entities.
pub struct Motion {
    pub prev: Vec2,
    /// Gates the per-frame tile and overlap scan.
    pub triggerable: bool,
    pub facing: Direction,
    pub facing_mode: FacingMode,
    pub(crate) behavior: Option<EntityHookFn>,
    pub(crate) tile_handlers: Vec<TileFn>,
    pub(crate) overlap_handlers: Vec<OverlapFn>,
}

impl Motion {
    fn at(pos: Vec2) -> Self {
        Self {
            prev: pos,
            triggerable: true,
            facing: Direction::E,
            facing_mode: FacingMode::DoubleFaced,
            behavior: None,
            tile_handlers: Vec::new(),
            overlap_handlers: Vec::new(),
        }
    }
}

/// A pre-recorded input sequence driving a ghost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GhostTrack {
    frames: VecDeque<Buttons>,
}

impl GhostTrack {
    pub fn new(frames: impl IntoIterator<Item = Buttons>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// Next snapshot, or the neutral frame once the track is exhausted.
    pub fn next_frame(&mut self) -> Buttons {
        self.frames.pop_front().unwrap_or(Buttons::NEUTRAL)
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

/// Where a controllable entity's input comes from, before the session's
/// replay mode is taken into account.
#[derive(Debug, Clone, PartialEq)]
pub enum PilotSource {
    /// Driven by the player on controller `slot` (or that slot's replay queue).
    Player { slot: usize },
    /// Driven by its own recording; excluded from the win/loss tally.
    Ghost(GhostTrack),
}

/// State specific to controllable entities.
pub struct Pilot {
    pub health: i32,
    pub life: LifeState,
    pub source: PilotSource,
    pub(crate) controls: Option<Box<dyn Controls>>,
    pub(crate) on_death: Option<EntityHookFn>,
}

impl Pilot {
    pub fn is_ghost(&self) -> bool {
        matches!(self.source, PilotSource::Ghost(_))
    }

    /// Controller slot for player-driven entities.
    pub fn slot(&self) -> Option<usize> {
        match self.source {
            PilotSource::Player { slot } => Some(slot),
            PilotSource::Ghost(_) => None,
        }
    }
}

/// The capability variant of an entity.
pub enum Kind {
    Scenery,
    Movable(Motion),
    Controllable { motion: Motion, pilot: Pilot },
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

pub(crate) struct AttachedEvent {
    pub(crate) run: EntityEventFn,
    pub(crate) once: bool,
}

/// A positioned, drawable simulation object.
pub struct Entity {
    pub(crate) id: EntityId,
    pub name: String,
    pub pos: Vec2,
    pub width: f32,
    pub height: f32,
    pub z_index: i32,
    pub visible: bool,
    pub render: RenderHints,
    pub kind: Kind,
    occupied: Option<Vec<(i64, i64)>>,
    pub(crate) events: Vec<AttachedEvent>,
    pub(crate) teardown: Option<TeardownFn>,
}

impl Entity {
    /// Placeholder id carried until the entity is added to a world.
    pub const UNASSIGNED: EntityId = EntityId::new(u32::MAX, u32::MAX);

    fn with_kind(name: &str, x: f32, y: f32, width: f32, height: f32, kind: Kind) -> Self {
        Self {
            id: Self::UNASSIGNED,
            name: name.to_owned(),
            pos: Vec2::new(x, y),
            width,
            height,
            z_index: 0,
            visible: true,
            render: RenderHints::default(),
            kind,
            occupied: None,
            events: Vec::new(),
            teardown: None,
        }
    }

    /// A static, drawable object.
    pub fn scenery(name: &str, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::with_kind(name, x, y, width, height, Kind::Scenery)
    }

    /// A movable, triggerable object with no controller.
    pub fn movable(name: &str, x: f32, y: f32, width: f32, height: f32) -> Self {
        let motion = Motion::at(Vec2::new(x, y));
        Self::with_kind(name, x, y, width, height, Kind::Movable(motion))
    }

    /// A player-driven entity reading controller `slot`, with one hit point.
    pub fn controllable(name: &str, x: f32, y: f32, width: f32, height: f32, slot: usize) -> Self {
        Self::piloted(name, x, y, width, height, PilotSource::Player { slot })
    }

    /// An entity replaying its own pre-recorded input.
    pub fn ghost(name: &str, x: f32, y: f32, width: f32, height: f32, track: GhostTrack) -> Self {
        Self::piloted(name, x, y, width, height, PilotSource::Ghost(track))
    }

    fn piloted(name: &str, x: f32, y: f32, width: f32, height: f32, source: PilotSource) -> Self {
        let motion = Motion::at(Vec2::new(x, y));
        let pilot = Pilot {
            health: 1,
            life: LifeState::Alive,
            source,
            controls: None,
            on_death: None,
        };
        Self::with_kind(name, x, y, width, height, Kind::Controllable { motion, pilot })
    }

    // -- builders -----------------------------------------------------------

    pub fn with_z(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn with_health(mut self, health: i32) -> Self {
        if let Some(pilot) = self.pilot_mut() {
            pilot.health = health;
        }
        self
    }

    pub fn with_facing_mode(mut self, mode: FacingMode) -> Self {
        if let Some(motion) = self.motion_mut() {
            motion.facing_mode = mode;
        }
        self
    }

    /// Skip the tile and overlap scan for this entity.
    pub fn non_triggerable(mut self) -> Self {
        if let Some(motion) = self.motion_mut() {
            motion.triggerable = false;
        }
        self
    }

    pub fn with_controls(mut self, controls: impl Controls + 'static) -> Self {
        if let Some(pilot) = self.pilot_mut() {
            pilot.controls = Some(Box::new(controls));
        }
        self
    }

    /// Movement logic run every frame for a movable entity.
    pub fn with_behavior<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut World, EntityId) -> anyhow::Result<()> + 'static,
    {
        if let Some(motion) = self.motion_mut() {
            motion.behavior = Some(Box::new(f));
        }
        self
    }

    pub fn on_tile<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut World, EntityId, Tile) -> anyhow::Result<()> + 'static,
    {
        if let Some(motion) = self.motion_mut() {
            motion.tile_handlers.push(Box::new(f));
        }
        self
    }

    pub fn on_overlap<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut World, EntityId, EntityId) -> anyhow::Result<()> + 'static,
    {
        if let Some(motion) = self.motion_mut() {
            motion.overlap_handlers.push(Box::new(f));
        }
        self
    }

    pub fn on_death<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut World, EntityId) -> anyhow::Result<()> + 'static,
    {
        if let Some(pilot) = self.pilot_mut() {
            pilot.on_death = Some(Box::new(f));
        }
        self
    }

    pub fn on_teardown<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Entity) + 'static,
    {
        self.teardown = Some(Box::new(f));
        self
    }

    /// Attach a persistent event; it runs every frame until it returns
    /// [`EventFlow::Finished`].
    pub fn with_event<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut World, EntityId) -> anyhow::Result<EventFlow> + 'static,
    {
        self.attach(Box::new(f), false);
        self
    }

    /// Attach a one-shot event, removed after its first run.
    pub fn with_once<F>(mut self, mut f: F) -> Self
    where
        F: FnMut(&mut World, EntityId) -> anyhow::Result<()> + 'static,
    {
        self.attach(
            Box::new(move |w: &mut World, me: EntityId| f(w, me).map(|()| EventFlow::Finished)),
            true,
        );
        self
    }

    pub(crate) fn attach(&mut self, run: EntityEventFn, once: bool) {
        self.events.push(AttachedEvent { run, once });
    }

    // -- accessors ----------------------------------------------------------

    /// The id assigned when the entity was added to a world.
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.pos.x, self.pos.y, self.width, self.height)
    }

    pub fn center(&self) -> Vec2 {
        self.rect().center()
    }

    pub fn is_movable(&self) -> bool {
        !matches!(self.kind, Kind::Scenery)
    }

    pub fn is_controllable(&self) -> bool {
        matches!(self.kind, Kind::Controllable { .. })
    }

    pub fn motion(&self) -> Option<&Motion> {
        match &self.kind {
            Kind::Scenery => None,
            Kind::Movable(motion) | Kind::Controllable { motion, .. } => Some(motion),
        }
    }

    pub fn motion_mut(&mut self) -> Option<&mut Motion> {
        match &mut self.kind {
            Kind::Scenery => None,
            Kind::Movable(motion) | Kind::Controllable { motion, .. } => Some(motion),
        }
    }

    pub fn pilot(&self) -> Option<&Pilot> {
        match &self.kind {
            Kind::Controllable { pilot, .. } => Some(pilot),
            _ => None,
        }
    }

    pub fn pilot_mut(&mut self) -> Option<&mut Pilot> {
        match &mut self.kind {
            Kind::Controllable { pilot, .. } => Some(pilot),
            _ => None,
        }
    }

    /// Grid cells overlapped as of the last tile scan. Empty until the first scan.
    pub fn occupied_cells(&self) -> &[(i64, i64)] {
        self.occupied.as_deref().unwrap_or(&[])
    }

    pub(crate) fn occupied_cells_mut(&mut self) -> &mut Vec<(i64, i64)> {
        let cells = self.occupied.get_or_insert_with(Vec::new);
        cells.clear();
        cells
    }

    /// Number of attached events still registered.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Derive facing from the previous-to-current centre delta.
    pub fn update_facing(&mut self) {
        let (w, h, pos) = (self.width, self.height, self.pos);
        let Some(motion) = self.motion_mut() else {
            return;
        };
        if motion.facing_mode == FacingMode::Manual {
            return;
        }
        let from = Vec2::new(motion.prev.x + w / 2.0, motion.prev.y + h / 2.0);
        let to = Vec2::new(pos.x + w / 2.0, pos.y + h / 2.0);
        if let Some(dir) = Direction::between(from, to) {
            match motion.facing_mode {
                FacingMode::DoubleFaced if dir.is_vertical() => {}
                _ => motion.facing = dir,
            }
        }
    }

    /// Remember the current position as the previous-frame position.
    pub fn commit_position(&mut self) {
        let pos = self.pos;
        if let Some(motion) = self.motion_mut() {
            motion.prev = pos;
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Scenery => "scenery",
            Kind::Movable(_) => "movable",
            Kind::Controllable { .. } => "controllable",
        };
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &kind)
            .field("pos", &self.pos)
            .field("size", &(self.width, self.height))
            .field("z_index", &self.z_index)
            .finish()
    }
}
