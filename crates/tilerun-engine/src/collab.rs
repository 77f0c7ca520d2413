//! Collaborator contracts: stage content, rendering, audio.
//!
//! The session calls out through these narrow traits and never looks inside
//! them. Headless no-op implementations are provided for tests and tools.

use tilerun_core::tile::TileGrid;
use tilerun_core::world::World;

use crate::camera::CameraFrame;
use crate::state::GameState;
use crate::Fault;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Level content.
///
/// `init` runs once when the session starts and provides the tile grid.
/// `build` runs on start and on every restart against a freshly reset world;
/// it must add the stage's entities, events and focus list.
pub trait Stage {
    /// Stage identity, stored in replays.
    fn name(&self) -> &str;

    /// Acquire stage resources and produce the tile grid.
    fn init(&mut self) -> anyhow::Result<TileGrid>;

    /// Populate the world.
    fn build(&mut self, world: &mut World) -> anyhow::Result<()>;

    /// Per-frame hook, run after the camera update.
    fn extra(&mut self, _world: &mut World) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when the stage is completed.
    fn on_complete(&mut self, _world: &mut World) -> anyhow::Result<()> {
        Ok(())
    }

    /// Evaluated when the alive tally reaches zero. A checkpoint-safe death
    /// resumes from the checkpoint instead of restarting from scratch.
    fn is_checkpoint_safe(&self, _world: &World) -> bool {
        false
    }

    fn difficulty(&self) -> &str {
        "Normal"
    }

    /// Free-form data saved with replays.
    fn meta(&self) -> String {
        String::new()
    }

    /// Receives the metadata of a replay before its first build.
    fn set_meta(&mut self, _meta: &str) {}

    /// Release stage resources. Called exactly once, on session teardown.
    fn dispose(&mut self) {}
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// What the HUD needs to know about the session.
#[derive(Debug, Clone, PartialEq)]
pub struct HudInfo {
    pub state: GameState,
    pub elapsed_ms: u64,
    pub replaying: bool,
    /// "Press back to return" overlay.
    pub replay_help: bool,
    /// Last death was checkpoint-safe.
    pub checkpoint: bool,
}

/// Draws frames. Errors are pipeline faults.
pub trait Renderer {
    /// Draw the world in world space with the camera transform applied.
    fn draw_world(&mut self, world: &World, camera: &CameraFrame) -> anyhow::Result<()>;

    /// Draw HUD elements in screen space, after the camera rotation was un-applied.
    fn draw_hud(&mut self, hud: &HudInfo) -> anyhow::Result<()>;

    /// Draw the pause screen. Replaces the whole frame while paused.
    fn draw_pause(&mut self, hud: &HudInfo) -> anyhow::Result<()>;

    /// Draw the crash screen. Must not fail.
    fn draw_crash(&mut self, fault: &Fault);
}

/// Renderer that draws nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn draw_world(&mut self, _world: &World, _camera: &CameraFrame) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw_hud(&mut self, _hud: &HudInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw_pause(&mut self, _hud: &HudInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw_crash(&mut self, _fault: &Fault) {}
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Session-level audio control.
pub trait Audio {
    fn set_volume(&mut self, volume: f32);

    fn stop_music(&mut self);

    /// Release audio resources. Called exactly once, on session teardown.
    fn shutdown(&mut self);
}

/// Audio sink that plays nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAudio;

impl Audio for NullAudio {
    fn set_volume(&mut self, _volume: f32) {}

    fn stop_music(&mut self) {}

    fn shutdown(&mut self) {}
}
