//! Headless demo -- play a small stage from a script, save the replay, then
//! play it back and check it reaches the same place.
//!
//! Run with:
//!   cargo run --example headless_run -p tilerun-engine
//!
//! Set `RUST_LOG=debug` to see registry flushes and camera mode switches.

use std::time::Duration;

use anyhow::Context;
use tilerun_core::prelude::*;
use tilerun_engine::prelude::*;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

const LAYOUT: [&str; 6] = [
    "............",
    "............",
    "......##....",
    "............",
    ".S.......G..",
    "############",
];

/// A short run: walk right under an overhang, jump once, reach the goal.
struct Hop;

impl Stage for Hop {
    fn name(&self) -> &str {
        "hop"
    }

    fn init(&mut self) -> anyhow::Result<TileGrid> {
        let rows: Vec<Vec<u8>> = LAYOUT
            .iter()
            .map(|row| {
                row.bytes()
                    .map(|c| match c {
                        b'#' => Tile::SOLID.0,
                        b'S' => Tile::START.0,
                        b'G' => Tile::GOAL.0,
                        _ => Tile::HOLLOW.0,
                    })
                    .collect()
            })
            .collect();
        Ok(TileGrid::from_rows(&rows)?)
    }

    fn build(&mut self, world: &mut World) -> anyhow::Result<()> {
        let (x, y) = world.tiles().start_position().context("layout has no start")?;
        let hero = world.add_entity(
            Entity::controllable("hero", x as f32, y as f32, 1.0, 1.0, 0)
                .with_controls(Kinematics::new(0.5, 0.25, 1.5, 2.0)),
        );
        world.add_focus(hero);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Text renderer
// ---------------------------------------------------------------------------

/// Prints the grid with the hero overlaid whenever the state changes.
#[derive(Default)]
struct TextRenderer {
    last_state: Option<GameState>,
}

impl Renderer for TextRenderer {
    fn draw_world(&mut self, world: &World, camera: &CameraFrame) -> anyhow::Result<()> {
        tracing::trace!(tx = camera.tx, ty = camera.ty, zoom = camera.zoom, "camera");
        let Some(hero) = world.entities().find(|e| e.is_controllable()) else {
            return Ok(());
        };
        let (hx, hy) = (hero.pos.x.round() as usize, hero.pos.y.round() as usize);
        let mut out = String::new();
        for (y, row) in world.tiles().to_string().lines().enumerate() {
            for (x, c) in row.chars().enumerate() {
                out.push(if (x, y) == (hx, hy) { '@' } else { c });
            }
            out.push('\n');
        }
        tracing::debug!("\n{out}");
        Ok(())
    }

    fn draw_hud(&mut self, hud: &HudInfo) -> anyhow::Result<()> {
        if self.last_state != Some(hud.state) {
            println!("[{:>6} ms] {}", hud.elapsed_ms, hud.state);
            self.last_state = Some(hud.state);
        }
        Ok(())
    }

    fn draw_pause(&mut self, _hud: &HudInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw_crash(&mut self, fault: &Fault) {
        eprintln!("crashed: {fault}");
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn script() -> Vec<ScriptedFrame> {
    let right = Buttons {
        right: true,
        ..Buttons::NEUTRAL
    };
    let jump = Buttons {
        special1: true,
        ..right
    };
    let mut frames = vec![ScriptedFrame::player(right); 6];
    frames.push(ScriptedFrame::player(jump));
    frames.extend(vec![ScriptedFrame::player(right); 40]);
    frames
}

fn run_until_done(session: &mut Session, input: &mut ScriptedInput, max_frames: usize) -> GameState {
    let mut renderer = TextRenderer::default();
    for _ in 0..max_frames {
        let report = session.frame(Duration::from_millis(16), input, &mut renderer);
        if report.state.is_terminal() || report.contains(&SessionEvent::Exited) {
            break;
        }
    }
    session.state()
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store = MemoryReplayStore::new();
    let mut live = Session::builder(Hop).store(store.clone()).build()?;
    let outcome = run_until_done(&mut live, &mut ScriptedInput::new(script()), 200);
    println!("live run finished: {outcome} ({} replay(s) auto-saved)", store.len());
    let replay = live.current_replay("demo");
    let live_end = live
        .world()
        .entities()
        .find(|e| e.is_controllable())
        .map(|e| e.pos);
    drop(live);

    let mut playback = Session::builder(Hop).replay(replay).build()?;
    let replayed = run_until_done(&mut playback, &mut ScriptedInput::default(), 200);
    let replay_end = playback
        .world()
        .entities()
        .find(|e| e.is_controllable())
        .map(|e| e.pos);
    println!("playback finished: {replayed}");

    anyhow::ensure!(live_end == replay_end, "playback drifted: {live_end:?} vs {replay_end:?}");
    println!("hero ended at {replay_end:?} in both runs");
    Ok(())
}
