//! The per-frame update pipeline.
//!
//! Phases run in a fixed order every unpaused frame:
//!
//! 1. clock
//! 2. registry flush
//! 3. non-controllable entities in z order (behaviour, trigger pass, events)
//! 4. camera
//! 5. stage extra hook
//! 6. controllable entities (input, controls, trigger pass, tile rules, events)
//! 7. alive tally and state transitions
//! 8. free events
//! 9. determinism checkpoint
//! 10. session keys (retry, back, completion prompt)
//!
//! Everything the simulation reads is derived from the recorded input, the
//! world RNG and the frame counter, so playing back a replay's input yields
//! the same trajectory.

use std::time::{Duration, Instant};

use tilerun_core::entity::EntityId;
use tilerun_core::geometry::Rect;
use tilerun_core::input::Buttons;
use tilerun_core::object::{LifeState, PilotSource};
use tilerun_core::tile::Tile;
use tracing::info;

use crate::input::{CompletionChoice, InputSource, SessionKeys};
use crate::replay::ReplayCheckpoint;
use crate::session::{
    FrameDiagnostics, FrameReport, Session, SessionEvent, AUTO_SAVE_PLAYER, DEFAULT_PLAYER,
};
use crate::snapshot::FrameSnapshot;
use crate::state::GameState;

/// Result of the controllable phase.
#[derive(Debug, Default)]
struct Tally {
    /// Non-ghost controllables that are not dead.
    alive: usize,
    finished: bool,
    /// Whether this frame's input was recorded or consumed.
    input_frame: bool,
}

/// Times pipeline phases into a [`FrameDiagnostics`].
struct PhaseTimer {
    start: Instant,
    mark: Instant,
    diagnostics: FrameDiagnostics,
}

impl PhaseTimer {
    fn start() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            mark: now,
            diagnostics: FrameDiagnostics::default(),
        }
    }

    fn lap(&mut self, phase: &'static str) {
        let now = Instant::now();
        self.diagnostics.phase_times.push((phase, now - self.mark));
        self.mark = now;
    }

    fn finish(mut self) -> FrameDiagnostics {
        self.diagnostics.total_time = self.start.elapsed();
        self.diagnostics
    }
}

impl Session {
    pub(crate) fn update(
        &mut self,
        delta: Duration,
        keys: &SessionKeys,
        input: &mut dyn InputSource,
        report: &mut FrameReport,
    ) -> anyhow::Result<()> {
        let mut timer = PhaseTimer::start();

        self.tick_clock(delta);
        timer.lap("clock");

        self.world.flush();
        timer.lap("flush");

        self.update_scenery()?;
        timer.lap("scenery");

        self.update_camera();
        timer.lap("camera");

        self.stage.extra(&mut self.world)?;
        timer.lap("extra");

        let tally = self.update_controllables(input)?;
        timer.lap("controllables");

        self.apply_tally(&tally, report)?;
        timer.lap("tally");

        self.world.run_free_events()?;
        timer.lap("events");

        if tally.input_frame {
            self.checkpoint_hash(report);
        }
        timer.lap("checkpoint");

        self.handle_keys(keys, report)?;
        timer.lap("keys");

        self.diagnostics = timer.finish();
        Ok(())
    }

    fn tick_clock(&mut self, delta: Duration) {
        if self.state.state() == GameState::Ongoing {
            if self.just_restarted {
                self.just_restarted = false;
            } else {
                self.elapsed += delta;
            }
        }
        let frame = self.world.frame() + 1;
        self.world.set_clock(frame, delta.as_secs_f64() * 1000.0);
    }

    /// Scenery and movable entities, in z order.
    fn update_scenery(&mut self) -> anyhow::Result<()> {
        for id in self.world.entity_ids() {
            let Some(entity) = self.world.try_entity(id) else {
                continue;
            };
            if entity.is_controllable() {
                continue;
            }
            if entity.is_movable() {
                self.world.run_behavior(id)?;
                self.world.trigger_pass(id)?;
                let entity = self.world.entity_mut(id)?;
                entity.update_facing();
                entity.commit_position();
            }
            self.world.run_entity_events(id)?;
        }
        Ok(())
    }

    fn update_camera(&mut self) {
        self.camera.capture_previous();
        let focus: Vec<Rect> = self
            .world
            .focus()
            .iter()
            .filter_map(|&id| self.world.try_entity(id))
            .map(|e| e.rect())
            .collect();
        let tiles = self.world.tiles();
        let (world_w, world_h) = (tiles.width() as f32, tiles.height() as f32);
        self.camera.update(&focus, world_w, world_h);
    }

    fn update_controllables(&mut self, input: &mut dyn InputSource) -> anyhow::Result<Tally> {
        let ongoing = self.state.state() == GameState::Ongoing;
        let mut tally = Tally {
            input_frame: ongoing,
            ..Tally::default()
        };

        for id in self.world.entity_ids() {
            match self.world.try_entity(id) {
                Some(entity) if entity.is_controllable() => {}
                _ => continue,
            }
            {
                let entity = self.world.entity_mut(id)?;
                entity.update_facing();
                entity.commit_position();
            }

            let buttons = self.resolve_input(id, ongoing, input)?;
            if buttons.suicide {
                self.world.kill(id)?;
            } else {
                self.world.run_controls(id, &buttons)?;
            }

            let tiles = self.world.trigger_pass(id)?;
            self.apply_tile_rules(id, &tiles)?;
            self.world.run_entity_events(id)?;

            if let Some(pilot) = self.world.try_entity(id).and_then(|e| e.pilot()) {
                if !pilot.is_ghost() && pilot.life != LifeState::Dead {
                    tally.alive += 1;
                    if pilot.life == LifeState::Finish {
                        tally.finished = true;
                    }
                }
            }
        }

        if ongoing {
            self.input_frames += 1;
        }
        Ok(tally)
    }

    /// Pick the input an entity acts on this frame.
    ///
    /// Player slots read live input (and record it) or consume the replay
    /// queue, but only while ONGOING, so terminal frames neither record nor
    /// consume. Ghosts always read their own track. Anything that is not
    /// alive acts on neutral input.
    fn resolve_input(
        &mut self,
        id: EntityId,
        ongoing: bool,
        input: &mut dyn InputSource,
    ) -> anyhow::Result<Buttons> {
        let entity = self.world.entity_mut(id)?;
        let Some(pilot) = entity.pilot_mut() else {
            return Ok(Buttons::NEUTRAL);
        };
        let alive = pilot.life == LifeState::Alive;
        let buttons = match &mut pilot.source {
            PilotSource::Ghost(track) => track.next_frame(),
            PilotSource::Player { slot } => {
                let slot = *slot;
                if !ongoing {
                    Buttons::NEUTRAL
                } else if self.replaying {
                    self.queues.next(slot)
                } else {
                    let live = if alive {
                        input.buttons(slot)
                    } else {
                        Buttons::NEUTRAL
                    };
                    self.queues.record(slot, live);
                    live
                }
            }
        };
        Ok(if alive { buttons } else { Buttons::NEUTRAL })
    }

    fn apply_tile_rules(&mut self, id: EntityId, tiles: &[Tile]) -> anyhow::Result<()> {
        let alive = self
            .world
            .entity(id)?
            .pilot()
            .is_some_and(|p| p.life == LifeState::Alive);
        if !alive {
            return Ok(());
        }
        if tiles.contains(&Tile::LETHAL) {
            self.world.hit(id, self.config.lethal_damage)?;
        }
        if tiles.contains(&Tile::GOAL) {
            self.world.finish(id)?;
        }
        Ok(())
    }

    /// Reaching the goal wins over dying in the same frame.
    fn apply_tally(&mut self, tally: &Tally, report: &mut FrameReport) -> anyhow::Result<()> {
        if self.state.state() != GameState::Ongoing {
            return Ok(());
        }
        if tally.finished {
            if self.state.complete() {
                self.stage.on_complete(&mut self.world)?;
                report.push(SessionEvent::StageComplete);
            }
        } else if tally.alive == 0 && self.state.end() {
            self.checkpoint = self.stage.is_checkpoint_safe(&self.world);
            report.push(SessionEvent::Ended {
                checkpoint: self.checkpoint,
            });
            if !self.checkpoint {
                self.save_replay(AUTO_SAVE_PLAYER, report);
            }
        }
        Ok(())
    }

    fn checkpoint_hash(&mut self, report: &mut FrameReport) {
        let interval = self.config.checkpoint_interval;
        if interval == 0 || self.input_frames % interval != 0 {
            return;
        }
        let frame = self.input_frames;
        if self.replaying {
            if !self.verifier.has_checkpoint(frame) {
                return;
            }
            let hash = FrameSnapshot::capture(&self.world, self.state.state()).state_hash();
            if let Some(divergence) = self.verifier.verify(frame, &hash) {
                report.push(SessionEvent::ReplayDiverged(divergence));
            }
        } else {
            let state_hash = FrameSnapshot::capture(&self.world, self.state.state()).state_hash();
            self.recorded_checkpoints
                .push(ReplayCheckpoint { frame, state_hash });
        }
    }

    fn handle_keys(&mut self, keys: &SessionKeys, report: &mut FrameReport) -> anyhow::Result<()> {
        if self.replay_help && keys.back {
            self.exit_handle().request();
            return Ok(());
        }

        match self.state.state() {
            GameState::Ended => {
                let resume_playback =
                    self.checkpoint && self.replaying && !self.queues.playback_ended();
                if (keys.retry && !self.replaying) || resume_playback {
                    self.rebuild(report)?;
                } else if keys.back {
                    if !self.replay_saved() {
                        self.save_replay(AUTO_SAVE_PLAYER, report);
                    }
                    self.exit_handle().request();
                }
            }
            GameState::Completed if self.replaying => {
                self.replay_help = true;
            }
            GameState::Completed => match &keys.completion {
                Some(CompletionChoice::Retry { name }) => {
                    self.save_replay(player_name(name), report);
                    self.rebuild(report)?;
                }
                Some(CompletionChoice::Exit { name }) => {
                    self.save_replay(player_name(name), report);
                    info!(stage = self.stage.name(), "leaving completed stage");
                    self.exit_handle().request();
                }
                None => {}
            },
            GameState::Ongoing | GameState::Paused => {}
        }
        Ok(())
    }
}

fn player_name(name: &str) -> &str {
    let name = name.trim();
    if name.is_empty() {
        DEFAULT_PLAYER
    } else {
        name
    }
}
