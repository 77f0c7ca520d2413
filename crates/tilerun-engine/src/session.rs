//! The session context object.
//!
//! A [`Session`] owns everything one play session needs: the stage, the
//! [`World`], the camera, the state machine, the replay queues and the audio
//! and replay-storage collaborators. The top-level driver creates it with
//! [`Session::builder`], calls [`Session::frame`] once per display refresh,
//! and drops it to tear everything down.
//!
//! # Example
//!
//! ```
//! use tilerun_core::prelude::*;
//! use tilerun_engine::prelude::*;
//!
//! struct Room;
//!
//! impl Stage for Room {
//!     fn name(&self) -> &str {
//!         "room"
//!     }
//!
//!     fn init(&mut self) -> anyhow::Result<TileGrid> {
//!         Ok(TileGrid::filled(64, 64, Tile::HOLLOW))
//!     }
//!
//!     fn build(&mut self, world: &mut World) -> anyhow::Result<()> {
//!         let hero = world.add_entity(Entity::controllable("hero", 8.0, 8.0, 1.0, 1.0, 0));
//!         world.add_focus(hero);
//!         Ok(())
//!     }
//! }
//!
//! let mut session = Session::builder(Room).build().unwrap();
//! let mut input = ScriptedInput::default();
//! let report = session.frame(std::time::Duration::from_millis(16), &mut input, &mut NullRenderer);
//! assert_eq!(report.state, GameState::Ongoing);
//! assert_eq!(session.world().entity_count(), 1);
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tilerun_core::world::World;
use tracing::{error, info, warn};

use crate::camera::Camera;
use crate::collab::{Audio, HudInfo, NullAudio, Renderer, Stage};
use crate::config::SessionConfig;
use crate::input::{InputSource, SessionKeys};
use crate::replay::{
    CheckpointVerifier, MemoryReplayStore, ReplayArtifact, ReplayCheckpoint, ReplayDivergence,
    ReplayHeader, ReplayOutcome, ReplayQueues, ReplayStore,
};
use crate::state::{GameState, StateMachine};
use crate::{Fault, SessionError};

/// Player label used for replays saved automatically on death.
pub const AUTO_SAVE_PLAYER: &str = "Loser";

/// Player label used when the completion prompt was answered with an empty name.
pub const DEFAULT_PLAYER: &str = "Player";

// ---------------------------------------------------------------------------
// Reports and diagnostics
// ---------------------------------------------------------------------------

/// Something the driver may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Paused,
    Resumed,
    /// The alive tally reached zero.
    Ended { checkpoint: bool },
    /// A controllable reached the goal; the driver should show the completion prompt.
    StageComplete,
    /// The stage was rebuilt and play resumed.
    Restarted,
    ReplaySaved { key: String },
    ReplayDiverged(ReplayDivergence),
    Crashed(Fault),
    Exited,
}

/// Outcome of one [`Session::frame`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// Frames since the session started, this one included.
    pub frame: u64,
    pub state: GameState,
    pub events: Vec<SessionEvent>,
}

impl FrameReport {
    pub fn contains(&self, event: &SessionEvent) -> bool {
        self.events.contains(event)
    }

    pub(crate) fn push(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}

/// Wall-clock time spent in each pipeline phase of the last simulated frame.
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    pub phase_times: Vec<(&'static str, Duration)>,
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// ExitHandle
// ---------------------------------------------------------------------------

/// Requests the end of a session from anywhere, including other threads.
///
/// The request is a one-shot message executed at the top of the session's
/// next frame.
#[derive(Debug, Clone)]
pub struct ExitHandle {
    tx: Sender<()>,
}

impl ExitHandle {
    pub fn request(&self) {
        // A full channel means an exit is already pending.
        let _ = self.tx.try_send(());
    }
}

// ---------------------------------------------------------------------------
// SessionBuilder
// ---------------------------------------------------------------------------

/// Configures and starts a [`Session`].
pub struct SessionBuilder {
    stage: Box<dyn Stage>,
    config: SessionConfig,
    audio: Box<dyn Audio>,
    store: Box<dyn ReplayStore>,
    replay: Option<ReplayArtifact>,
    on_exit: Option<Box<dyn FnMut()>>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn audio(mut self, audio: impl Audio + 'static) -> Self {
        self.audio = Box::new(audio);
        self
    }

    pub fn store(mut self, store: impl ReplayStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Play back a recorded replay instead of reading live input.
    pub fn replay(mut self, artifact: ReplayArtifact) -> Self {
        self.replay = Some(artifact);
        self
    }

    /// Handler run once when the session exits.
    pub fn on_exit(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_exit = Some(Box::new(f));
        self
    }

    /// Validate the configuration, initialise and build the stage.
    pub fn build(self) -> Result<Session, SessionError> {
        let Self {
            mut stage,
            config,
            mut audio,
            store,
            replay,
            on_exit,
        } = self;
        config.validate()?;

        let grid = stage.init().map_err(|source| SessionError::StageInit {
            stage: stage.name().to_owned(),
            source,
        })?;
        let mut world = World::new(grid)
            .with_trash_capacity(config.trash_capacity)
            .with_seed(config.rng_seed);

        let replaying = replay.is_some();
        let (queues, verifier) = match &replay {
            Some(artifact) => {
                stage.set_meta(&artifact.meta);
                (
                    artifact.queues(),
                    CheckpointVerifier::new(&artifact.checkpoints),
                )
            }
            None => (ReplayQueues::new(), CheckpointVerifier::default()),
        };

        stage
            .build(&mut world)
            .map_err(|source| SessionError::StageBuild {
                stage: stage.name().to_owned(),
                source,
            })?;

        audio.set_volume(config.master_volume);
        let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
        info!(stage = stage.name(), replaying, "session started");

        Ok(Session {
            camera: Camera::from_config(&config),
            stage,
            config,
            world,
            state: StateMachine::new(),
            audio,
            store,
            queues,
            replaying,
            recorded_checkpoints: Vec::new(),
            verifier,
            input_frames: 0,
            frame: 0,
            elapsed: Duration::ZERO,
            // The first frame's delta covers loading, not play.
            just_restarted: true,
            checkpoint: false,
            replay_saved: false,
            replay_help: false,
            ducked: false,
            crashed: None,
            exited: false,
            exit_tx,
            exit_rx,
            on_exit,
            diagnostics: FrameDiagnostics::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One play session of one stage.
pub struct Session {
    pub(crate) stage: Box<dyn Stage>,
    pub(crate) config: SessionConfig,
    pub(crate) world: World,
    pub(crate) camera: Camera,
    pub(crate) state: StateMachine,
    audio: Box<dyn Audio>,
    store: Box<dyn ReplayStore>,

    pub(crate) queues: ReplayQueues,
    pub(crate) replaying: bool,
    /// Determinism checkpoints taken while recording.
    pub(crate) recorded_checkpoints: Vec<ReplayCheckpoint>,
    /// Checkpoints of the replay being played back.
    pub(crate) verifier: CheckpointVerifier,
    /// Frames whose input was recorded or consumed.
    pub(crate) input_frames: u64,

    frame: u64,
    pub(crate) elapsed: Duration,
    pub(crate) just_restarted: bool,
    /// Whether the last death was checkpoint-safe.
    pub(crate) checkpoint: bool,
    replay_saved: bool,
    pub(crate) replay_help: bool,
    ducked: bool,
    crashed: Option<Fault>,
    exited: bool,

    exit_tx: Sender<()>,
    exit_rx: Receiver<()>,
    on_exit: Option<Box<dyn FnMut()>>,

    pub(crate) diagnostics: FrameDiagnostics,
}

impl Session {
    pub fn builder(stage: impl Stage + 'static) -> SessionBuilder {
        SessionBuilder {
            stage: Box::new(stage),
            config: SessionConfig::default(),
            audio: Box::new(NullAudio),
            store: Box::new(MemoryReplayStore::new()),
            replay: None,
            on_exit: None,
        }
    }

    // -- frame driver -------------------------------------------------------

    /// Advance the session by one rendered frame.
    ///
    /// Any error or panic raised by the pipeline or the renderer is caught
    /// here. The session then switches to the crash display for the rest of
    /// its life: the music is stopped and no further simulation runs.
    pub fn frame(
        &mut self,
        delta: Duration,
        input: &mut dyn InputSource,
        renderer: &mut dyn Renderer,
    ) -> FrameReport {
        self.frame += 1;
        let mut report = FrameReport {
            frame: self.frame,
            state: self.state.state(),
            events: Vec::new(),
        };
        if self.exited {
            return report;
        }
        if self.exit_rx.try_recv().is_ok() {
            self.run_exit(&mut report);
            return report;
        }

        let keys = input.session_keys();
        if let Some(fault) = &self.crashed {
            renderer.draw_crash(fault);
            if keys.back {
                self.exit_handle().request();
            }
            return report;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.step(delta, &keys, &mut *input, &mut *renderer, &mut report)
        }));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(payload) => Some(panic_message(&*payload)),
        };
        if let Some(message) = failure {
            self.crash(message, renderer, &mut report);
        }
        report.state = self.state.state();
        report
    }

    fn step(
        &mut self,
        delta: Duration,
        keys: &SessionKeys,
        input: &mut dyn InputSource,
        renderer: &mut dyn Renderer,
        report: &mut FrameReport,
    ) -> anyhow::Result<()> {
        if keys.pause {
            if self.replaying {
                self.replay_help = !self.replay_help;
            } else if self.state.toggle_pause(false) {
                report.push(match self.state.state() {
                    GameState::Paused => SessionEvent::Paused,
                    _ => SessionEvent::Resumed,
                });
            }
        }

        if self.state.state() == GameState::Paused {
            self.duck(true);
            return renderer.draw_pause(&self.hud());
        }
        self.duck(false);

        self.update(delta, keys, input, report)?;

        self.camera.begin_world();
        renderer.draw_world(&self.world, &self.camera.frame())?;
        self.camera.end_world();
        renderer.draw_hud(&self.hud())
    }

    fn duck(&mut self, paused: bool) {
        if self.ducked != paused {
            self.ducked = paused;
            let volume = if paused {
                self.config.paused_volume
            } else {
                self.config.master_volume
            };
            self.audio.set_volume(volume);
        }
    }

    fn crash(&mut self, message: String, renderer: &mut dyn Renderer, report: &mut FrameReport) {
        let fault = Fault {
            frame: self.frame,
            message,
        };
        error!(frame = fault.frame, fault = %fault.message, "pipeline fault, session halted");
        self.audio.stop_music();
        renderer.draw_crash(&fault);
        report.push(SessionEvent::Crashed(fault.clone()));
        self.crashed = Some(fault);
    }

    fn run_exit(&mut self, report: &mut FrameReport) {
        self.exited = true;
        if let Some(handler) = self.on_exit.as_mut() {
            handler();
        }
        info!(frame = self.frame, stage = self.stage.name(), "session exited");
        report.push(SessionEvent::Exited);
    }

    // -- session-level operations -------------------------------------------

    /// Handle that requests an exit at the top of the next frame.
    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle {
            tx: self.exit_tx.clone(),
        }
    }

    /// Toggle pause. Ignored while replaying or once the session is over.
    pub fn toggle_pause(&mut self) -> bool {
        self.state.toggle_pause(self.replaying)
    }

    /// Rebuild the stage and return to ONGOING.
    pub fn restart(&mut self) -> Result<(), SessionError> {
        let mut report = FrameReport {
            frame: self.frame,
            state: self.state.state(),
            events: Vec::new(),
        };
        self.rebuild(&mut report)
            .map_err(|source| SessionError::StageBuild {
                stage: self.stage.name().to_owned(),
                source,
            })
    }

    /// Reset per-attempt state, reset the world and build the stage again.
    ///
    /// A checkpoint-safe death keeps the recorded input and elapsed time so
    /// that the attempt continues; otherwise both start over.
    pub(crate) fn rebuild(&mut self, report: &mut FrameReport) -> anyhow::Result<()> {
        self.just_restarted = true;
        self.state.restart();
        if !self.replaying && !self.checkpoint {
            self.queues.clear();
            self.recorded_checkpoints.clear();
            self.input_frames = 0;
        }
        if !self.checkpoint {
            self.elapsed = Duration::ZERO;
        }
        let resumed = self.checkpoint;
        self.checkpoint = false;
        self.replay_saved = false;

        self.world.reset(self.config.rng_seed);
        self.stage.build(&mut self.world)?;
        info!(stage = self.stage.name(), from_checkpoint = resumed, "stage rebuilt");
        report.push(SessionEvent::Restarted);
        Ok(())
    }

    /// Persist the recorded input. Does nothing while replaying or when
    /// saving is disabled. Failures are logged, never fatal.
    pub(crate) fn save_replay(&mut self, player: &str, report: &mut FrameReport) {
        if self.replaying || !self.config.save_replays {
            return;
        }
        let outcome = if self.state.state() == GameState::Completed {
            ReplayOutcome::Victorious
        } else {
            ReplayOutcome::Death
        };
        let header = ReplayHeader {
            stage: self.stage.name().to_owned(),
            elapsed_ms: self.elapsed_ms(),
            difficulty: self.stage.difficulty().to_owned(),
            outcome,
            player: player.to_owned(),
            meta: self.stage.meta(),
        };
        let artifact = ReplayArtifact::new(
            header,
            self.queues.to_slots(),
            self.recorded_checkpoints.clone(),
        );
        match self.store.save(&artifact) {
            Ok(key) => {
                info!(key = %key, outcome = outcome.label(), player, "replay persisted");
                self.replay_saved = true;
                report.push(SessionEvent::ReplaySaved { key });
            }
            Err(e) => warn!(error = %e, "failed to save replay"),
        }
    }

    pub(crate) fn replay_saved(&self) -> bool {
        self.replay_saved
    }

    // -- queries ------------------------------------------------------------

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn state(&self) -> GameState {
        self.state.state()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Time spent ONGOING in the current attempt.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    /// Frames since the session started.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    /// Whether a replay's input has run out for any slot.
    pub fn playback_ended(&self) -> bool {
        self.replaying && self.queues.playback_ended()
    }

    pub fn queues(&self) -> &ReplayQueues {
        &self.queues
    }

    pub fn replay_help(&self) -> bool {
        self.replay_help
    }

    pub fn at_checkpoint(&self) -> bool {
        self.checkpoint
    }

    pub fn crashed(&self) -> Option<&Fault> {
        self.crashed.as_ref()
    }

    pub fn is_exited(&self) -> bool {
        self.exited
    }

    /// First determinism mismatch found while playing back a replay.
    pub fn divergence(&self) -> Option<&ReplayDivergence> {
        self.verifier.first_divergence()
    }

    pub fn diagnostics(&self) -> &FrameDiagnostics {
        &self.diagnostics
    }

    /// The replay that would be saved right now.
    pub fn current_replay(&self, player: &str) -> ReplayArtifact {
        let outcome = if self.state.state() == GameState::Completed {
            ReplayOutcome::Victorious
        } else {
            ReplayOutcome::Death
        };
        ReplayArtifact::new(
            ReplayHeader {
                stage: self.stage.name().to_owned(),
                elapsed_ms: self.elapsed_ms(),
                difficulty: self.stage.difficulty().to_owned(),
                outcome,
                player: player.to_owned(),
                meta: self.stage.meta(),
            },
            self.queues.to_slots(),
            self.recorded_checkpoints.clone(),
        )
    }

    pub fn hud(&self) -> HudInfo {
        HudInfo {
            state: self.state.state(),
            elapsed_ms: self.elapsed_ms(),
            replaying: self.replaying,
            replay_help: self.replay_help,
            checkpoint: self.checkpoint,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.world.reset(self.config.rng_seed);
        self.stage.dispose();
        self.audio.shutdown();
        info!(stage = self.stage.name(), frames = self.frame, "session torn down");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}
