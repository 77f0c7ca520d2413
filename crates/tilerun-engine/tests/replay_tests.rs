//! Integration tests for deterministic replay.
//!
//! Records live sessions, plays the captured input back through a fresh
//! session, and checks that trajectories match, that exhausted queues feed
//! neutral input, and that state-hash checkpoints catch divergence.

use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tilerun_core::prelude::*;
use tilerun_engine::prelude::*;

const FRAME: Duration = Duration::from_millis(16);

const RIGHT: Buttons = Buttons {
    right: true,
    ..Buttons::NEUTRAL
};

const JUMP_RIGHT: Buttons = Buttons {
    right: true,
    special1: true,
    ..Buttons::NEUTRAL
};

const LEFT: Buttons = Buttons {
    left: true,
    ..Buttons::NEUTRAL
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Open field with a floor, START at x = 1 and an optional hazard at x = 5.
/// A random walker moves using the world RNG so that playback also has to
/// reproduce the RNG sequence.
struct Field {
    hazard: Tile,
    checkpoint_safe: bool,
    /// Scales the walker's steps; playback against a different drift diverges.
    drift: f32,
}

impl Field {
    fn new() -> Self {
        Self {
            hazard: Tile::HOLLOW,
            checkpoint_safe: false,
            drift: 1.0,
        }
    }
}

impl Stage for Field {
    fn name(&self) -> &str {
        "field"
    }

    fn init(&mut self) -> anyhow::Result<TileGrid> {
        let width = 24;
        let mut lane = vec![Tile::HOLLOW.0; width];
        lane[1] = Tile::START.0;
        lane[5] = self.hazard.0;
        let mut rows = vec![vec![Tile::HOLLOW.0; width]; 6];
        rows.push(lane);
        rows.push(vec![Tile::SOLID.0; width]);
        Ok(TileGrid::from_rows(&rows)?)
    }

    fn build(&mut self, world: &mut World) -> anyhow::Result<()> {
        let (x, y) = world.tiles().start_position().context("no start tile")?;
        let hero = world.add_entity(
            Entity::controllable("hero", x as f32, y as f32, 1.0, 1.0, 0)
                .with_controls(Kinematics::new(1.0, 0.5, 2.0, 4.0)),
        );
        world.add_focus(hero);

        let drift = self.drift;
        world.add_entity(
            Entity::movable("walker", 12.0, 2.0, 1.0, 1.0).with_behavior(move |w, me| {
                let step = w.rng().gen_range(-1.0f32..1.0) * drift;
                w.entity_mut(me)?.pos.x += step;
                Ok(())
            }),
        );
        Ok(())
    }

    fn is_checkpoint_safe(&self, _world: &World) -> bool {
        self.checkpoint_safe
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        checkpoint_interval: 5,
        ..SessionConfig::default()
    }
}

fn positions(session: &Session) -> Vec<(String, f32, f32)> {
    session
        .world()
        .entities()
        .map(|e| (e.name.clone(), e.pos.x, e.pos.y))
        .collect()
}

fn hero_x(session: &Session) -> f32 {
    session
        .world()
        .entities()
        .find(|e| e.name == "hero")
        .map(|e| e.pos.x)
        .unwrap_or(f32::NAN)
}

/// Play `script` live and return the per-frame positions plus the replay.
fn record(stage: Field, script: &[Buttons]) -> (Vec<Vec<(String, f32, f32)>>, ReplayArtifact) {
    let mut session = Session::builder(stage).config(config()).build().unwrap();
    let mut input = ScriptedInput::new(script.iter().map(|&b| ScriptedFrame::player(b)));
    let mut trajectory = Vec::new();
    for _ in 0..script.len() {
        session.frame(FRAME, &mut input, &mut NullRenderer);
        trajectory.push(positions(&session));
    }
    (trajectory, session.current_replay("tester"))
}

fn playback(stage: Field, artifact: ReplayArtifact) -> Session {
    Session::builder(stage)
        .config(config())
        .replay(artifact)
        .build()
        .unwrap()
}

fn script() -> Vec<Buttons> {
    let mut script = vec![RIGHT; 6];
    script.push(JUMP_RIGHT);
    script.extend([Buttons::NEUTRAL; 8]);
    script.extend([LEFT; 6]);
    script.extend([RIGHT; 9]);
    script
}

// ---------------------------------------------------------------------------
// 1. Round trip
// ---------------------------------------------------------------------------

#[test]
fn playback_reproduces_live_trajectory() {
    let script = script();
    let (live, artifact) = record(Field::new(), &script);
    assert_eq!(artifact.slots[0].len(), script.len());
    assert_eq!(artifact.checkpoints.len(), script.len() / 5);

    let mut session = playback(Field::new(), artifact);
    // Live input is ignored during playback.
    let mut input = ScriptedInput::new(vec![ScriptedFrame::player(LEFT); script.len()]);
    for (frame, expected) in live.iter().enumerate() {
        let report = session.frame(FRAME, &mut input, &mut NullRenderer);
        assert_eq!(&positions(&session), expected, "frame {}", frame + 1);
        assert!(report.events.is_empty(), "frame {}: {:?}", frame + 1, report.events);
    }
    assert!(session.divergence().is_none());
    assert!(session.playback_ended());
}

#[test]
fn replay_survives_directory_store_round_trip() {
    let dir = std::env::temp_dir().join(format!("tilerun-replays-{}", std::process::id()));
    let mut store = DirectoryReplayStore::new(dir.clone());
    let (live, artifact) = record(Field::new(), &script());

    let key = store.save(&artifact).unwrap();
    assert_eq!(store.list().unwrap(), vec![key.clone()]);
    let loaded = store.load(&key).unwrap();
    assert_eq!(loaded, artifact);

    let mut session = playback(Field::new(), loaded);
    let mut input = ScriptedInput::default();
    for _ in 0..live.len() {
        session.frame(FRAME, &mut input, &mut NullRenderer);
    }
    assert_eq!(&positions(&session), live.last().unwrap());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn tampered_artifact_is_rejected() {
    let (_, artifact) = record(Field::new(), &script());
    let mut json: serde_json::Value = serde_json::from_str(&artifact.to_json().unwrap()).unwrap();
    json["slots"][0][0]["left"] = serde_json::Value::Bool(true);

    let err = ReplayArtifact::from_json(&json.to_string()).unwrap_err();
    assert!(matches!(err, SessionError::ReplayDigest { .. }), "{err}");
}

// ---------------------------------------------------------------------------
// 2. Exhausted queues
// ---------------------------------------------------------------------------

#[test]
fn exhausted_queue_feeds_neutral_input() {
    let (_, artifact) = record(Field::new(), &[RIGHT; 10]);
    let mut session = playback(Field::new(), artifact);
    let mut input = ScriptedInput::default();

    for frame in 1..=10 {
        assert!(!session.playback_ended(), "ended early before frame {frame}");
        session.frame(FRAME, &mut input, &mut NullRenderer);
    }
    let x_after_queue = hero_x(&session);
    assert_eq!(x_after_queue, 11.0);

    // Observed at the start of frame 11.
    assert!(session.playback_ended());
    session.frame(FRAME, &mut input, &mut NullRenderer);
    session.frame(FRAME, &mut input, &mut NullRenderer);
    assert_eq!(hero_x(&session), x_after_queue);
    assert_eq!(session.state(), GameState::Ongoing);
}

// ---------------------------------------------------------------------------
// 3. Divergence
// ---------------------------------------------------------------------------

#[test]
fn divergent_stage_is_reported_at_first_checkpoint() {
    let (_, artifact) = record(Field::new(), &script());
    let first = artifact.checkpoints[0].clone();

    let drifting = Field {
        drift: 2.0,
        ..Field::new()
    };
    let mut session = playback(drifting, artifact);
    let mut input = ScriptedInput::default();
    let mut reported = Vec::new();
    for _ in 0..script().len() {
        let report = session.frame(FRAME, &mut input, &mut NullRenderer);
        reported.extend(report.events.into_iter().filter_map(|e| match e {
            SessionEvent::ReplayDiverged(d) => Some(d),
            _ => None,
        }));
    }

    assert_eq!(reported.len(), 1, "only the first divergence is reported");
    assert_eq!(reported[0].frame, first.frame);
    assert_eq!(reported[0].expected_hash, first.state_hash);
    assert_eq!(session.divergence(), Some(&reported[0]));
}

// ---------------------------------------------------------------------------
// 4. Checkpoint restarts during playback
// ---------------------------------------------------------------------------

#[test]
fn checkpoint_death_restarts_playback_automatically() {
    let stage = || Field {
        hazard: Tile::LETHAL,
        checkpoint_safe: true,
        ..Field::new()
    };

    // Live: die at x = 5, retry, then walk three cells.
    let mut live = Session::builder(stage()).config(config()).build().unwrap();
    let mut frames = vec![ScriptedFrame::player(RIGHT); 4];
    frames.push(ScriptedFrame::keys(SessionKeys {
        retry: true,
        ..Default::default()
    }));
    frames.extend(vec![ScriptedFrame::player(RIGHT); 3]);
    let total = frames.len();
    let mut input = ScriptedInput::new(frames);
    for _ in 0..total {
        live.frame(FRAME, &mut input, &mut NullRenderer);
    }
    assert_eq!(hero_x(&live), 4.0);
    let artifact = live.current_replay("tester");
    assert_eq!(artifact.slots[0].len(), 7);

    // Playback restarts on the death frame without any key press.
    let mut session = playback(stage(), artifact);
    let mut input = ScriptedInput::default();
    let reports: Vec<FrameReport> = (0..total - 1)
        .map(|_| session.frame(FRAME, &mut input, &mut NullRenderer))
        .collect();
    assert!(reports[3].contains(&SessionEvent::Ended { checkpoint: true }));
    assert!(reports[3].contains(&SessionEvent::Restarted));
    assert_eq!(hero_x(&session), 4.0);
    assert!(session.playback_ended());
    assert!(session.divergence().is_none());
}

#[test]
fn playback_never_saves_and_ignores_pause() {
    let store = MemoryReplayStore::new();
    let lethal = || Field {
        hazard: Tile::LETHAL,
        ..Field::new()
    };
    let (_, artifact) = record(lethal(), &[RIGHT; 6]);

    let mut session = Session::builder(lethal())
        .config(config())
        .store(store.clone())
        .replay(artifact)
        .build()
        .unwrap();
    let mut input = ScriptedInput::new([ScriptedFrame::keys(SessionKeys {
        pause: true,
        ..Default::default()
    })]);
    let first = session.frame(FRAME, &mut input, &mut NullRenderer);
    assert_eq!(first.state, GameState::Ongoing);
    assert!(session.replay_help(), "pause toggles the help overlay instead");
    assert!(!session.toggle_pause());

    for _ in 0..6 {
        session.frame(FRAME, &mut input, &mut NullRenderer);
    }
    assert_eq!(session.state(), GameState::Ended);
    assert!(store.is_empty());
}
