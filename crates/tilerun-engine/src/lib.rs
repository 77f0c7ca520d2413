//! tilerun engine -- session driver for the tile-grid platformer core.
//!
//! This crate builds on [`tilerun_core`] to run a play session: a per-frame
//! pipeline over the object registry, the ONGOING / PAUSED / ENDED /
//! COMPLETED state machine, a focus-following camera, and deterministic
//! input recording and playback with BLAKE3 state checkpoints.
//!
//! Rendering, audio, stage content and replay storage sit behind the narrow
//! traits in [`collab`] and [`replay`]; headless implementations are provided
//! so sessions run in tests and tools without a window.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use tilerun_core::prelude::*;
//! use tilerun_engine::prelude::*;
//!
//! struct Pit;
//!
//! impl Stage for Pit {
//!     fn name(&self) -> &str {
//!         "pit"
//!     }
//!
//!     fn init(&mut self) -> anyhow::Result<TileGrid> {
//!         Ok(TileGrid::filled(8, 8, Tile::LETHAL))
//!     }
//!
//!     fn build(&mut self, world: &mut World) -> anyhow::Result<()> {
//!         world.add_entity(Entity::controllable("hero", 2.0, 2.0, 1.0, 1.0, 0));
//!         Ok(())
//!     }
//! }
//!
//! let store = MemoryReplayStore::new();
//! let mut session = Session::builder(Pit).store(store.clone()).build().unwrap();
//! let report = session.frame(Duration::from_millis(16), &mut ScriptedInput::default(), &mut NullRenderer);
//!
//! assert_eq!(report.state, GameState::Ended);
//! assert_eq!(store.len(), 1);
//! ```

#![deny(unsafe_code)]

pub mod camera;
pub mod collab;
pub mod config;
pub mod input;
mod pipeline;
pub mod replay;
pub mod session;
pub mod snapshot;
pub mod state;

use std::path::PathBuf;

/// Re-export the core crate for convenience.
pub use tilerun_core;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced to the session's driver.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("stage `{stage}` failed to initialise")]
    StageInit {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("stage `{stage}` failed to build")]
    StageBuild {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("replay I/O failed at {}", path.display())]
    ReplayIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("replay could not be decoded: {0}")]
    ReplayDecode(#[from] serde_json::Error),

    /// The stored input digest does not match the recorded input.
    #[error("replay digest mismatch: expected {expected}, found {actual}")]
    ReplayDigest { expected: String, actual: String },

    #[error("no replay stored under `{0}`")]
    ReplayNotFound(String),
}

/// A pipeline fault: an error or panic raised during a frame.
///
/// Once a session has faulted it only draws the crash screen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fault at frame {frame}: {message}")]
pub struct Fault {
    pub frame: u64,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use crate::camera::{Camera, CameraFrame, Projection};
    pub use crate::collab::{Audio, HudInfo, NullAudio, NullRenderer, Renderer, Stage};
    pub use crate::config::{ConfigError, SessionConfig};
    pub use crate::input::{CompletionChoice, InputSource, ScriptedFrame, ScriptedInput, SessionKeys};
    pub use crate::replay::{
        CheckpointVerifier, DirectoryReplayStore, MemoryReplayStore, ReplayArtifact,
        ReplayCheckpoint, ReplayDivergence, ReplayHeader, ReplayOutcome, ReplayQueues, ReplayStore,
    };
    pub use crate::session::{
        ExitHandle, FrameDiagnostics, FrameReport, Session, SessionBuilder, SessionEvent,
    };
    pub use crate::snapshot::{EntitySnapshot, FrameSnapshot};
    pub use crate::state::{GameState, StateMachine};
    pub use crate::{Fault, SessionError};
}
