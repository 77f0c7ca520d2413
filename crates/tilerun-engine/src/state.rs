//! The game state machine.
//!
//! ```text
//!            pause toggle (live play only)
//!   ONGOING <----------------------------> PAUSED
//!      |  \
//!      |   \ any entity FINISH
//!      |    `-----------------> COMPLETED
//!      | alive tally == 0
//!      v
//!    ENDED
//! ```
//!
//! ENDED and COMPLETED are terminal: only [`StateMachine::restart`], issued by
//! the session when it rebuilds the stage, leaves them.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Global session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameState {
    Ongoing,
    Paused,
    Ended,
    Completed,
}

impl GameState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GameState::Ended | GameState::Completed)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameState::Ongoing => "ONGOING",
            GameState::Paused => "PAUSED",
            GameState::Ended => "ENDED",
            GameState::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// Guarded transitions between [`GameState`]s.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: GameState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: GameState::Ongoing,
        }
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    fn transition(&mut self, to: GameState) {
        info!(from = %self.state, to = %to, "state transition");
        self.state = to;
    }

    /// Toggle between ONGOING and PAUSED. Ignored while replaying or once
    /// terminal. Returns whether the state changed.
    pub fn toggle_pause(&mut self, replaying: bool) -> bool {
        if replaying {
            return false;
        }
        match self.state {
            GameState::Ongoing => self.transition(GameState::Paused),
            GameState::Paused => self.transition(GameState::Ongoing),
            GameState::Ended | GameState::Completed => return false,
        }
        true
    }

    /// Enter ENDED. Returns `true` only for the call that performed the
    /// transition, so end-of-life side effects run once.
    pub fn end(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.transition(GameState::Ended);
        true
    }

    /// Enter COMPLETED. Returns `true` only for the call that performed the
    /// transition.
    pub fn complete(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.transition(GameState::Completed);
        true
    }

    /// Back to ONGOING from any state. Only the session calls this, as part
    /// of a rebuild.
    pub fn restart(&mut self) {
        if self.state != GameState::Ongoing {
            self.transition(GameState::Ongoing);
        }
    }
}
