//! The input collaborator contract.
//!
//! The session polls the input collaborator once per frame: per-slot
//! [`Buttons`] for controllable entities, and [`SessionKeys`] for the
//! session-level controls (pause, retry, back, completion prompt).

use std::collections::VecDeque;

use tilerun_core::input::Buttons;

/// Choice made on the "stage complete" prompt, with the name the player
/// entered for the replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionChoice {
    Retry { name: String },
    Exit { name: String },
}

/// Session-level keys for one frame. All fields use "just pressed" semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionKeys {
    pub pause: bool,
    pub retry: bool,
    pub back: bool,
    /// Set on the frame the completion prompt was answered.
    pub completion: Option<CompletionChoice>,
}

/// Source of live input. Implementations must report special actions as
/// pressed for exactly one frame per physical press.
pub trait InputSource {
    /// Buttons of controller `slot` for the current frame.
    fn buttons(&mut self, slot: usize) -> Buttons;

    /// Session keys for the current frame. Called once per frame, before
    /// [`InputSource::buttons`].
    fn session_keys(&mut self) -> SessionKeys;
}

/// One scripted frame of input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptedFrame {
    /// Buttons per slot; missing slots read as neutral.
    pub slots: Vec<Buttons>,
    pub keys: SessionKeys,
}

impl ScriptedFrame {
    pub fn player(buttons: Buttons) -> Self {
        Self {
            slots: vec![buttons],
            keys: SessionKeys::default(),
        }
    }

    pub fn keys(keys: SessionKeys) -> Self {
        Self {
            slots: Vec::new(),
            keys,
        }
    }
}

/// Headless input that plays back a fixed script, one [`ScriptedFrame`] per
/// frame, then reports neutral input forever.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    frames: VecDeque<ScriptedFrame>,
    current: ScriptedFrame,
}

impl ScriptedInput {
    pub fn new(frames: impl IntoIterator<Item = ScriptedFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            current: ScriptedFrame::default(),
        }
    }

    pub fn push(&mut self, frame: ScriptedFrame) {
        self.frames.push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl InputSource for ScriptedInput {
    fn buttons(&mut self, slot: usize) -> Buttons {
        self.current.slots.get(slot).copied().unwrap_or(Buttons::NEUTRAL)
    }

    fn session_keys(&mut self) -> SessionKeys {
        self.current = self.frames.pop_front().unwrap_or_default();
        self.current.keys.clone()
    }
}
