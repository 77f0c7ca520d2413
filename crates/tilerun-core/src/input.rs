//! Per-frame button snapshots.

use serde::{Deserialize, Serialize};

/// Button state of one controller for one frame.
///
/// Directional buttons report "held"; the special actions report "just
/// pressed" and are therefore true for exactly one frame per physical press.
/// Snapshots are plain records, independent of the physical device, so they
/// can be recorded and replayed verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Buttons {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub special1: bool,
    pub special2: bool,
    pub special3: bool,
    pub switch_char: bool,
    pub suicide: bool,
}

impl Buttons {
    /// The neutral "no input" frame.
    pub const NEUTRAL: Buttons = Buttons {
        up: false,
        down: false,
        left: false,
        right: false,
        special1: false,
        special2: false,
        special3: false,
        switch_char: false,
        suicide: false,
    };

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}
