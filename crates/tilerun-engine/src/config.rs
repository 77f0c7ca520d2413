//! Session configuration.
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! yields a usable configuration:
//!
//! ```
//! use tilerun_engine::config::SessionConfig;
//!
//! let config = SessionConfig::from_json_str(r#"{ "viewport_width": 320, "save_replays": false }"#).unwrap();
//! assert_eq!(config.viewport_width, 320.0);
//! assert_eq!(config.viewport_height, 600.0);
//! assert!(!config.save_replays);
//! ```

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Rejected configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("viewport must be positive and finite, got {width}x{height}")]
    Viewport { width: f32, height: f32 },

    #[error("zoom padding must be finite and non-negative, got {0}")]
    Padding(f32),

    #[error("{name} volume must be within 0.0..=1.0, got {value}")]
    Volume { name: &'static str, value: f32 },

    #[error("trash capacity must be at least 1")]
    TrashCapacity,

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Tunables of one play session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Viewport size in world units at zoom 1.0.
    pub viewport_width: f32,
    pub viewport_height: f32,
    /// Margin added around the focus bounding box in multi-focus mode.
    pub zoom_padding: f32,
    /// Persist replays at the end of live sessions.
    pub save_replays: bool,
    pub master_volume: f32,
    /// Volume while paused.
    pub paused_volume: f32,
    /// Trash entries kept before the list is cleared.
    pub trash_capacity: usize,
    /// Added to health when a controllable touches a LETHAL tile.
    pub lethal_damage: i32,
    /// Seed of the session RNG, reapplied on every rebuild.
    pub rng_seed: u64,
    /// Frames between determinism checkpoints in a recorded replay. 0 disables them.
    pub checkpoint_interval: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            viewport_width: 800.0,
            viewport_height: 600.0,
            zoom_padding: 20.0,
            save_replays: true,
            master_volume: 1.0,
            paused_volume: 0.1,
            trash_capacity: 200,
            lethal_damage: -1,
            rng_seed: 0,
            checkpoint_interval: 60,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (w, h) = (self.viewport_width, self.viewport_height);
        if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
            return Err(ConfigError::Viewport {
                width: w,
                height: h,
            });
        }
        if !self.zoom_padding.is_finite() || self.zoom_padding < 0.0 {
            return Err(ConfigError::Padding(self.zoom_padding));
        }
        for (name, value) in [("master", self.master_volume), ("paused", self.paused_volume)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Volume { name, value });
            }
        }
        if self.trash_capacity == 0 {
            return Err(ConfigError::TrashCapacity);
        }
        Ok(())
    }
}
