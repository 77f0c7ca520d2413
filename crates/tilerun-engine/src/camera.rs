//! Autoframing camera.
//!
//! The camera keeps every focus entity visible:
//!
//! - **Single focus**: centre on the entity, clamped so the view never
//!   extends past the world edge. Zoom is left alone.
//! - **Multi focus**: take the bounding box of all focus rectangles, pad it,
//!   clamp it to the world, and zoom out until it fits the viewport (never
//!   zooming in past 1.0). The translation is the box centre, clamped so the
//!   zoomed view stays inside the world.
//! - **No focus**: the camera holds its last frame.

use serde::{Deserialize, Serialize};
use tilerun_core::geometry::Rect;
use tracing::debug;

use crate::config::SessionConfig;

// ---------------------------------------------------------------------------
// CameraFrame
// ---------------------------------------------------------------------------

/// The camera values a renderer needs for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraFrame {
    pub tx: f32,
    pub ty: f32,
    pub zoom: f32,
    /// Rotation in degrees around the translation point.
    pub angle: f32,
    /// Translation of the previous frame, for smoothing and parallax.
    pub prev_tx: f32,
    pub prev_ty: f32,
    pub flip_y: bool,
}

/// Which coordinate space the renderer is drawing in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    World,
    Hud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FocusMode {
    Idle,
    Single,
    Multi,
}

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

/// World-to-screen transform driven by the focus list.
#[derive(Debug, Clone)]
pub struct Camera {
    tx: f32,
    ty: f32,
    zoom: f32,
    angle: f32,
    prev_tx: f32,
    prev_ty: f32,
    flip_y: bool,
    viewport_w: f32,
    viewport_h: f32,
    padding: f32,
    projection: Projection,
    /// Rotation currently applied to the world projection.
    applied_rotation: f32,
    mode: FocusMode,
}

impl Camera {
    pub fn new(viewport_w: f32, viewport_h: f32, padding: f32) -> Self {
        Self {
            tx: viewport_w / 2.0,
            ty: viewport_h / 2.0,
            zoom: 1.0,
            angle: 0.0,
            prev_tx: viewport_w / 2.0,
            prev_ty: viewport_h / 2.0,
            flip_y: false,
            viewport_w,
            viewport_h,
            padding,
            projection: Projection::Hud,
            applied_rotation: 0.0,
            mode: FocusMode::Idle,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.viewport_width, config.viewport_height, config.zoom_padding)
    }

    pub fn translation(&self) -> (f32, f32) {
        (self.tx, self.ty)
    }

    pub fn prev_translation(&self) -> (f32, f32) {
        (self.prev_tx, self.prev_ty)
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom;
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn set_angle(&mut self, degrees: f32) {
        self.angle = degrees;
    }

    pub fn viewport(&self) -> (f32, f32) {
        (self.viewport_w, self.viewport_h)
    }

    pub fn frame(&self) -> CameraFrame {
        CameraFrame {
            tx: self.tx,
            ty: self.ty,
            zoom: self.zoom,
            angle: self.angle,
            prev_tx: self.prev_tx,
            prev_ty: self.prev_ty,
            flip_y: self.flip_y,
        }
    }

    /// Remember the current translation as the previous frame's.
    pub fn capture_previous(&mut self) {
        self.prev_tx = self.tx;
        self.prev_ty = self.ty;
    }

    /// Recompute translation (and zoom in multi-focus mode) from the focus
    /// rectangles and the world size.
    pub fn update(&mut self, focus: &[Rect], world_w: f32, world_h: f32) {
        let mode = match focus.len() {
            0 => FocusMode::Idle,
            1 => FocusMode::Single,
            _ => FocusMode::Multi,
        };
        if mode != self.mode {
            debug!(from = ?self.mode, to = ?mode, focus = focus.len(), "camera mode switch");
            self.mode = mode;
        }
        match focus {
            [] => {}
            [only] => self.frame_single(only, world_w, world_h),
            [first, rest @ ..] => self.frame_multi(first, rest, world_w, world_h),
        }
    }

    fn frame_single(&mut self, rect: &Rect, world_w: f32, world_h: f32) {
        let c = rect.center();
        let (hw, hh) = (self.viewport_w / 2.0, self.viewport_h / 2.0);
        self.tx = clamp_low_first(c.x - hw, 0.0, world_w - self.viewport_w) + hw;
        self.ty = clamp_low_first(c.y - hh, 0.0, world_h - self.viewport_h) + hh;
    }

    fn frame_multi(&mut self, first: &Rect, rest: &[Rect], world_w: f32, world_h: f32) {
        let bounds = rest.iter().fold(*first, |acc, r| acc.union(r));

        let w = bounds.w + self.padding * 2.0;
        let h = bounds.h + self.padding * 2.0;
        let x = clamp_low_first(bounds.x - self.padding, 0.0, world_w - w);
        let y = clamp_low_first(bounds.y - self.padding, 0.0, world_h - h);

        let zoom = if w / h > self.viewport_w / self.viewport_h {
            w / self.viewport_w
        } else {
            h / self.viewport_h
        };
        self.zoom = zoom.max(1.0);

        let margin_x = self.viewport_w / 2.0 * self.zoom;
        let margin_y = self.viewport_h / 2.0 * self.zoom;
        self.tx = clamp_margin(x + w / 2.0, margin_x, world_w);
        self.ty = clamp_margin(y + h / 2.0, margin_y, world_h);
    }

    /// Invert the camera's up-axis. Calling it twice restores the original
    /// orientation.
    pub fn flip_vertical(&mut self) {
        self.flip_y = !self.flip_y;
    }

    pub fn is_flipped(&self) -> bool {
        self.flip_y
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Rotation currently applied to the projection in use.
    pub fn applied_rotation(&self) -> f32 {
        self.applied_rotation
    }

    /// Switch to world space, applying the rotation around the translation point.
    pub fn begin_world(&mut self) {
        self.projection = Projection::World;
        self.applied_rotation = self.angle;
    }

    /// Un-apply the rotation and switch to HUD space.
    pub fn end_world(&mut self) {
        self.applied_rotation = 0.0;
        self.projection = Projection::Hud;
    }
}

/// `max(lo, v)` then `min(hi, ..)`: when the range is empty the upper bound
/// wins, which pins a box larger than the world to the far edge.
fn clamp_low_first(v: f32, lo: f32, hi: f32) -> f32 {
    v.max(lo).min(hi)
}

/// Keep a centre `margin` away from both world edges; centre on the world
/// when it is smaller than the view.
fn clamp_margin(center: f32, margin: f32, world: f32) -> f32 {
    if world <= margin * 2.0 {
        world / 2.0
    } else {
        center.clamp(margin, world - margin)
    }
}
