//! Axis-aligned geometry in world units.
//!
//! World coordinates have their origin at the top-left corner with `y`
//! growing downwards, matching the row-major layout of the tile grid.

use serde::{Deserialize, Serialize};

/// A point or displacement in world units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle: top-left corner plus size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Strict overlap test: rectangles that merely share an edge do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Smallest rectangle enclosing both.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Integer cell range `[x0, x1) x [y0, y1)` covered by this rectangle,
    /// one cell per world unit. Empty rectangles cover no cells.
    pub fn cell_span(&self) -> (i64, i64, i64, i64) {
        let x0 = self.x.floor() as i64;
        let y0 = self.y.floor() as i64;
        let x1 = (self.right().ceil() as i64).max(x0);
        let y1 = (self.bottom().ceil() as i64).max(y0);
        (x0, y0, x1, y1)
    }
}

/// The eight compass directions. North is towards negative `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Direction {
    /// Direction of travel from `from` to `to`, or `None` when the points coincide.
    ///
    /// The circle is split into eight 45 degree sectors centred on each
    /// compass direction.
    pub fn between(from: Vec2, to: Vec2) -> Option<Direction> {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        // Screen space: flip y so that angles grow counter-clockwise from east.
        let angle = (-dy).atan2(dx).to_degrees();
        let sector = (((angle + 360.0 + 22.5) % 360.0) / 45.0) as usize;
        Some(match sector {
            0 => Direction::E,
            1 => Direction::NE,
            2 => Direction::N,
            3 => Direction::NW,
            4 => Direction::W,
            5 => Direction::SW,
            6 => Direction::S,
            _ => Direction::SE,
        })
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::N | Direction::S)
    }
}
