//! The static tile grid.
//!
//! A stage's layout is a rectangular, row-major byte array with its origin at
//! the top-left corner; one cell covers one world unit. Each byte is a
//! [`Tile`] code. The grid keeps a frozen copy of the codes it was built with
//! so that content which paints tiles at runtime can restore the pristine
//! value of any cell.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CoreError;

// ---------------------------------------------------------------------------
// Tile
// ---------------------------------------------------------------------------

/// A tile code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Tile(pub u8);

impl Tile {
    pub const SOLID: Tile = Tile(0);
    /// Walkable and never raises tile callbacks.
    pub const HOLLOW: Tile = Tile(1);
    pub const START: Tile = Tile(2);
    pub const LETHAL: Tile = Tile(3);
    pub const GOAL: Tile = Tile(4);

    /// Number of content-defined trigger bands.
    pub const TRIGGER_BANDS: u8 = 10;

    /// Content-defined trigger band `n` (`0..10`).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownTriggerBand`] if `n` is not a valid band.
    pub fn trigger(n: u8) -> Result<Tile, CoreError> {
        if n < Self::TRIGGER_BANDS {
            Ok(Tile(5 + n))
        } else {
            Err(CoreError::UnknownTriggerBand { band: n })
        }
    }

    /// The trigger band index if this is a content-defined code.
    pub fn trigger_band(self) -> Option<u8> {
        (5..5 + Self::TRIGGER_BANDS)
            .contains(&self.0)
            .then(|| self.0 - 5)
    }

    pub fn is_solid(self) -> bool {
        self == Tile::SOLID
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Tile::SOLID => write!(f, "Tile::SOLID"),
            Tile::HOLLOW => write!(f, "Tile::HOLLOW"),
            Tile::START => write!(f, "Tile::START"),
            Tile::LETHAL => write!(f, "Tile::LETHAL"),
            Tile::GOAL => write!(f, "Tile::GOAL"),
            other => match other.trigger_band() {
                Some(n) => write!(f, "Tile::trigger({n})"),
                None => write!(f, "Tile({})", other.0),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// TileGrid
// ---------------------------------------------------------------------------

/// Row-major tile codes plus the pristine copy used to revert runtime edits.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    cells: Vec<Tile>,
    pristine: Vec<Tile>,
}

impl TileGrid {
    /// A grid of `width x height` cells all set to `fill`.
    pub fn filled(width: usize, height: usize, fill: Tile) -> Self {
        let cells = vec![fill; width * height];
        Self {
            width,
            height,
            pristine: cells.clone(),
            cells,
        }
    }

    /// Build a grid from rows of raw codes, top row first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RaggedGrid`] if the rows differ in length.
    pub fn from_rows<R: AsRef<[u8]>>(rows: &[R]) -> Result<Self, CoreError> {
        let width = rows.first().map_or(0, |r| r.as_ref().len());
        let mut cells = Vec::with_capacity(width * rows.len());
        for (row, data) in rows.iter().enumerate() {
            let data = data.as_ref();
            if data.len() != width {
                return Err(CoreError::RaggedGrid {
                    row,
                    expected: width,
                    found: data.len(),
                });
            }
            cells.extend(data.iter().copied().map(Tile));
        }
        Ok(Self {
            width,
            height: rows.len(),
            pristine: cells.clone(),
            cells,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }

    /// Current code at a cell, or `None` outside the grid.
    pub fn get(&self, x: i64, y: i64) -> Option<Tile> {
        self.index(x, y).map(|i| self.cells[i])
    }

    /// Code the cell had when the grid was built.
    pub fn pristine(&self, x: i64, y: i64) -> Option<Tile> {
        self.index(x, y).map(|i| self.pristine[i])
    }

    /// Overwrite a cell at runtime. The pristine copy is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfGrid`] for coordinates outside the grid.
    pub fn set(&mut self, x: i64, y: i64, tile: Tile) -> Result<(), CoreError> {
        let i = self.index(x, y).ok_or(CoreError::OutOfGrid { x, y })?;
        self.cells[i] = tile;
        Ok(())
    }

    /// Restore one cell to its pristine code. Outside the grid this is a no-op.
    pub fn revert(&mut self, x: i64, y: i64) {
        if let Some(i) = self.index(x, y) {
            self.cells[i] = self.pristine[i];
        }
    }

    /// Restore every cell to its pristine code.
    pub fn revert_all(&mut self) {
        self.cells.copy_from_slice(&self.pristine);
    }

    /// First cell carrying [`Tile::START`], scanning rows top to bottom.
    pub fn start_position(&self) -> Option<(usize, usize)> {
        self.pristine
            .iter()
            .position(|&t| t == Tile::START)
            .map(|i| (i % self.width, i / self.width))
    }

    /// Clip a half-open cell range to the grid.
    pub fn clip_span(&self, x0: i64, y0: i64, x1: i64, y1: i64) -> (i64, i64, i64, i64) {
        let (w, h) = (self.width as i64, self.height as i64);
        let (x0, y0) = (x0.clamp(0, w), y0.clamp(0, h));
        (x0, y0, x1.clamp(x0, w), y1.clamp(y0, h))
    }

    /// Whether any cell in the half-open range is solid. Cells outside the
    /// grid count as solid so that the world edge is a wall.
    pub fn any_solid(&self, x0: i64, y0: i64, x1: i64, y1: i64) -> bool {
        if x0 >= x1 || y0 >= y1 {
            return false;
        }
        if (x0, y0, x1, y1) != self.clip_span(x0, y0, x1, y1) {
            return true;
        }
        for y in y0..y1 {
            for x in x0..x1 {
                match self.get(x, y) {
                    Some(t) if !t.is_solid() => {}
                    _ => return true,
                }
            }
        }
        false
    }
}

impl fmt::Display for TileGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.cells.chunks(self.width.max(1)) {
            for t in row {
                write!(f, "{}", t.0)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> TileGrid {
        TileGrid::from_rows(&[[1u8, 1, 1], [1, 2, 3], [0, 0, 0]]).unwrap()
    }

    #[test]
    fn lookup_and_bounds() {
        let g = grid();
        assert_eq!((g.width(), g.height()), (3, 3));
        assert_eq!(g.get(2, 1), Some(Tile::LETHAL));
        assert_eq!(g.get(3, 0), None);
        assert_eq!(g.get(-1, 0), None);
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = TileGrid::from_rows(&[vec![1u8, 1], vec![1]]).unwrap_err();
        assert!(matches!(err, CoreError::RaggedGrid { row: 1, .. }));
    }

    #[test]
    fn runtime_edits_keep_pristine_copy() {
        let mut g = grid();
        g.set(0, 0, Tile::trigger(3).unwrap()).unwrap();
        assert_eq!(g.get(0, 0), Some(Tile::trigger(3).unwrap()));
        assert_eq!(g.pristine(0, 0), Some(Tile::HOLLOW));

        g.revert(0, 0);
        assert_eq!(g.get(0, 0), Some(Tile::HOLLOW));

        g.set(1, 0, Tile::SOLID).unwrap();
        g.set(2, 0, Tile::GOAL).unwrap();
        g.revert_all();
        assert_eq!(g, grid());
    }

    #[test]
    fn start_position_is_first_start_cell() {
        assert_eq!(grid().start_position(), Some((1, 1)));
    }

    #[test]
    fn outside_counts_as_solid() {
        let g = grid();
        assert!(!g.any_solid(0, 0, 3, 2));
        assert!(g.any_solid(0, 2, 1, 3));
        assert!(g.any_solid(-1, 0, 0, 1));
    }

    #[test]
    fn spans_are_clipped_to_the_grid() {
        let g = grid();
        assert_eq!(g.clip_span(-5, -5, 100, 1), (0, 0, 3, 1));
        assert_eq!(g.clip_span(10, 10, 20, 20), (3, 3, 3, 3));
        // Saturated spans answer without walking the range.
        assert!(g.any_solid(i64::MIN, 0, i64::MAX, 1));
        assert!(!g.any_solid(5, 0, 5, i64::MAX));
    }

    #[test]
    fn trigger_bands() {
        assert_eq!(Tile::trigger(0).unwrap(), Tile(5));
        assert_eq!(Tile::trigger(9).unwrap(), Tile(14));
        assert!(matches!(
            Tile::trigger(10),
            Err(CoreError::UnknownTriggerBand { band: 10 })
        ));
        assert_eq!(Tile(14).trigger_band(), Some(9));
        assert_eq!(Tile::GOAL.trigger_band(), None);
        assert_eq!(format!("{:?}", Tile(7)), "Tile::trigger(2)");
    }

    #[test]
    fn display_renders_rows() {
        assert_eq!(grid().to_string(), "111\n123\n000\n");
    }
}
