//! Core coordinates.

use std::fmt;

use crate::error::{RelativeOutOfGridSnafu, Result};

/// Position of a single core on the grid.
///
/// Ordering is lexicographic on `(x, y)`; the derive relies on field order.
/// The same type doubles as a grid-size descriptor (`x` columns by `y` rows).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreCoord {
    pub x: usize,
    pub y: usize,
}

impl CoreCoord {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Number of cores in a grid of this size.
    pub const fn num_cores(self) -> usize {
        self.x * self.y
    }

    /// Whether this coordinate addresses a core of a grid of size `grid`.
    pub const fn within(self, grid: CoreCoord) -> bool {
        self.x < grid.x && self.y < grid.y
    }
}

impl From<(usize, usize)> for CoreCoord {
    fn from((x, y): (usize, usize)) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for CoreCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(x={},y={})", self.x, self.y)
    }
}

/// Coordinate that may count from the far edge of the grid.
///
/// Negative components are offsets from the grid size, so `(-1, -1)` is the
/// last core of any grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RelativeCoreCoord {
    pub x: isize,
    pub y: isize,
}

impl RelativeCoreCoord {
    pub const fn new(x: isize, y: isize) -> Self {
        Self { x, y }
    }

    /// Resolve against a concrete grid.
    pub fn resolve(self, grid: CoreCoord) -> Result<CoreCoord> {
        let axis = |value: isize, len: usize| -> Option<usize> {
            let resolved = if value < 0 { len.checked_sub(value.unsigned_abs())? } else { value as usize };
            (resolved < len).then_some(resolved)
        };

        match (axis(self.x, grid.x), axis(self.y, grid.y)) {
            (Some(x), Some(y)) => Ok(CoreCoord::new(x, y)),
            _ => RelativeOutOfGridSnafu { coord: self, grid }.fail(),
        }
    }
}

impl fmt::Display for RelativeCoreCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(x={},y={})", self.x, self.y)
    }
}
