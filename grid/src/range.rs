//! Inclusive rectangular core ranges.

use std::collections::BTreeSet;
use std::fmt;

use snafu::ensure;

use crate::coord::CoreCoord;
use crate::error::{InvalidRangeSnafu, Result};

/// Axis-aligned inclusive rectangle of cores.
///
/// Invariant: `end.x >= start.x && end.y >= start.y`. Ordering compares
/// `start` first, then `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreRange {
    start: CoreCoord,
    end: CoreCoord,
}

impl CoreRange {
    /// Create a range, rejecting inverted corners.
    pub fn new(start: CoreCoord, end: CoreCoord) -> Result<Self> {
        ensure!(end.x >= start.x && end.y >= start.y, InvalidRangeSnafu { start, end });
        Ok(Self { start, end })
    }

    /// Range covering exactly one core.
    pub const fn single(core: CoreCoord) -> Self {
        Self { start: core, end: core }
    }

    /// Range covering an entire grid of size `grid` (which must be non-empty).
    pub fn grid(grid: CoreCoord) -> Result<Self> {
        ensure!(
            grid.x > 0 && grid.y > 0,
            InvalidRangeSnafu { start: CoreCoord::default(), end: grid }
        );
        Ok(Self { start: CoreCoord::new(0, 0), end: CoreCoord::new(grid.x - 1, grid.y - 1) })
    }

    /// Caller guarantees the corner ordering.
    pub(crate) const fn from_corners(start: CoreCoord, end: CoreCoord) -> Self {
        Self { start, end }
    }

    pub const fn start(&self) -> CoreCoord {
        self.start
    }

    pub const fn end(&self) -> CoreCoord {
        self.end
    }

    /// Number of cores covered.
    pub const fn size(&self) -> usize {
        (self.end.x - self.start.x + 1) * (self.end.y - self.start.y + 1)
    }

    /// Whether `other` lies entirely inside this range.
    pub fn contains(&self, other: &CoreRange) -> bool {
        other.start.x >= self.start.x
            && other.end.x <= self.end.x
            && other.start.y >= self.start.y
            && other.end.y <= self.end.y
    }

    pub fn contains_core(&self, core: CoreCoord) -> bool {
        (self.start.x..=self.end.x).contains(&core.x) && (self.start.y..=self.end.y).contains(&core.y)
    }

    /// Overlapping rectangle, if any.
    pub fn intersects(&self, other: &CoreRange) -> Option<CoreRange> {
        let x1 = self.start.x.max(other.start.x);
        let y1 = self.start.y.max(other.start.y);
        let x2 = self.end.x.min(other.end.x);
        let y2 = self.end.y.min(other.end.y);

        (x1 <= x2 && y1 <= y2).then(|| Self::from_corners(CoreCoord::new(x1, y1), CoreCoord::new(x2, y2)))
    }

    /// Merge two ranges that share a full edge extent and overlap or touch.
    ///
    /// Ranges with identical x extents merge along y and vice versa. Anything
    /// else (including L-shaped unions) returns `None`.
    pub fn merge(&self, other: &CoreRange) -> Option<CoreRange> {
        let same_columns = self.start.x == other.start.x && self.end.x == other.end.x;
        let same_rows = self.start.y == other.start.y && self.end.y == other.end.y;

        if same_columns && touches(self.start.y, self.end.y, other.start.y, other.end.y) {
            return Some(Self::from_corners(
                CoreCoord::new(self.start.x, self.start.y.min(other.start.y)),
                CoreCoord::new(self.end.x, self.end.y.max(other.end.y)),
            ));
        }

        if same_rows && touches(self.start.x, self.end.x, other.start.x, other.end.x) {
            return Some(Self::from_corners(
                CoreCoord::new(self.start.x.min(other.start.x), self.start.y),
                CoreCoord::new(self.end.x.max(other.end.x), self.end.y),
            ));
        }

        None
    }

    /// Cores of this range not covered by `other`, as disjoint rectangles.
    ///
    /// Full-height strips left and right of the overlap come first, then the
    /// pieces below and above it restricted to the overlap's columns.
    pub fn diff(&self, other: &CoreRange) -> BTreeSet<CoreRange> {
        let Some(overlap) = self.intersects(other) else {
            return BTreeSet::from([*self]);
        };

        let mut pieces = BTreeSet::new();
        if overlap.start.x > self.start.x {
            pieces.insert(Self::from_corners(self.start, CoreCoord::new(overlap.start.x - 1, self.end.y)));
        }
        if overlap.end.x < self.end.x {
            pieces.insert(Self::from_corners(CoreCoord::new(overlap.end.x + 1, self.start.y), self.end));
        }
        if overlap.start.y > self.start.y {
            pieces.insert(Self::from_corners(
                CoreCoord::new(overlap.start.x, self.start.y),
                CoreCoord::new(overlap.end.x, overlap.start.y - 1),
            ));
        }
        if overlap.end.y < self.end.y {
            pieces.insert(Self::from_corners(
                CoreCoord::new(overlap.start.x, overlap.end.y + 1),
                CoreCoord::new(overlap.end.x, self.end.y),
            ));
        }
        pieces
    }

    /// Cores of the range, x fastest, then y.
    pub fn cores(&self) -> impl Iterator<Item = CoreCoord> + use<> {
        let (start, end) = (self.start, self.end);
        (start.y..=end.y).flat_map(move |y| (start.x..=end.x).map(move |x| CoreCoord::new(x, y)))
    }
}

impl From<CoreCoord> for CoreRange {
    fn from(core: CoreCoord) -> Self {
        Self::single(core)
    }
}

impl fmt::Display for CoreRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.start, self.end)
    }
}

/// Inclusive intervals `[a0, a1]` and `[b0, b1]` overlap or are adjacent.
fn touches(a0: usize, a1: usize, b0: usize, b1: usize) -> bool {
    a0 <= b1.saturating_add(1) && b0 <= a1.saturating_add(1)
}
