//! Error types for grid geometry.

use snafu::Snafu;

use crate::coord::{CoreCoord, RelativeCoreCoord};
use crate::range::CoreRange;

/// Result type for geometry operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by geometry construction and core indexing.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Range end lies before its start on at least one axis.
    #[snafu(display("invalid core range for start: {start}, end: {end}"))]
    InvalidRange { start: CoreCoord, end: CoreCoord },

    /// Two ranges of a set share at least one core.
    #[snafu(display("cannot create core range set: ranges {first} and {second} overlap"))]
    OverlappingRanges { first: CoreRange, second: CoreRange },

    /// Linear core index past the end of the grid.
    #[snafu(display("core index {index} out of bounds for grid of {num_cores} cores"))]
    CoreIndexOutOfBounds { index: usize, num_cores: usize },

    /// Relative coordinate does not resolve to a core of the grid.
    #[snafu(display("relative coordinate {coord} lies outside grid {grid}"))]
    RelativeOutOfGrid { coord: RelativeCoreCoord, grid: CoreCoord },

    /// Work requested on a grid with no cores.
    #[snafu(display("cannot split {units} work units over empty grid {grid}"))]
    EmptyGrid { units: u32, grid: CoreCoord },
}
