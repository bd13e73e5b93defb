//! Core-grid geometry for tessera.
//!
//! An accelerator exposes a fixed two-dimensional grid of independent cores.
//! This crate provides the value types that describe subsets of that grid and
//! the work splitter that divides a scalar amount of work across it.
//!
//! # Types
//!
//! - [`CoreCoord`] - a single `(x, y)` core, ordered lexicographically.
//! - [`CoreRange`] - an inclusive axis-aligned rectangle of cores.
//! - [`CoreRangeSet`] - a set of pairwise non-overlapping ranges.
//!
//! All three are plain values: they are `Copy`/`Clone`, carry no shared state
//! and need no synchronization.
//!
//! # Work splitting
//!
//! [`split_work_to_cores`] divides `total_units` over the grid so that every
//! active core gets `ceil(total / cores)` units except possibly one trailing
//! "cliff" core which gets the remainder. The returned [`WorkSplit`] remembers
//! the enumeration order it was computed with, so callers assigning per-core
//! arguments iterate [`WorkSplit::cores`] instead of re-deriving coordinates.

pub mod coord;
pub mod error;
pub mod range;
pub mod range_set;
pub mod work_split;


pub use coord::{CoreCoord, RelativeCoreCoord};
pub use error::*;
pub use range::CoreRange;
pub use range_set::CoreRangeSet;
pub use work_split::{CoreOrder, WorkSplit, num_cores_to_core_range_set, split_work_to_cores};
