//! Deterministic partitioning of work units across the core grid.
//!
//! # Enumeration order
//!
//! A linear core index maps to a coordinate in one of two ways:
//!
//! - [`CoreOrder::RowMajor`] (canonical): `i -> (i % grid.x, i / grid.x)`.
//! - [`CoreOrder::ColumnMajor`]: `i -> (i / grid.y, i % grid.y)`.
//!
//! Device kernels compute their slice of the work from the start offset they
//! receive, so the host must hand out offsets in the same order the split was
//! made. [`WorkSplit`] stores the resolved core sequence and [`WorkSplit::cores`]
//! replays it; program builders should never recompute coordinates by hand.

use snafu::ensure;

use crate::coord::CoreCoord;
use crate::error::{CoreIndexOutOfBoundsSnafu, EmptyGridSnafu, Result};
use crate::range::CoreRange;
use crate::range_set::CoreRangeSet;

/// Linear enumeration order of grid cores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CoreOrder {
    /// x varies fastest.
    #[default]
    RowMajor,
    /// y varies fastest.
    ColumnMajor,
}

impl CoreOrder {
    /// Coordinate of linear index `index` in a grid of size `grid`.
    pub fn core_at(self, index: usize, grid: CoreCoord) -> Result<CoreCoord> {
        let num_cores = grid.num_cores();
        ensure!(index < num_cores, CoreIndexOutOfBoundsSnafu { index, num_cores });
        Ok(self.core_at_unchecked(index, grid))
    }

    fn core_at_unchecked(self, index: usize, grid: CoreCoord) -> CoreCoord {
        match self {
            Self::RowMajor => CoreCoord::new(index % grid.x, index / grid.x),
            Self::ColumnMajor => CoreCoord::new(index / grid.y, index % grid.y),
        }
    }

    /// Contiguous index span `[start, start + count)` as disjoint rectangles.
    ///
    /// At most three ranges: a partial leading line, a block of full lines
    /// and a partial trailing line.
    pub fn span(self, start: usize, count: usize, grid: CoreCoord) -> Result<CoreRangeSet> {
        if count == 0 {
            return Ok(CoreRangeSet::empty());
        }

        let num_cores = grid.num_cores();
        let last = start + count - 1;
        ensure!(last < num_cores, CoreIndexOutOfBoundsSnafu { index: last, num_cores });

        let line_len = match self {
            Self::RowMajor => grid.x,
            Self::ColumnMajor => grid.y,
        };
        let rect = |line_lo: usize, line_hi: usize, pos_lo: usize, pos_hi: usize| match self {
            Self::RowMajor => {
                CoreRange::from_corners(CoreCoord::new(pos_lo, line_lo), CoreCoord::new(pos_hi, line_hi))
            }
            Self::ColumnMajor => {
                CoreRange::from_corners(CoreCoord::new(line_lo, pos_lo), CoreCoord::new(line_hi, pos_hi))
            }
        };

        let (first_line, first_pos) = (start / line_len, start % line_len);
        let (last_line, last_pos) = (last / line_len, last % line_len);

        let mut ranges = Vec::with_capacity(3);
        if first_line == last_line {
            ranges.push(rect(first_line, first_line, first_pos, last_pos));
        } else {
            let mut full_lo = first_line;
            if first_pos != 0 {
                ranges.push(rect(first_line, first_line, first_pos, line_len - 1));
                full_lo += 1;
            }
            let mut full_hi = last_line;
            if last_pos != line_len - 1 {
                ranges.push(rect(last_line, last_line, 0, last_pos));
                full_hi -= 1;
            }
            if full_lo <= full_hi {
                ranges.push(rect(full_lo, full_hi, 0, line_len - 1));
            }
        }

        CoreRangeSet::new(ranges)
    }
}

/// Outcome of splitting work across cores.
///
/// `group1` cores each take `units_per_core_group1` units, `group2` (empty or
/// the single cliff core) takes `units_per_core_group2`. The two groups are
/// disjoint and together form `all_cores`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSplit {
    all_cores: CoreRangeSet,
    group1: CoreRangeSet,
    group2: CoreRangeSet,
    units_per_core_group1: u32,
    units_per_core_group2: u32,
    /// Active cores in assignment order; the first `group1_len` belong to group 1.
    sequence: Vec<CoreCoord>,
    group1_len: usize,
    order: CoreOrder,
}

impl WorkSplit {
    fn empty(order: CoreOrder) -> Self {
        Self {
            all_cores: CoreRangeSet::empty(),
            group1: CoreRangeSet::empty(),
            group2: CoreRangeSet::empty(),
            units_per_core_group1: 0,
            units_per_core_group2: 0,
            sequence: Vec::new(),
            group1_len: 0,
            order,
        }
    }

    /// Every core of an existing shard grid takes `units_per_shard` units.
    ///
    /// This is the sharding-aware counterpart of [`split_work_to_cores`]: the
    /// data already lives on `shard_grid`, so the cores are dictated rather
    /// than chosen. Cores are visited in `order` across the whole set.
    pub fn from_shard_grid(shard_grid: &CoreRangeSet, units_per_shard: u32, order: CoreOrder) -> Self {
        let mut sequence: Vec<CoreCoord> = shard_grid.cores().collect();
        match order {
            CoreOrder::RowMajor => sequence.sort_by_key(|core| (core.y, core.x)),
            CoreOrder::ColumnMajor => sequence.sort_by_key(|core| (core.x, core.y)),
        }

        Self {
            all_cores: shard_grid.clone(),
            group1: shard_grid.clone(),
            group2: CoreRangeSet::empty(),
            units_per_core_group1: units_per_shard,
            units_per_core_group2: 0,
            group1_len: sequence.len(),
            sequence,
            order,
        }
    }

    pub fn num_cores(&self) -> usize {
        self.sequence.len()
    }

    pub fn all_cores(&self) -> &CoreRangeSet {
        &self.all_cores
    }

    pub fn group1(&self) -> &CoreRangeSet {
        &self.group1
    }

    pub fn group2(&self) -> &CoreRangeSet {
        &self.group2
    }

    pub fn units_per_core_group1(&self) -> u32 {
        self.units_per_core_group1
    }

    pub fn units_per_core_group2(&self) -> u32 {
        self.units_per_core_group2
    }

    pub fn order(&self) -> CoreOrder {
        self.order
    }

    /// Whether the split has a cliff core with a different unit count.
    pub fn has_cliff(&self) -> bool {
        !self.group2.is_empty()
    }

    /// Sum of units over all active cores.
    pub fn total_units(&self) -> u64 {
        let group2_len = self.sequence.len() - self.group1_len;
        u64::from(self.units_per_core_group1) * self.group1_len as u64
            + u64::from(self.units_per_core_group2) * group2_len as u64
    }

    /// The `index`-th active core in assignment order.
    pub fn core_at(&self, index: usize) -> Result<CoreCoord> {
        let num_cores = self.sequence.len();
        ensure!(index < num_cores, CoreIndexOutOfBoundsSnafu { index, num_cores });
        Ok(self.sequence[index])
    }

    /// Active cores with their unit counts, in assignment order.
    pub fn cores(&self) -> impl Iterator<Item = (CoreCoord, u32)> + '_ {
        self.sequence.iter().enumerate().map(|(i, &core)| {
            let units = if i < self.group1_len { self.units_per_core_group1 } else { self.units_per_core_group2 };
            (core, units)
        })
    }

    /// Units assigned to `core`, or `None` if the core is inactive.
    pub fn units_for(&self, core: CoreCoord) -> Option<u32> {
        if self.group1.core_coord_in_core_ranges(core) {
            Some(self.units_per_core_group1)
        } else if self.group2.core_coord_in_core_ranges(core) {
            Some(self.units_per_core_group2)
        } else {
            None
        }
    }
}

/// Split `total_units` across the cores of a `grid_size` grid.
///
/// Every active core receives `ceil(total / available)` units except possibly
/// the last one, which receives the remainder. When the division is exact
/// `group2` is empty. With less work than cores, only the first `total_units`
/// cores participate and the rest are left out of `all_cores` entirely.
pub fn split_work_to_cores(grid_size: CoreCoord, total_units: u32, order: CoreOrder) -> Result<WorkSplit> {
    if total_units == 0 {
        return Ok(WorkSplit::empty(order));
    }

    let available = grid_size.num_cores();
    ensure!(available > 0, EmptyGridSnafu { units: total_units, grid: grid_size });

    let total = total_units as usize;
    let target_per_core = total.div_ceil(available);
    let num_cores = total.div_ceil(target_per_core);
    let cliff = total - (num_cores - 1) * target_per_core;

    let (group1_len, units_group2) = if cliff == target_per_core { (num_cores, 0) } else { (num_cores - 1, cliff) };

    let all_cores = order.span(0, num_cores, grid_size)?;
    let group1 = order.span(0, group1_len, grid_size)?;
    let group2 = order.span(group1_len, num_cores - group1_len, grid_size)?;
    let sequence = (0..num_cores).map(|i| order.core_at_unchecked(i, grid_size)).collect();

    Ok(WorkSplit {
        all_cores,
        group1,
        group2,
        units_per_core_group1: target_per_core as u32,
        units_per_core_group2: units_group2 as u32,
        sequence,
        group1_len,
        order,
    })
}

/// The first `count` cores of the grid in `order`.
pub fn num_cores_to_core_range_set(count: usize, grid_size: CoreCoord, order: CoreOrder) -> Result<CoreRangeSet> {
    order.span(0, count, grid_size)
}
