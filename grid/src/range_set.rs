//! Sets of non-overlapping core ranges.

use std::collections::BTreeSet;
use std::fmt;

use snafu::ensure;

use crate::coord::CoreCoord;
use crate::error::{OverlappingRangesSnafu, Result};
use crate::range::CoreRange;

/// Set of pairwise disjoint core ranges.
///
/// Construction fails with [`Error::OverlappingRanges`](crate::Error::OverlappingRanges)
/// if any two ranges share a core, so every value of this type upholds the
/// invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CoreRangeSet {
    ranges: BTreeSet<CoreRange>,
}

impl CoreRangeSet {
    pub fn new(ranges: impl IntoIterator<Item = CoreRange>) -> Result<Self> {
        let ranges: BTreeSet<CoreRange> = ranges.into_iter().collect();
        check_disjoint(&ranges)?;
        Ok(Self { ranges })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge additional ranges into a copy of this set.
    ///
    /// Ranges wholly contained by another range are dropped, then pairs sharing
    /// a full edge are fused until no pair merges. This is an adjacency merge,
    /// not a minimal rectangle cover: two rectangles that only line up
    /// partially stay separate. If the inputs overlap without either containing
    /// the other or merging cleanly the result is rejected like any other
    /// overlapping set.
    pub fn merge(&self, more: impl IntoIterator<Item = CoreRange>) -> Result<Self> {
        let unique: BTreeSet<CoreRange> = self.ranges.iter().copied().chain(more).collect();
        let mut candidates: Vec<CoreRange> = unique.into_iter().collect();

        loop {
            drop_contained(&mut candidates);
            if !merge_one_pair(&mut candidates) {
                break;
            }
        }

        Self::new(candidates)
    }

    /// Union with another set.
    pub fn merge_set(&self, other: &CoreRangeSet) -> Result<Self> {
        self.merge(other.ranges.iter().copied())
    }

    /// Whether `core` belongs to any range of the set. Linear in the number of ranges.
    pub fn core_coord_in_core_ranges(&self, core: CoreCoord) -> bool {
        self.ranges.iter().any(|range| range.contains_core(core))
    }

    pub fn ranges(&self) -> &BTreeSet<CoreRange> {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of cores across all ranges.
    pub fn num_cores(&self) -> usize {
        self.ranges.iter().map(CoreRange::size).sum()
    }

    /// Smallest range enclosing every core of the set.
    pub fn bounding_box(&self) -> Option<CoreRange> {
        let first = self.ranges.first()?;
        let (mut lo, mut hi) = (first.start(), first.end());
        for range in &self.ranges {
            lo = CoreCoord::new(lo.x.min(range.start().x), lo.y.min(range.start().y));
            hi = CoreCoord::new(hi.x.max(range.end().x), hi.y.max(range.end().y));
        }
        Some(CoreRange::from_corners(lo, hi))
    }

    /// Whether every core of `range` is in the set.
    pub fn contains_range(&self, range: &CoreRange) -> bool {
        if self.ranges.iter().any(|own| own.contains(range)) {
            return true;
        }
        range.cores().all(|core| self.core_coord_in_core_ranges(core))
    }

    /// Whether any core belongs to both sets.
    pub fn intersects_set(&self, other: &CoreRangeSet) -> bool {
        self.ranges.iter().any(|a| other.ranges.iter().any(|b| a.intersects(b).is_some()))
    }

    /// All cores, range by range in set order, each range x fastest.
    pub fn cores(&self) -> impl Iterator<Item = CoreCoord> + '_ {
        self.ranges.iter().flat_map(CoreRange::cores)
    }
}

impl From<CoreRange> for CoreRangeSet {
    fn from(range: CoreRange) -> Self {
        Self { ranges: BTreeSet::from([range]) }
    }
}

impl<'a> IntoIterator for &'a CoreRangeSet {
    type Item = &'a CoreRange;
    type IntoIter = std::collections::btree_set::Iter<'a, CoreRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

impl fmt::Display for CoreRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{range}")?;
        }
        f.write_str("}")
    }
}

/// Pairwise bounding-box test over all four half-planes.
fn check_disjoint(ranges: &BTreeSet<CoreRange>) -> Result<()> {
    for (i, first) in ranges.iter().enumerate() {
        for second in ranges.iter().skip(i + 1) {
            let left_of = first.end().x < second.start().x;
            let right_of = first.start().x > second.end().x;
            let above = first.end().y < second.start().y;
            let below = first.start().y > second.end().y;
            ensure!(
                left_of || right_of || above || below,
                OverlappingRangesSnafu { first: *first, second: *second }
            );
        }
    }
    Ok(())
}

fn drop_contained(candidates: &mut Vec<CoreRange>) {
    let snapshot = candidates.clone();
    candidates.retain(|range| !snapshot.iter().any(|other| other != range && other.contains(range)));
}

/// Fuse the first mergeable pair. Returns whether anything changed.
fn merge_one_pair(candidates: &mut Vec<CoreRange>) -> bool {
    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            if let Some(merged) = candidates[i].merge(&candidates[j]) {
                candidates[i] = merged;
                candidates.remove(j);
                return true;
            }
        }
    }
    false
}
