use std::collections::BTreeSet;

use crate::{CoreCoord, CoreRange, Error};

fn range(x0: usize, y0: usize, x1: usize, y1: usize) -> CoreRange {
    CoreRange::new(CoreCoord::new(x0, y0), CoreCoord::new(x1, y1)).unwrap()
}

#[test]
fn test_inverted_range_rejected() {
    let result = CoreRange::new(CoreCoord::new(2, 0), CoreCoord::new(1, 3));
    assert!(matches!(result, Err(Error::InvalidRange { .. })));

    let result = CoreRange::new(CoreCoord::new(0, 2), CoreCoord::new(1, 1));
    assert!(matches!(result, Err(Error::InvalidRange { .. })));
}

#[test]
fn test_grid_range() {
    let full = CoreRange::grid(CoreCoord::new(12, 9)).unwrap();
    assert_eq!(full, range(0, 0, 11, 8));
    assert_eq!(full.size(), 108);

    assert!(CoreRange::grid(CoreCoord::new(0, 9)).is_err());
}

#[test]
fn test_size_and_containment() {
    let outer = range(0, 0, 3, 3);
    let inner = range(1, 1, 2, 2);

    assert_eq!(outer.size(), 16);
    assert_eq!(CoreRange::single(CoreCoord::new(5, 5)).size(), 1);
    assert!(outer.contains(&inner));
    assert!(!inner.contains(&outer));
    assert!(outer.contains(&outer));
    assert!(outer.contains_core(CoreCoord::new(3, 0)));
    assert!(!outer.contains_core(CoreCoord::new(4, 0)));
}

#[test]
fn test_intersects() {
    let a = range(0, 0, 2, 2);
    let b = range(1, 1, 4, 4);
    assert_eq!(a.intersects(&b), Some(range(1, 1, 2, 2)));
    assert_eq!(b.intersects(&a), Some(range(1, 1, 2, 2)));

    let far = range(3, 0, 4, 0);
    assert_eq!(a.intersects(&far), None);
}

#[test]
fn test_merge_adjacent_rows() {
    let top = range(0, 0, 3, 0);
    let bottom = range(0, 1, 3, 1);
    assert_eq!(top.merge(&bottom), Some(range(0, 0, 3, 1)));
    assert_eq!(bottom.merge(&top), Some(range(0, 0, 3, 1)));
}

#[test]
fn test_merge_overlapping_columns() {
    let left = range(0, 2, 2, 5);
    let right = range(2, 2, 6, 5);
    assert_eq!(left.merge(&right), Some(range(0, 2, 6, 5)));
}

#[test]
fn test_merge_rejects_misaligned_and_gapped() {
    // L-shape: same start row, different heights.
    assert_eq!(range(0, 0, 1, 1).merge(&range(2, 0, 3, 0)), None);
    // Aligned but separated by an empty column.
    assert_eq!(range(0, 0, 0, 3).merge(&range(2, 0, 2, 3)), None);
}

#[test]
fn test_diff_center_hole() {
    let outer = range(0, 0, 3, 3);
    let pieces = outer.diff(&range(1, 1, 2, 2));

    let expected = BTreeSet::from([range(0, 0, 0, 3), range(3, 0, 3, 3), range(1, 0, 2, 0), range(1, 3, 2, 3)]);
    assert_eq!(pieces, expected);
    assert_eq!(pieces.iter().map(CoreRange::size).sum::<usize>(), 12);
}

#[test]
fn test_diff_disjoint_and_covering() {
    let a = range(0, 0, 1, 1);
    assert_eq!(a.diff(&range(5, 5, 6, 6)), BTreeSet::from([a]));
    assert!(a.diff(&range(0, 0, 4, 4)).is_empty());
}

#[test]
fn test_cores_iterate_x_fastest() {
    let cores: Vec<_> = range(1, 0, 2, 1).cores().collect();
    assert_eq!(
        cores,
        vec![CoreCoord::new(1, 0), CoreCoord::new(2, 0), CoreCoord::new(1, 1), CoreCoord::new(2, 1)]
    );
}

#[test]
fn test_display() {
    assert_eq!(range(0, 0, 1, 2).to_string(), "[(x=0,y=0) - (x=1,y=2)]");
}
