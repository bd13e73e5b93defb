use crate::{CoreCoord, CoreRange, CoreRangeSet, Error};

fn range(x0: usize, y0: usize, x1: usize, y1: usize) -> CoreRange {
    CoreRange::new(CoreCoord::new(x0, y0), CoreCoord::new(x1, y1)).unwrap()
}

#[test]
fn test_overlapping_ranges_rejected() {
    let result = CoreRangeSet::new([range(0, 0, 1, 1), range(1, 1, 2, 2)]);
    match result {
        Err(Error::OverlappingRanges { first, second }) => {
            assert_eq!(first, range(0, 0, 1, 1));
            assert_eq!(second, range(1, 1, 2, 2));
        }
        other => panic!("expected overlap error, got {other:?}"),
    }
}

#[test]
fn test_touching_ranges_accepted() {
    let set = CoreRangeSet::new([range(0, 0, 1, 1), range(2, 0, 3, 1), range(0, 2, 3, 2)]).unwrap();
    assert_eq!(set.ranges().len(), 3);
    assert_eq!(set.num_cores(), 12);
}

#[test]
fn test_duplicate_ranges_collapse() {
    let set = CoreRangeSet::new([range(0, 0, 1, 1), range(0, 0, 1, 1)]).unwrap();
    assert_eq!(set.ranges().len(), 1);
}

#[test]
fn test_membership() {
    let set = CoreRangeSet::new([range(0, 0, 1, 0), range(4, 4, 5, 5)]).unwrap();
    assert!(set.core_coord_in_core_ranges(CoreCoord::new(1, 0)));
    assert!(set.core_coord_in_core_ranges(CoreCoord::new(5, 4)));
    assert!(!set.core_coord_in_core_ranges(CoreCoord::new(2, 0)));
    assert!(!CoreRangeSet::empty().core_coord_in_core_ranges(CoreCoord::new(0, 0)));
}

#[test]
fn test_merge_drops_contained_then_fuses() {
    let set = CoreRangeSet::from(range(0, 0, 1, 0));
    let merged = set.merge([range(0, 1, 1, 1), range(0, 0, 0, 0)]).unwrap();

    assert_eq!(merged, CoreRangeSet::from(range(0, 0, 1, 1)));
}

#[test]
fn test_merge_chains_until_stable() {
    let rows = (0..4).map(|y| range(0, y, 7, y));
    let merged = CoreRangeSet::empty().merge(rows).unwrap();

    assert_eq!(merged.ranges().len(), 1);
    assert_eq!(merged.bounding_box(), Some(range(0, 0, 7, 3)));
}

#[test]
fn test_merge_keeps_misaligned_pieces() {
    let merged = CoreRangeSet::empty().merge([range(0, 0, 1, 1), range(2, 0, 2, 0)]).unwrap();
    assert_eq!(merged.ranges().len(), 2);
    assert_eq!(merged.num_cores(), 5);
}

#[test]
fn test_merge_rejects_partial_overlap() {
    let set = CoreRangeSet::from(range(0, 0, 2, 2));
    let result = set.merge([range(1, 1, 4, 3)]);
    assert!(matches!(result, Err(Error::OverlappingRanges { .. })));
}

#[test]
fn test_merge_set() {
    let a = CoreRangeSet::from(range(0, 0, 3, 0));
    let b = CoreRangeSet::from(range(4, 0, 7, 0));
    assert_eq!(a.merge_set(&b).unwrap(), CoreRangeSet::from(range(0, 0, 7, 0)));
}

#[test]
fn test_bounding_box_and_containment() {
    let set = CoreRangeSet::new([range(0, 0, 0, 1), range(1, 0, 1, 1), range(5, 3, 5, 3)]).unwrap();
    assert_eq!(set.bounding_box(), Some(range(0, 0, 5, 3)));
    assert_eq!(CoreRangeSet::empty().bounding_box(), None);

    assert!(set.contains_range(&range(0, 0, 1, 1)));
    assert!(!set.contains_range(&range(0, 0, 2, 1)));
}

#[test]
fn test_intersects_set() {
    let a = CoreRangeSet::new([range(0, 0, 1, 1), range(6, 6, 7, 7)]).unwrap();
    let b = CoreRangeSet::from(range(7, 7, 9, 9));
    let c = CoreRangeSet::from(range(2, 2, 5, 5));

    assert!(a.intersects_set(&b));
    assert!(!a.intersects_set(&c));
}

#[test]
fn test_cores_follow_set_order() {
    let set = CoreRangeSet::new([range(2, 0, 2, 1), range(0, 0, 1, 0)]).unwrap();
    let cores: Vec<_> = set.cores().collect();
    assert_eq!(
        cores,
        vec![CoreCoord::new(0, 0), CoreCoord::new(1, 0), CoreCoord::new(2, 0), CoreCoord::new(2, 1)]
    );
}

#[test]
fn test_display() {
    let set = CoreRangeSet::new([range(0, 0, 0, 0), range(1, 0, 1, 0)]).unwrap();
    assert_eq!(set.to_string(), "{[(x=0,y=0) - (x=0,y=0)], [(x=1,y=0) - (x=1,y=0)]}");
}
