use crate::{
    CoreCoord, CoreOrder, CoreRange, CoreRangeSet, Error, WorkSplit, num_cores_to_core_range_set, split_work_to_cores,
};
use test_case::test_case;

fn range(x0: usize, y0: usize, x1: usize, y1: usize) -> CoreRange {
    CoreRange::new(CoreCoord::new(x0, y0), CoreCoord::new(x1, y1)).unwrap()
}

#[test]
fn test_exact_split_has_no_cliff() {
    let split = split_work_to_cores(CoreCoord::new(12, 9), 100, CoreOrder::RowMajor).unwrap();

    assert_eq!(split.num_cores(), 100);
    assert_eq!(split.units_per_core_group1(), 1);
    assert_eq!(split.group1().num_cores(), 100);
    assert!(split.group2().is_empty());
    assert!(!split.has_cliff());
    assert_eq!(split.all_cores(), split.group1());
    // Eight full rows and the first four cores of the ninth.
    assert_eq!(split.all_cores(), &CoreRangeSet::new([range(0, 0, 11, 7), range(0, 8, 3, 8)]).unwrap());
}

#[test]
fn test_cliff_core() {
    let split = split_work_to_cores(CoreCoord::new(2, 1), 3, CoreOrder::RowMajor).unwrap();

    assert_eq!(split.num_cores(), 2);
    assert_eq!(split.units_per_core_group1(), 2);
    assert_eq!(split.units_per_core_group2(), 1);
    assert_eq!(split.group1(), &CoreRangeSet::from(range(0, 0, 0, 0)));
    assert_eq!(split.group2(), &CoreRangeSet::from(range(1, 0, 1, 0)));
    assert!(split.has_cliff());
    assert_eq!(split.total_units(), 3);
}

#[test_case(CoreCoord::new(12, 9) ; "full grid")]
#[test_case(CoreCoord::new(1, 1) ; "single core")]
#[test_case(CoreCoord::new(0, 0) ; "empty grid")]
fn test_zero_units(grid: CoreCoord) {
    let split = split_work_to_cores(grid, 0, CoreOrder::RowMajor).unwrap();

    assert_eq!(split.num_cores(), 0);
    assert!(split.all_cores().is_empty());
    assert!(split.group1().is_empty());
    assert!(split.group2().is_empty());
    assert_eq!(split.cores().count(), 0);
}

#[test]
fn test_empty_grid_with_work() {
    let result = split_work_to_cores(CoreCoord::new(0, 4), 7, CoreOrder::RowMajor);
    assert!(matches!(result, Err(Error::EmptyGrid { units: 7, .. })));
}

#[test]
fn test_small_work_leaves_cores_idle() {
    let split = split_work_to_cores(CoreCoord::new(4, 4), 5, CoreOrder::RowMajor).unwrap();

    assert_eq!(split.num_cores(), 5);
    assert!(split.cores().all(|(_, units)| units == 1));
    assert_eq!(split.units_for(CoreCoord::new(0, 1)), Some(1));
    assert_eq!(split.units_for(CoreCoord::new(1, 1)), None);
}

#[test_case(CoreOrder::RowMajor, &[(0, 0), (1, 0), (2, 0), (0, 1)] ; "row major")]
#[test_case(CoreOrder::ColumnMajor, &[(0, 0), (0, 1), (1, 0), (1, 1)] ; "column major")]
fn test_enumeration_order(order: CoreOrder, expected: &[(usize, usize)]) {
    let split = split_work_to_cores(CoreCoord::new(3, 2), 4, order).unwrap();
    let cores: Vec<_> = split.cores().map(|(core, _)| (core.x, core.y)).collect();
    assert_eq!(cores, expected);
    assert_eq!(split.order(), order);
}

#[test]
fn test_cliff_is_last_in_order() {
    // 10 units over 4 cores: 3, 3, 3, 1.
    let split = split_work_to_cores(CoreCoord::new(2, 2), 10, CoreOrder::ColumnMajor).unwrap();
    let assigned: Vec<_> = split.cores().collect();

    assert_eq!(
        assigned,
        vec![
            (CoreCoord::new(0, 0), 3),
            (CoreCoord::new(0, 1), 3),
            (CoreCoord::new(1, 0), 3),
            (CoreCoord::new(1, 1), 1),
        ]
    );
    assert_eq!(split.group2(), &CoreRangeSet::from(range(1, 1, 1, 1)));
}

#[test]
fn test_core_at_bounds() {
    let split = split_work_to_cores(CoreCoord::new(4, 1), 3, CoreOrder::RowMajor).unwrap();
    assert_eq!(split.core_at(2).unwrap(), CoreCoord::new(2, 0));
    assert!(matches!(split.core_at(3), Err(Error::CoreIndexOutOfBounds { index: 3, num_cores: 3 })));
}

#[test_case(CoreOrder::RowMajor, 5, CoreCoord::new(1, 1) ; "row major")]
#[test_case(CoreOrder::ColumnMajor, 5, CoreCoord::new(1, 2) ; "column major")]
fn test_order_core_at(order: CoreOrder, index: usize, expected: CoreCoord) {
    assert_eq!(order.core_at(index, CoreCoord::new(4, 3)).unwrap(), expected);
}

#[test]
fn test_order_core_at_out_of_grid() {
    let result = CoreOrder::RowMajor.core_at(12, CoreCoord::new(4, 3));
    assert!(matches!(result, Err(Error::CoreIndexOutOfBounds { index: 12, num_cores: 12 })));
}

#[test]
fn test_span_partial_lines() {
    // Indices 3..=10 on a 4-wide grid: tail of row 0, all of row 1, head of row 2.
    let set = CoreOrder::RowMajor.span(3, 8, CoreCoord::new(4, 3)).unwrap();
    assert_eq!(set, CoreRangeSet::new([range(3, 0, 3, 0), range(0, 1, 3, 1), range(0, 2, 2, 2)]).unwrap());
}

#[test]
fn test_span_out_of_grid() {
    let result = CoreOrder::RowMajor.span(10, 3, CoreCoord::new(4, 3));
    assert!(matches!(result, Err(Error::CoreIndexOutOfBounds { index: 12, .. })));
}

#[test]
fn test_num_cores_to_core_range_set() {
    let set = num_cores_to_core_range_set(6, CoreCoord::new(4, 4), CoreOrder::RowMajor).unwrap();
    assert_eq!(set, CoreRangeSet::new([range(0, 0, 3, 0), range(0, 1, 1, 1)]).unwrap());

    let set = num_cores_to_core_range_set(6, CoreCoord::new(4, 4), CoreOrder::ColumnMajor).unwrap();
    assert_eq!(set, CoreRangeSet::new([range(0, 0, 0, 3), range(1, 0, 1, 1)]).unwrap());
}

#[test]
fn test_from_shard_grid() {
    let shards = CoreRangeSet::new([range(0, 0, 1, 0), range(0, 1, 1, 1)]).unwrap();
    let split = WorkSplit::from_shard_grid(&shards, 8, CoreOrder::RowMajor);

    assert_eq!(split.num_cores(), 4);
    assert_eq!(split.total_units(), 32);
    assert!(!split.has_cliff());
    let cores: Vec<_> = split.cores().map(|(core, _)| core).collect();
    assert_eq!(
        cores,
        vec![CoreCoord::new(0, 0), CoreCoord::new(1, 0), CoreCoord::new(0, 1), CoreCoord::new(1, 1)]
    );

    let split = WorkSplit::from_shard_grid(&shards, 8, CoreOrder::ColumnMajor);
    let cores: Vec<_> = split.cores().map(|(core, _)| core).collect();
    assert_eq!(
        cores,
        vec![CoreCoord::new(0, 0), CoreCoord::new(0, 1), CoreCoord::new(1, 0), CoreCoord::new(1, 1)]
    );
}
