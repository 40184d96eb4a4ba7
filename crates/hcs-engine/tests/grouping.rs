//! Group assignment properties: idempotence, well allocation, and the
//! filename regex capture conventions.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use hcs_core::settings::GroupBy;
use hcs_engine::FileGrouper;

#[test]
fn same_filename_always_maps_to_the_same_group_and_well() {
    let grouper = FileGrouper::new(GroupBy::Directory, "").unwrap();
    let first = grouper.get_group_for_filename(Path::new("/data/well_a/img_1.png"));
    for _ in 0..10 {
        let again = grouper.get_group_for_filename(Path::new("/data/well_a/img_9.png"));
        assert_eq!(again.group_id, first.group_id);
        assert_eq!(again.well_pos_x, first.well_pos_x);
        assert_eq!(again.well_pos_y, first.well_pos_y);
    }
}

#[test]
fn concurrent_callers_see_consistent_assignments() {
    let grouper = Arc::new(FileGrouper::new(GroupBy::Directory, "").unwrap());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let grouper = grouper.clone();
        handles.push(std::thread::spawn(move || {
            let mut seen = Vec::new();
            for group in 0..16 {
                let path = format!("/data/group_{group:02}/img.png");
                let info = grouper.get_group_for_filename(Path::new(&path));
                seen.push((info.group_name.clone(), info.group_id, info.well_pos_x, info.well_pos_y));
            }
            seen
        }));
    }
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    // Every thread observed the identical name -> (id, well) mapping.
    for window in results.windows(2) {
        assert_eq!(window[0], window[1]);
    }
}

#[test]
fn well_allocation_is_distinct_inside_the_24x16_grid() {
    let grouper = FileGrouper::new(GroupBy::Directory, "").unwrap();
    let mut wells = BTreeSet::new();
    for group in 0..384 {
        let path = format!("/data/g{group:03}/img.png");
        let info = grouper.get_group_for_filename(Path::new(&path));
        assert!((1..=24).contains(&info.well_pos_x), "x out of range: {}", info.well_pos_x);
        assert!((1..=16).contains(&info.well_pos_y), "y out of range: {}", info.well_pos_y);
        assert!(wells.insert((info.well_pos_x, info.well_pos_y)), "well allocated twice");
    }
    assert_eq!(wells.len(), 384);
}

#[test]
fn snake_allocation_walks_columns_first() {
    let grouper = FileGrouper::new(GroupBy::Directory, "").unwrap();
    let first = grouper.get_group_for_filename(Path::new("/a/x.png"));
    assert_eq!((first.well_pos_x, first.well_pos_y), (1, 1));
    for n in 1..24u16 {
        let info = grouper.get_group_for_filename(Path::new(&format!("/g{n}/x.png")));
        assert_eq!((info.well_pos_x, info.well_pos_y), (n + 1, 1));
    }
    let wrapped = grouper.get_group_for_filename(Path::new("/wrap/x.png"));
    assert_eq!((wrapped.well_pos_x, wrapped.well_pos_y), (1, 2));
}

#[test]
fn filename_regex_extracts_group_well_and_index() {
    let grouper = FileGrouper::new(
        GroupBy::Filename,
        r"^(?<grp>[A-Z])(?<row>\d+)_(?<col>\d+)_(?<idx>\d+)\.tif$",
    )
    .unwrap();
    let info = grouper.get_group_for_filename(Path::new("/data/A01_03_7.tif"));
    assert_eq!(info.group_name, "A");
    assert_eq!(info.well_pos_y, 1);
    assert_eq!(info.well_pos_x, 3);
    assert_eq!(info.image_idx, 7);
}

#[test]
fn two_capture_regex_yields_group_and_index_only() {
    let grouper = FileGrouper::new(GroupBy::Filename, r"^(\w+)_(\d+)\.png$").unwrap();
    let info = grouper.get_group_for_filename(Path::new("/data/wellA_5.png"));
    assert_eq!(info.group_name, "wellA");
    assert_eq!(info.image_idx, 5);
    // Coordinates were undefined, so the allocator assigned the first well.
    assert_eq!((info.well_pos_x, info.well_pos_y), (1, 1));
}

#[test]
fn non_matching_filename_falls_back_without_failing() {
    let grouper = FileGrouper::new(GroupBy::Filename, r"^(\d+)-(\d+)$").unwrap();
    let info = grouper.get_group_for_filename(Path::new("/data/unrelated.png"));
    assert_eq!(info.group_name, "");
    // Allocator still hands out a well for the fallback group.
    assert_eq!((info.well_pos_x, info.well_pos_y), (1, 1));
}

#[test]
fn malformed_regex_is_invalid_input() {
    let err = FileGrouper::new(GroupBy::Filename, "([unclosed").unwrap_err();
    assert!(matches!(err, hcs_core::Error::InvalidInput(_)));
}

#[test]
fn image_indices_count_up_when_undefined() {
    let grouper = FileGrouper::new(GroupBy::Directory, "").unwrap();
    let a = grouper.get_group_for_filename(Path::new("/g/a.png"));
    let b = grouper.get_group_for_filename(Path::new("/g/b.png"));
    assert_eq!(a.image_idx, 1);
    assert_eq!(b.image_idx, 2);
}
