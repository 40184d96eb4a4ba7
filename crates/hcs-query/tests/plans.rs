//! Query plans and dashboard alignment against a live in-memory store.

use std::collections::BTreeSet;

use hcs_core::ids::object_id;
use hcs_core::roi::{BoundingBox, Point};
use hcs_core::settings::{
    ColumnIdx, ColumnKey, ColumnNames, Measurement, ObjectFilter, ResultsSettings, Stats,
};
use hcs_core::{ClassId, GroupInformation, ObjectList, OmeInfo, PlaneId, Roi};
use hcs_db::{Database, PreparedImage};
use hcs_query::{CellColor, Dashboard, DashboardType, StatsPerImage, Table, TableCell};

fn roi_at(image_id: u64, class_id: ClassId, seq: u64, x: i32, y: i32) -> Roi {
    Roi {
        object_id: object_id(image_id, class_id, seq),
        class_id,
        plane: PlaneId::new(0, 0, 0),
        confidence: 1.0,
        bbox_tile: BoundingBox { x, y, width: 1, height: 1 },
        bbox: BoundingBox { x, y, width: 1, height: 1 },
        centroid_tile: Point { x, y },
        centroid: Point { x, y },
        mask: vec![1],
        contour: vec![Point { x: 0, y: 0 }],
        area_size: 1.0,
        perimeter: 4.0,
        circularity: 1.0,
        ..Default::default()
    }
}

fn prepare_one_image(db: &Database, image_id: u64, width: u32, height: u32) {
    let ome = OmeInfo { width, height, ..Default::default() };
    db.prepare_images(
        0,
        &[PreparedImage {
            path: format!("/data/img_{image_id}.png").into(),
            relative_path: format!("img_{image_id}.png"),
            ome,
            image_id,
            group: GroupInformation {
                group_name: "w1".into(),
                group_id: 0,
                image_idx: 1,
                well_pos_x: 1,
                well_pos_y: 1,
            },
        }],
    )
    .unwrap();
}

fn count_settings(image_id: u64) -> ResultsSettings {
    let mut settings = ResultsSettings::default();
    settings.add_column(
        ColumnIdx::new(0, 0),
        ColumnKey {
            class_id: ClassId(1),
            measure: Measurement::Count,
            stats: Stats::Sum,
            names: ColumnNames { class_name: "cell".into(), ..Default::default() },
            ..Default::default()
        },
    );
    let mut filter = ObjectFilter::default();
    filter.image_ids.insert(image_id);
    settings.set_object_filter(filter);
    settings
}

#[test]
fn heatmap_grid_uses_floor_bucketing() {
    // 1000x1000 image, density area 250: the grid is 4x4; (260, 10) lands
    // in bucket (1, 0), (250, 250) in bucket (1, 1).
    let db = Database::open_in_memory().unwrap();
    let image_id = 1u64;
    prepare_one_image(&db, image_id, 1000, 1000);

    let mut objects = ObjectList::new();
    objects.push(roi_at(image_id, ClassId(1), 0, 260, 10));
    objects.push(roi_at(image_id, ClassId(1), 1, 250, 250));
    db.insert_objects(image_id, &objects).unwrap();

    let mut settings = count_settings(image_id);
    settings.set_density_map_settings(hcs_core::settings::DensityMapSettings {
        density_map_area_size: 250,
    });

    let grids = StatsPerImage::to_heatmap(&db, &settings).unwrap();
    assert_eq!(grids.len(), 1);
    let (_, grid) = &grids[0];

    assert_eq!(grid.nr_of_rows(), 4);
    assert_eq!(grid.column_cells(0).count(), 4);

    let hit = |row: i32, col: i32| grid.cell(row, col).unwrap().value;
    assert_eq!(hit(0, 1), 1.0);
    assert_eq!(hit(1, 1), 1.0);
    assert!(hit(0, 0).is_nan());
    assert!(hit(3, 3).is_nan());
}

#[test]
fn density_map_places_every_object_in_its_bucket() {
    // 1024x512, area 256: grid 4x2; objects at (10,10), (300,260), (800,400)
    // land in (0,0), (1,1), (3,1).
    let db = Database::open_in_memory().unwrap();
    let image_id = 2u64;
    prepare_one_image(&db, image_id, 1024, 512);

    let mut objects = ObjectList::new();
    objects.push(roi_at(image_id, ClassId(1), 0, 10, 10));
    objects.push(roi_at(image_id, ClassId(1), 1, 300, 260));
    objects.push(roi_at(image_id, ClassId(1), 2, 800, 400));
    db.insert_objects(image_id, &objects).unwrap();

    let settings = count_settings(image_id);
    let grids = StatsPerImage::to_heatmap(&db, &settings).unwrap();
    let (_, grid) = &grids[0];

    assert_eq!(grid.nr_of_rows(), 2);
    for (col, row) in [(0, 0), (1, 1), (3, 1)] {
        assert_eq!(grid.cell(row, col).unwrap().value, 1.0, "bucket ({col},{row})");
    }
    assert!(grid.cell(0, 1).unwrap().value.is_nan());
}

#[test]
fn per_image_list_has_one_row_per_object() {
    let db = Database::open_in_memory().unwrap();
    let image_id = 3u64;
    prepare_one_image(&db, image_id, 100, 100);

    let mut objects = ObjectList::new();
    for seq in 0..4 {
        objects.push(roi_at(image_id, ClassId(1), seq, 10 + seq as i32, 10));
    }
    db.insert_objects(image_id, &objects).unwrap();

    let mut settings = ResultsSettings::default();
    settings.add_column(
        ColumnIdx::new(0, 0),
        ColumnKey {
            class_id: ClassId(1),
            measure: Measurement::AreaSize,
            stats: Stats::Avg,
            names: ColumnNames { class_name: "cell".into(), ..Default::default() },
            ..Default::default()
        },
    );
    let mut filter = ObjectFilter::default();
    filter.image_ids.insert(image_id);
    settings.set_object_filter(filter);

    let table = StatsPerImage::to_table(&db, &settings).unwrap();
    assert_eq!(table.nr_of_rows(), 4);
    let cell = table.cell(0, 0).unwrap();
    assert_eq!(cell.value, 1.0);
    assert_ne!(cell.object_id, 0);
}

#[test]
fn slice_mode_produces_one_row_per_t_stack() {
    let db = Database::open_in_memory().unwrap();
    let image_id = 4u64;
    prepare_one_image(&db, image_id, 100, 100);

    let mut objects = ObjectList::new();
    for t_stack in 0..3u32 {
        let mut roi = roi_at(image_id, ClassId(1), u64::from(t_stack), 10, 10);
        roi.plane = PlaneId::new(0, 0, t_stack);
        objects.push(roi);
    }
    db.insert_objects(image_id, &objects).unwrap();

    let mut settings = count_settings(image_id);
    let mut filter = settings.filter().clone();
    filter.t_stack_handling = hcs_core::settings::TStackHandling::Slice;
    settings.set_object_filter(filter);

    let (table, _) = hcs_query::StatsPerGroup::to_table(
        &db,
        &settings,
        hcs_query::Grouping::ByPlate,
    )
    .unwrap();
    assert_eq!(table.nr_of_rows(), 3);
    for row in 0..3 {
        assert_eq!(table.cell(row, 0).unwrap().value, 1.0, "row {row}");
    }
}

fn coloc_input_table() -> Table {
    let mut table = Table::new();
    table.set_col_settings(
        0,
        ColumnKey {
            class_id: ClassId(1),
            measure: Measurement::AreaSize,
            names: ColumnNames { class_name: "spots-a".into(), ..Default::default() },
            ..Default::default()
        },
    );
    table.set_col_settings(
        1,
        ColumnKey {
            class_id: ClassId(2),
            measure: Measurement::AreaSize,
            names: ColumnNames { class_name: "spots-b".into(), ..Default::default() },
            ..Default::default()
        },
    );

    let mut cell = |object_id: u64, tracking_id: u64| TableCell {
        value: 1.0,
        object_id,
        object_id_real: object_id,
        tracking_id,
        is_valid: true,
        ..Default::default()
    };

    // Class 1: objects tracked 100 and 200; class 2: objects tracked 200
    // and 100 in reverse order.
    table.set_cell(0, 0, cell(11, 100));
    table.set_cell(1, 0, cell(12, 200));
    table.set_cell(0, 1, cell(21, 200));
    table.set_cell(1, 1, cell(22, 100));
    table
}

#[test]
fn coloc_dashboard_aligns_rows_by_tracking_id() {
    let table = coloc_input_table();
    let coloc_classes: BTreeSet<BTreeSet<ClassId>> =
        BTreeSet::from([BTreeSet::from([ClassId(1), ClassId(2)])]);

    let tabs = Dashboard::convert(&table, &coloc_classes, true);
    let coloc = tabs
        .iter()
        .find(|(key, _)| key.dashboard_type == DashboardType::Coloc)
        .map(|(_, table)| table)
        .expect("coloc dashboard exists");

    // Column layout: [id col class1, data class1, id col class2, data class2].
    // Tracking id 100 was seen first and owns row 0; id 200 owns row 1.
    let row_of = |col: i32, object_id: u64| -> i32 {
        coloc
            .column_cells(col)
            .find(|(_, c)| c.object_id == object_id)
            .map(|(row, _)| row)
            .unwrap()
    };
    let row_a = row_of(1, 11);
    let row_b = row_of(3, 22);
    assert_eq!(row_a, row_b, "tracking id 100 shares one row");
    assert_eq!(row_of(1, 12), row_of(3, 21), "tracking id 200 shares one row");

    // Backgrounds match within a tracking group and alternate across new ids.
    let bg = |col: i32, object_id: u64| {
        coloc
            .column_cells(col)
            .find(|(_, c)| c.object_id == object_id)
            .map(|(_, c)| c.background)
            .unwrap()
    };
    assert_eq!(bg(1, 11), bg(3, 22));
    assert_eq!(bg(1, 12), bg(3, 21));
    assert_ne!(bg(1, 11), bg(1, 12));
    assert_eq!(bg(1, 11), CellColor::Base);
    assert_eq!(bg(1, 12), CellColor::Alternate);
}

#[test]
fn results_template_covers_everything_the_cache_recorded() {
    let db = Database::open_in_memory().unwrap();
    db.insert_classes(&[
        hcs_core::settings::Class {
            class_id: ClassId(1),
            name: "nucleus".into(),
            ..Default::default()
        },
        hcs_core::settings::Class {
            class_id: ClassId(2),
            name: "spot".into(),
            ..Default::default()
        },
    ])
    .unwrap();

    let mut measured = std::collections::BTreeMap::new();
    measured.insert(ClassId(1), [0i32, 1].into_iter().collect());
    let mut intersecting = std::collections::BTreeMap::new();
    intersecting.insert(ClassId(1), BTreeSet::from([ClassId(2)]));
    let mut distances = std::collections::BTreeMap::new();
    distances.insert(ClassId(1), BTreeSet::from([ClassId(2)]));
    db.set_analyze_settings_cache(
        "job",
        &BTreeSet::from([ClassId(1), ClassId(2)]),
        &measured,
        &intersecting,
        &distances,
    )
    .unwrap();

    let settings = hcs_query::results_settings_from_cache(&db).unwrap();
    // 5 base measures per class, 2 intensity channels, 1 intersection,
    // 1 distance.
    assert_eq!(settings.columns().len(), 5 * 2 + 2 + 1 + 1);
    assert!(settings.columns().values().any(|key| {
        key.measure == hcs_core::settings::Measurement::Intersecting
            && key.intersecting_class == ClassId(2)
            && key.names.intersecting_name == "spot"
    }));
}

#[test]
fn group_view_dashboard_has_no_object_id_columns() {
    let mut table = Table::new();
    table.set_col_settings(
        0,
        ColumnKey {
            class_id: ClassId(1),
            measure: Measurement::AreaSize,
            names: ColumnNames { class_name: "cell".into(), ..Default::default() },
            ..Default::default()
        },
    );
    let mut cell = TableCell::new(2.0);
    cell.object_id = 77; // group/image id in rollups
    table.set_cell(0, 0, cell);

    let tabs = Dashboard::convert(&table, &BTreeSet::new(), false);
    let normal = &tabs[&hcs_query::TabWindowKey {
        dashboard_type: DashboardType::Normal,
        key: 1,
    }];
    // Only the data column exists; no base32 id column is injected.
    assert_eq!(normal.columns().len(), 1);
    assert_eq!(normal.cell(0, 0).unwrap().value, 2.0);
    assert!(!normal.cell(0, 0).unwrap().is_object_id_cell);
}

#[test]
fn normal_dashboard_gets_object_id_column_and_parent_alternation() {
    let mut table = Table::new();
    table.set_col_settings(
        0,
        ColumnKey {
            class_id: ClassId(1),
            measure: Measurement::AreaSize,
            names: ColumnNames { class_name: "cell".into(), ..Default::default() },
            ..Default::default()
        },
    );
    let mk = |object_id: u64, parent: u64| TableCell {
        value: 1.0,
        object_id,
        object_id_real: object_id,
        parent_object_id: parent,
        is_valid: true,
        ..Default::default()
    };
    // Two children of parent 5, then an orphan.
    table.set_cell(0, 0, mk(11, 5));
    table.set_cell(1, 0, mk(12, 5));
    table.set_cell(2, 0, mk(13, 0));

    let tabs = Dashboard::convert(&table, &BTreeSet::new(), true);
    let normal = &tabs[&hcs_query::TabWindowKey {
        dashboard_type: DashboardType::Normal,
        key: 1,
    }];

    // Column 0 is the base32 object id column, column 1 the data.
    let id_cells: Vec<_> = normal.column_cells(0).map(|(_, c)| c.clone()).collect();
    assert_eq!(id_cells.len(), 3);
    assert!(id_cells.iter().all(|c| c.is_object_id_cell));
    assert!(matches!(
        id_cells[0].background,
        CellColor::BaseAccent | CellColor::AlternateAccent
    ));

    // Parent group 5 keeps one tone, the orphan toggles to the other.
    let data: Vec<_> = normal.column_cells(1).map(|(_, c)| c.clone()).collect();
    assert_eq!(data[0].background, data[1].background);
    assert_ne!(data[0].background, data[2].background);
}
