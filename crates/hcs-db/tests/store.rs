//! Store round-trip and migration behavior against a real database.

use std::collections::BTreeMap;

use hcs_core::ids::{generate_uuid, object_id};
use hcs_core::roi::{BoundingBox, Point};
use hcs_core::settings::{AnalyzeSettings, Class};
use hcs_core::{ClassId, GroupInformation, ObjectList, OmeInfo, PlaneId, Roi};
use hcs_db::{Database, DbValue, PreparedImage};

fn test_settings() -> AnalyzeSettings {
    let mut settings = AnalyzeSettings::default();
    settings.project_settings.experiment_settings.experiment_id = generate_uuid();
    settings.project_settings.experiment_settings.experiment_name = "test".into();
    settings.project_settings.classes = vec![
        Class { class_id: ClassId(1), name: "nucleus".into(), ..Default::default() },
        Class { class_id: ClassId(2), name: "spot".into(), ..Default::default() },
    ];
    settings.project_settings.plate.image_folder = "/data/images".into();
    settings
}

fn test_roi(image_id: u64, class_id: ClassId, seq: u64) -> Roi {
    Roi {
        object_id: object_id(image_id, class_id, seq),
        class_id,
        plane: PlaneId::new(0, 0, 0),
        confidence: 1.0,
        bbox_tile: BoundingBox { x: 0, y: 0, width: 2, height: 2 },
        bbox: BoundingBox { x: 0, y: 0, width: 2, height: 2 },
        centroid_tile: Point { x: 1, y: 1 },
        centroid: Point { x: 1, y: 1 },
        mask: vec![1, 1, 1, 1],
        contour: vec![Point { x: 0, y: 0 }],
        area_size: 4.0,
        perimeter: 8.0,
        circularity: 0.78,
        ..Default::default()
    }
}

#[test]
fn empty_job_lifecycle_sets_finished_timestamp() {
    let db = Database::open_in_memory().unwrap();
    let settings = test_settings();
    let job_id = db.start_job(&settings, "job-1").unwrap();

    let meta = db.select_experiment().unwrap();
    assert_eq!(
        meta.experiment.experiment_id,
        settings.project_settings.experiment_settings.experiment_id
    );
    assert_eq!(meta.job_id, job_id);
    assert!(meta.time_finished_us.is_none());

    db.finish_job(&job_id).unwrap();
    let meta = db.select_experiment().unwrap();
    assert!(meta.time_finished_us.is_some());
}

#[test]
fn second_experiment_with_distinct_id_is_rejected() {
    let db = Database::open_in_memory().unwrap();
    let settings = test_settings();
    db.insert_experiment(&settings.project_settings.experiment_settings).unwrap();

    let mut other = settings.project_settings.experiment_settings.clone();
    other.experiment_id = generate_uuid();
    let err = db.insert_experiment(&other).unwrap_err();
    assert!(matches!(err, hcs_core::Error::InvalidInput(_)));

    // The same id appends instead.
    assert!(!db
        .insert_experiment(&settings.project_settings.experiment_settings)
        .unwrap());
}

#[test]
fn object_persistence_round_trip() {
    let db = Database::open_in_memory().unwrap();
    let image_id = 4711u64;

    let mut objects = ObjectList::new();
    for seq in 0..5 {
        objects.push(test_roi(image_id, ClassId(1), seq));
    }
    for seq in 0..3 {
        objects.push(test_roi(image_id, ClassId(2), 100 + seq));
    }
    db.insert_objects(image_id, &objects).unwrap();
    db.set_image_processed(image_id).unwrap();

    assert_eq!(db.count_objects(image_id, None).unwrap(), 8);
    assert_eq!(db.count_objects(image_id, Some(ClassId(1))).unwrap(), 5);
    assert_eq!(db.count_objects(image_id, Some(ClassId(2))).unwrap(), 3);
}

#[test]
fn parent_class_id_matches_parent_class_after_insert() {
    let db = Database::open_in_memory().unwrap();
    let image_id = 42u64;

    let parent = test_roi(image_id, ClassId(1), 0);
    let mut child = test_roi(image_id, ClassId(2), 1);
    child.parent_object_id = parent.object_id;

    let mut objects = ObjectList::new();
    objects.push(parent);
    objects.push(child);
    db.insert_objects(image_id, &objects).unwrap();

    let rows = db
        .select_rows(
            "SELECT meas_parent_class_id FROM objects WHERE meas_parent_object_id != 0",
            &[],
            |row| row.get::<_, u16>(0),
        )
        .unwrap();
    assert_eq!(rows, vec![1]);
}

#[test]
fn migration_repairs_parent_class_and_rebuilds_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.db");
    let image_id = 42u64;
    let (parent_id, child_id);

    {
        let db = Database::open(&path).unwrap();
        let settings = test_settings();
        db.start_job(&settings, "job-1").unwrap();

        let parent = test_roi(image_id, ClassId(1), 0);
        let mut child = test_roi(image_id, ClassId(2), 1);
        child.parent_object_id = parent.object_id;
        parent_id = parent.object_id;
        child_id = child.object_id;

        let mut objects = ObjectList::new();
        objects.push(parent);
        objects.push(child);
        db.insert_objects(image_id, &objects).unwrap();

        // Degrade to the legacy shape: no parent class, no cache row.
        db.execute("UPDATE objects SET meas_parent_class_id = NULL", &[]).unwrap();
        db.execute("DELETE FROM cache_analyze_settings", &[]).unwrap();
    }

    let db = Database::open(&path).unwrap();
    let repaired = db
        .select_rows(
            "SELECT meas_parent_class_id FROM objects WHERE object_id = ?",
            &[DbValue::U64(child_id)],
            |row| row.get::<_, u16>(0),
        )
        .unwrap();
    assert_eq!(repaired, vec![1]);
    assert!(db.has_analyze_settings_cache().unwrap());

    let intersecting = db.select_intersecting_classes().unwrap();
    assert!(intersecting[&ClassId(1)].contains(&ClassId(2)));
    assert_ne!(parent_id, child_id);
}

#[test]
fn prepared_images_round_trip_with_groups() {
    let db = Database::open_in_memory().unwrap();
    let ome = OmeInfo { width: 100, height: 60, ..Default::default() };

    let items = vec![
        PreparedImage {
            path: "/data/images/a/img_01.png".into(),
            relative_path: "a/img_01.png".into(),
            ome: ome.clone(),
            image_id: 1,
            group: GroupInformation {
                group_name: "a".into(),
                group_id: 0,
                image_idx: 1,
                well_pos_x: 1,
                well_pos_y: 1,
            },
        },
        PreparedImage {
            path: "/data/images/a/img_02.png".into(),
            relative_path: "a/img_02.png".into(),
            ome,
            image_id: 2,
            group: GroupInformation {
                group_name: "a".into(),
                group_id: 0,
                image_idx: 2,
                well_pos_x: 1,
                well_pos_y: 1,
            },
        },
    ];
    db.prepare_images(7, &items).unwrap();

    let images = db.select_images().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].image_group_name, "a");

    assert_eq!(db.select_image_id_from_file_name("img_02.png").unwrap(), 2);
    assert!(matches!(
        db.select_image_id_from_file_name("missing.png"),
        Err(hcs_core::Error::NotFound(_))
    ));
}

#[test]
fn colocalizing_classes_share_tracking_ids() {
    let db = Database::open_in_memory().unwrap();
    let image_id = 1u64;

    let mut a = test_roi(image_id, ClassId(1), 0);
    let mut b = test_roi(image_id, ClassId(2), 1);
    a.tracking_id = 99;
    b.tracking_id = 99;
    let c = test_roi(image_id, ClassId(3), 2);

    let mut objects = ObjectList::new();
    objects.push(a);
    objects.push(b);
    objects.push(c);
    db.insert_objects(image_id, &objects).unwrap();

    let sets = db.select_colocalizing_classes().unwrap();
    let expected: std::collections::BTreeSet<ClassId> =
        [ClassId(1), ClassId(2)].into_iter().collect();
    assert!(sets.contains(&expected));
}

#[test]
fn analyze_cache_round_trips_through_json_columns() {
    let db = Database::open_in_memory().unwrap();
    let mut measured: BTreeMap<ClassId, std::collections::BTreeSet<i32>> = BTreeMap::new();
    measured.insert(ClassId(1), [0, 2].into_iter().collect());
    db.set_analyze_settings_cache(
        "job",
        &[ClassId(1), ClassId(2)].into_iter().collect(),
        &measured,
        &BTreeMap::new(),
        &BTreeMap::new(),
    )
    .unwrap();

    assert_eq!(db.select_output_classes().unwrap().len(), 2);
    assert_eq!(db.select_measured_channels().unwrap()[&ClassId(1)].len(), 2);
}
