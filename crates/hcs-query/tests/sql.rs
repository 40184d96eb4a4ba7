//! Golden-string tests of the SQL generator. The fragment composition is
//! where most query regressions originate; these pin the emitted shapes.

use hcs_core::settings::{
    ColumnIdx, ColumnKey, ColumnNames, Measurement, ObjectFilter, ResultsSettings, Stats,
    TStackHandling,
};
use hcs_core::ClassId;
use hcs_query::{Grouping, PreparedStatement, ResultingTable, StatsPerGroup, StatsPerImage};

fn names(class: &str, intersecting: &str) -> ColumnNames {
    ColumnNames {
        class_name: class.to_string(),
        intersecting_name: intersecting.to_string(),
        ..Default::default()
    }
}

fn settings_with(columns: Vec<ColumnKey>) -> ResultsSettings {
    let mut settings = ResultsSettings::default();
    for (i, key) in columns.into_iter().enumerate() {
        settings.add_column(ColumnIdx::new(0, i as i32), key);
    }
    let mut filter = ObjectFilter::default();
    filter.image_ids.insert(42);
    settings.set_object_filter(filter);
    settings
}

#[test]
fn intersection_statement_builds_the_child_count_cte() {
    // class=A(1) measure=INTERSECTING intersecting=B(2) stat=SUM
    let settings = settings_with(vec![ColumnKey {
        class_id: ClassId(1),
        measure: Measurement::Intersecting,
        stats: Stats::Sum,
        intersecting_class: ClassId(2),
        names: names("a", "b"),
        ..Default::default()
    }]);

    let result = ResultingTable::new(&settings);
    let (query_key, statement) = result.statements().next().unwrap();
    let (sql, _args) =
        StatsPerGroup::to_sql(query_key, settings.filter(), statement, Grouping::ByWell);

    assert!(sql.contains("WITH TblIntersecting AS ("));
    assert!(sql
        .contains("SUM(CASE WHEN ad.class_id = 2 THEN 1 ELSE 0 END) AS recursive_child_count_2"));
    assert!(sql.contains("WHERE ad.meas_parent_class_id = 1"));
    assert!(sql.contains(
        "GROUP BY ad.image_id, ad.class_id, ad.meas_parent_object_id, ad.meas_parent_class_id"
    ));
    assert!(sql.contains("SUM( ti.recursive_child_count_2) AS recursive_child_count_2_SUM"));
    assert!(sql.contains("LEFT JOIN TblIntersecting ti ON ti.image_id=t1.image_id"));
}

#[test]
fn intensity_statement_joins_the_measurement_table_per_channel() {
    // class=A measure=INTENSITY_AVG c=2 z=0 t=0 stat=MEDIAN
    let settings = settings_with(vec![ColumnKey {
        class_id: ClassId(1),
        measure: Measurement::IntensityAvg,
        stats: Stats::Median,
        cross_channel_c: 2,
        names: names("a", ""),
        ..Default::default()
    }]);

    let result = ResultingTable::new(&settings);
    let (query_key, statement) = result.statements().next().unwrap();
    let (sql, _args) =
        StatsPerImage::to_sql_table(query_key, settings.filter(), statement).unwrap();

    assert!(sql.contains(
        "LEFT JOIN object_measurements tj2 ON t1.object_id=tj2.object_id \
         AND t1.image_id=tj2.image_id AND tj2.meas_stack_c=2 \
         AND tj2.meas_stack_z=0 AND tj2.meas_stack_t=0"
    ));
    assert!(sql.contains("MEDIAN( tj2.meas_intensity_avg) AS meas_intensity_avg_MEDIAN_2"));

    // The heatmap wrapper aggregates the inner alias again.
    let outer = statement.create_stats_query(true, false, "ANY_VALUE", None);
    assert!(outer.contains("MEDIAN( meas_intensity_avg_MEDIAN_2) AS meas_intensity_avg_MEDIAN_2"));
}

#[test]
fn distance_targets_get_separate_statements() {
    // Two centroid-centroid distance requests from A to B and from A to C.
    let settings = settings_with(vec![
        ColumnKey {
            class_id: ClassId(1),
            measure: Measurement::DistanceCenterToCenter,
            stats: Stats::Avg,
            intersecting_class: ClassId(2),
            names: names("a", "b"),
            ..Default::default()
        },
        ColumnKey {
            class_id: ClassId(1),
            measure: Measurement::DistanceCenterToCenter,
            stats: Stats::Avg,
            intersecting_class: ClassId(3),
            names: names("a", "c"),
            ..Default::default()
        },
    ]);

    let result = ResultingTable::new(&settings);
    let keys: Vec<_> = result.statements().map(|(k, _)| *k).collect();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].distance_to_class, ClassId(2));
    assert_eq!(keys[1].distance_to_class, ClassId(3));

    // Distance columns never share a statement with non-distance columns.
    let settings = settings_with(vec![
        ColumnKey {
            class_id: ClassId(1),
            measure: Measurement::AreaSize,
            stats: Stats::Avg,
            names: names("a", ""),
            ..Default::default()
        },
        ColumnKey {
            class_id: ClassId(1),
            measure: Measurement::DistanceCenterToCenter,
            stats: Stats::Avg,
            intersecting_class: ClassId(2),
            names: names("a", "b"),
            ..Default::default()
        },
    ]);
    let result = ResultingTable::new(&settings);
    assert_eq!(result.statements().count(), 2);
}

#[test]
fn duplicate_column_requests_share_one_projected_column() {
    let key = ColumnKey {
        class_id: ClassId(1),
        measure: Measurement::AreaSize,
        stats: Stats::Avg,
        names: names("a", ""),
        ..Default::default()
    };
    let mut statement = PreparedStatement::new(names("a", ""), 0);
    statement.add_column(key.clone());
    let mut renamed = key.clone();
    renamed.names.class_name = "other display name".to_string();
    statement.add_column(renamed);
    assert_eq!(statement.col_size(), 1);
}

#[test]
fn slice_mode_groups_by_image_and_t() {
    let mut settings = settings_with(vec![ColumnKey {
        class_id: ClassId(1),
        measure: Measurement::Count,
        stats: Stats::Sum,
        names: names("a", ""),
        ..Default::default()
    }]);
    let mut filter = settings.filter().clone();
    filter.t_stack_handling = TStackHandling::Slice;
    settings.set_object_filter(filter);

    let result = ResultingTable::new(&settings);
    let (query_key, statement) = result.statements().next().unwrap();
    let (sql, _args) =
        StatsPerGroup::to_sql(query_key, settings.filter(), statement, Grouping::ByPlate);

    assert!(sql.contains("GROUP BY\n t1.image_id, t1.stack_t"));
    assert!(sql.contains("GROUP BY group_id, stack_t_real"));
    assert!(sql.contains("ORDER BY pos_on_plate_y, pos_on_plate_x, stack_t_real"));

    // Individual mode keeps one row per (image, selected t).
    let mut filter = settings.filter().clone();
    filter.t_stack_handling = TStackHandling::Individual;
    settings.set_object_filter(filter);
    let result = ResultingTable::new(&settings);
    let (query_key, statement) = result.statements().next().unwrap();
    let (sql, _args) =
        StatsPerGroup::to_sql(query_key, settings.filter(), statement, Grouping::ByPlate);
    assert!(sql.contains("GROUP BY\n t1.image_id\n"));
    assert!(sql.contains("GROUP BY group_id\n"));
}

#[test]
fn count_maps_to_sum_of_ones_with_counted_alias() {
    let settings = settings_with(vec![ColumnKey {
        class_id: ClassId(1),
        measure: Measurement::Count,
        stats: Stats::Sum,
        names: names("a", ""),
        ..Default::default()
    }]);
    let result = ResultingTable::new(&settings);
    let (_, statement) = result.statements().next().unwrap();
    let inner = statement.create_stats_query(false, false, "ANY_VALUE", None);
    assert!(inner.contains("SUM( 1) AS counted_SUM"));
}

#[test]
fn ids_project_through_the_off_carrier() {
    let settings = settings_with(vec![ColumnKey {
        class_id: ClassId(1),
        measure: Measurement::ObjectId,
        stats: Stats::Off,
        names: names("a", ""),
        ..Default::default()
    }]);
    let result = ResultingTable::new(&settings);
    let (_, statement) = result.statements().next().unwrap();
    let inner = statement.create_stats_query(false, false, "ANY_VALUE", None);
    assert!(inner.contains("ANY_VALUE( t1.object_id) AS object_id_ANY_VALUE"));
}
