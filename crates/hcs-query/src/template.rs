//! Default result-table generation from the analyze-settings cache.
//!
//! The cache records which output classes, measured channels, intersections,
//! and distance targets a job produced, so a sensible column set can be
//! offered without introspecting the measurement tables.

use hcs_core::settings::{
    ColumnIdx, ColumnKey, ColumnNames, Measurement, ResultsSettings, Stats,
};
use hcs_core::Result;
use hcs_db::Database;

/// Column template applied to every output class.
const CLASS_MEASURES: [(Measurement, Stats); 5] = [
    (Measurement::Count, Stats::Sum),
    (Measurement::AreaSize, Stats::Avg),
    (Measurement::Perimeter, Stats::Avg),
    (Measurement::Circularity, Stats::Avg),
    (Measurement::Confidence, Stats::Avg),
];

/// Build a results table covering everything the job measured: the base
/// geometry per output class, an intensity column per measured channel,
/// child counts per intersecting pair, and a centroid distance per distance
/// pair.
pub fn results_settings_from_cache(database: &Database) -> Result<ResultsSettings> {
    let classes = database.select_classes()?;
    let output_classes = database.select_output_classes()?;
    let measured = database.select_measured_channels()?;
    let intersecting = database.select_intersecting_classes()?;
    let distances = database.select_distance_classes()?;

    let class_name = |class_id| {
        classes
            .get(&class_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("class {class_id}"))
    };

    let mut settings = ResultsSettings::default();
    let mut col = 0;
    let mut add = |settings: &mut ResultsSettings, key: ColumnKey| {
        if settings.add_column(ColumnIdx::new(0, col), key) {
            col += 1;
        }
    };

    for class_id in &output_classes {
        let names = ColumnNames { class_name: class_name(*class_id), ..Default::default() };
        let base = ColumnKey { class_id: *class_id, names, ..Default::default() };

        for (measure, stats) in CLASS_MEASURES {
            add(&mut settings, ColumnKey { measure, stats, ..base.clone() });
        }

        if let Some(channels) = measured.get(class_id) {
            for c_stack in channels {
                add(
                    &mut settings,
                    ColumnKey {
                        measure: Measurement::IntensityAvg,
                        stats: Stats::Avg,
                        cross_channel_c: *c_stack,
                        ..base.clone()
                    },
                );
            }
        }

        if let Some(children) = intersecting.get(class_id) {
            for child in children {
                add(
                    &mut settings,
                    ColumnKey {
                        measure: Measurement::Intersecting,
                        stats: Stats::Avg,
                        intersecting_class: *child,
                        names: ColumnNames {
                            class_name: class_name(*class_id),
                            intersecting_name: class_name(*child),
                            ..Default::default()
                        },
                        ..base.clone()
                    },
                );
            }
        }

        if let Some(targets) = distances.get(class_id) {
            for target in targets {
                add(
                    &mut settings,
                    ColumnKey {
                        measure: Measurement::DistanceCenterToCenter,
                        stats: Stats::Avg,
                        intersecting_class: *target,
                        names: ColumnNames {
                            class_name: class_name(*class_id),
                            intersecting_name: class_name(*target),
                            ..Default::default()
                        },
                        ..base.clone()
                    },
                );
            }
        }
    }
    Ok(settings)
}
