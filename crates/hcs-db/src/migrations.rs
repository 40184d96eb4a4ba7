//! Data migrations run on open, after the additive DDL.
//!
//! All passes are idempotent: relative paths are only filled where empty,
//! the parent-class repair and cache rebuild run only when the cache row is
//! missing. The repair self-join is a one-time cost, never part of a query
//! path.

use std::collections::BTreeMap;
use std::path::Path;

use hcs_core::Result;
use tracing::info;

use crate::{Database, DbValue};

pub(crate) fn run(db: &Database) -> Result<()> {
    fill_relative_paths(db)?;
    rebuild_cache_and_repair_parents(db)?;
    Ok(())
}

/// Legacy databases carry only absolute paths; derive the relative ones
/// from the plate image folder.
fn fill_relative_paths(db: &Database) -> Result<()> {
    let missing = db.select_rows(
        "SELECT image_id, original_file_path FROM images WHERE relative_file_path = ''",
        &[],
        |row| Ok((row.get::<_, u64>(0)?, row.get::<_, String>(1)?)),
    )?;
    if missing.is_empty() {
        return Ok(());
    }
    let plates = db.select_plates()?;
    let Some(plate) = plates.values().next() else {
        return Ok(());
    };
    let base = Path::new(&plate.image_folder);

    info!(count = missing.len(), "migration: filling relative file paths");
    for (image_id, original) in missing {
        let relative = Path::new(&original)
            .strip_prefix(base)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| original.clone());
        db.execute(
            "UPDATE images SET relative_file_path = ? WHERE image_id = ?",
            &[DbValue::Text(relative), DbValue::U64(image_id)],
        )?;
    }
    Ok(())
}

/// Databases written before the cache existed also predate the
/// `meas_parent_class_id` column: repair it from the object self-mapping,
/// then rebuild the analyze-settings cache.
fn rebuild_cache_and_repair_parents(db: &Database) -> Result<()> {
    if db.has_analyze_settings_cache()? {
        return Ok(());
    }
    let objects = db.select_rows(
        "SELECT class_id, object_id, meas_parent_object_id FROM objects",
        &[],
        |row| {
            Ok((
                row.get::<_, u16>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, u64>(2)?,
            ))
        },
    )?;
    if objects.is_empty() {
        return Ok(());
    }

    info!("migration: creating analyze settings cache");

    let class_of: BTreeMap<u64, u16> =
        objects.iter().map(|(class_id, object_id, _)| (*object_id, *class_id)).collect();
    for (_, object_id, parent_object_id) in &objects {
        if *parent_object_id == 0 {
            continue;
        }
        if let Some(parent_class) = class_of.get(parent_object_id) {
            db.execute(
                "UPDATE objects SET meas_parent_class_id = ? WHERE object_id = ?",
                &[DbValue::U16(*parent_class), DbValue::U64(*object_id)],
            )?;
        }
    }

    let meta = db.select_experiment()?;
    if !meta.job_id.is_empty() {
        db.create_analyze_settings_cache(&meta.job_id)?;
    }
    info!("migration finished");
    Ok(())
}
