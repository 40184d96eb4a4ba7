//! Job-scoped analyze-settings cache.
//!
//! Materialized once at `start_job` so result generation knows which output
//! classes, measured channels, intersections, and distance targets exist
//! without introspecting the object tables on every query. A migration
//! rebuilds the cache for databases written before it existed.

use std::collections::{BTreeMap, BTreeSet};

use hcs_core::{ClassId, Error, Result};
use tracing::info;

use crate::{Database, DbValue};

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::InvalidInput(format!("cache encode: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::Corrupted(format!("cache decode: {e}")))
}

impl Database {
    /// Store the derived maps for one job.
    pub fn set_analyze_settings_cache(
        &self,
        job_id: &str,
        output_classes: &BTreeSet<ClassId>,
        measured_channels: &BTreeMap<ClassId, BTreeSet<i32>>,
        intersecting_channels: &BTreeMap<ClassId, BTreeSet<ClassId>>,
        distance_channels: &BTreeMap<ClassId, BTreeSet<ClassId>>,
    ) -> Result<()> {
        self.execute(
            "INSERT INTO cache_analyze_settings (job_id, output_classes, measured_channels, \
             intersecting_channels, distance_from_classes) VALUES (?, ?, ?, ?, ?)",
            &[
                DbValue::Text(job_id.to_string()),
                DbValue::Text(to_json(output_classes)?),
                DbValue::Text(to_json(measured_channels)?),
                DbValue::Text(to_json(intersecting_channels)?),
                DbValue::Text(to_json(distance_channels)?),
            ],
        )?;
        Ok(())
    }

    /// Rebuild the cache from the measurement tables (migration path for
    /// legacy databases).
    pub fn create_analyze_settings_cache(&self, job_id: &str) -> Result<()> {
        // Pass 1: distinct output classes.
        let output_classes: BTreeSet<ClassId> = self
            .select_rows("SELECT class_id FROM objects GROUP BY class_id", &[], |row| {
                row.get::<_, u16>(0)
            })?
            .into_iter()
            .map(ClassId)
            .collect();

        // Pass 2: measured channels per class via the measurement join.
        let mut measured: BTreeMap<ClassId, BTreeSet<i32>> = BTreeMap::new();
        for (class_id, stack_c) in self.select_rows(
            "SELECT class_id, object_measurements.meas_stack_c FROM objects \
             JOIN object_measurements ON objects.object_id = object_measurements.object_id \
             AND objects.image_id = object_measurements.image_id \
             GROUP BY object_measurements.meas_stack_c, class_id",
            &[],
            |row| Ok((row.get::<_, u16>(0)?, row.get::<_, u32>(1)?)),
        )? {
            measured.entry(ClassId(class_id)).or_default().insert(stack_c as i32);
        }

        // Pass 3: parent/child class pairs via the object self-join.
        let mut intersecting: BTreeMap<ClassId, BTreeSet<ClassId>> = BTreeMap::new();
        for (parent, child) in self.select_rows(
            "SELECT DISTINCT parent.class_id AS class_id, child.class_id AS child_class_id \
             FROM objects AS parent \
             JOIN objects AS child ON child.meas_parent_object_id = parent.object_id",
            &[],
            |row| Ok((row.get::<_, u16>(0)?, row.get::<_, u16>(1)?)),
        )? {
            intersecting.entry(ClassId(parent)).or_default().insert(ClassId(child));
        }

        // Pass 4: distance pairs.
        let mut distances: BTreeMap<ClassId, BTreeSet<ClassId>> = BTreeMap::new();
        for (from, to) in self.select_rows(
            "SELECT class_id, meas_class_id FROM distance_measurements \
             GROUP BY class_id, meas_class_id",
            &[],
            |row| Ok((row.get::<_, u16>(0)?, row.get::<_, u16>(1)?)),
        )? {
            distances.entry(ClassId(from)).or_default().insert(ClassId(to));
        }

        self.set_analyze_settings_cache(job_id, &output_classes, &measured, &intersecting, &distances)?;
        info!(job_id, "analyze settings cache rebuilt");
        Ok(())
    }

    pub fn has_analyze_settings_cache(&self) -> Result<bool> {
        let count: Vec<i64> = self.select_rows(
            "SELECT COUNT(*) FROM cache_analyze_settings",
            &[],
            |row| row.get(0),
        )?;
        Ok(count.first().copied().unwrap_or(0) > 0)
    }

    pub fn select_output_classes(&self) -> Result<BTreeSet<ClassId>> {
        match self.select_optional_row(
            "SELECT output_classes FROM cache_analyze_settings",
            &[],
            |row| row.get::<_, String>(0),
        )? {
            Some(text) => from_json(&text),
            None => Ok(BTreeSet::new()),
        }
    }

    pub fn select_measured_channels(&self) -> Result<BTreeMap<ClassId, BTreeSet<i32>>> {
        match self.select_optional_row(
            "SELECT measured_channels FROM cache_analyze_settings",
            &[],
            |row| row.get::<_, String>(0),
        )? {
            Some(text) => from_json(&text),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn select_intersecting_classes(&self) -> Result<BTreeMap<ClassId, BTreeSet<ClassId>>> {
        match self.select_optional_row(
            "SELECT intersecting_channels FROM cache_analyze_settings",
            &[],
            |row| row.get::<_, String>(0),
        )? {
            Some(text) => from_json(&text),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn select_distance_classes(&self) -> Result<BTreeMap<ClassId, BTreeSet<ClassId>>> {
        match self.select_optional_row(
            "SELECT distance_from_classes FROM cache_analyze_settings",
            &[],
            |row| row.get::<_, String>(0),
        )? {
            Some(text) => from_json(&text),
            None => Ok(BTreeMap::new()),
        }
    }
}
