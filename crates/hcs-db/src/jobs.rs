//! Experiment and job lifecycle: `start_job` creates the experiment, class,
//! job, and plate rows plus the analyze-settings cache; `finish_job` stamps
//! the finished timestamp.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use duckdb::params;
use hcs_core::ids::generate_uuid;
use hcs_core::settings::{AnalyzeSettings, ExperimentSettings, Plate};
use hcs_core::{Error, Result};
use tracing::info;

use crate::model::{AnalyzeMeta, JobInfo};
use crate::{now_micros, Database, DbResultExt, DbValue};

pub(crate) fn encode_settings(text: &str) -> String {
    BASE64.encode(text.as_bytes())
}

pub(crate) fn decode_settings(encoded: &str) -> Result<String> {
    let bytes = BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| Error::Corrupted(format!("settings blob: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Corrupted(format!("settings blob: {e}")))
}

impl Database {
    /// Called at the very beginning of an analysis. Inserts the experiment
    /// (and classes) on first use, creates the job and plate rows, and
    /// materializes the analyze-settings cache.
    pub fn start_job(&self, settings: &AnalyzeSettings, job_name: &str) -> Result<String> {
        if self.insert_experiment(&settings.project_settings.experiment_settings)? {
            self.insert_classes(&settings.project_settings.classes)?;
        }
        let job_id = self.insert_job_and_plates(settings, job_name)?;
        self.set_analyze_settings_cache(
            &job_id,
            &settings.output_classes(),
            &settings.image_channels_used_for_measurement(),
            &settings.possible_intersecting_classes(),
            &settings.possible_distance_classes(),
        )?;
        info!(job_id, job_name, "job started");
        Ok(job_id)
    }

    /// Set the finished timestamp; a cancelled job never reaches this.
    pub fn finish_job(&self, job_id: &str) -> Result<()> {
        self.execute(
            "UPDATE jobs SET time_finished = make_timestamp(?) WHERE job_id = ?",
            &[DbValue::I64(now_micros()), DbValue::Text(job_id.to_string())],
        )?;
        info!(job_id, "job finished");
        Ok(())
    }

    /// Insert the experiment row. Returns `true` when the experiment was
    /// created, `false` when the given id matches the stored one (the job is
    /// appended). A differing id is rejected: one experiment per database
    /// file.
    pub fn insert_experiment(&self, exp: &ExperimentSettings) -> Result<bool> {
        if exp.experiment_id.is_empty() {
            return Err(Error::InvalidInput("experiment id must be set".into()));
        }
        let stored = self.select_experiment()?.experiment;
        if stored.experiment_id == exp.experiment_id {
            info!("appending to existing experiment");
            return Ok(false);
        }
        if !stored.experiment_id.is_empty() {
            return Err(Error::InvalidInput(format!(
                "database already holds experiment >{}<; use a new database file or that id",
                stored.experiment_id
            )));
        }
        self.execute(
            "INSERT INTO experiment (experiment_id, name, notes) VALUES (?, ?, ?)",
            &[
                DbValue::Text(exp.experiment_id.clone()),
                DbValue::Text(exp.experiment_name.clone()),
                DbValue::Text(exp.notes.clone()),
            ],
        )?;
        Ok(true)
    }

    fn insert_job_and_plates(
        &self,
        settings: &AnalyzeSettings,
        job_name: &str,
    ) -> Result<String> {
        let mut conn = self.acquire()?;
        let tx = conn.transaction().ctx("begin transaction")?;

        let job_id = generate_uuid();
        let settings_text = settings.to_json_string()?;
        let results_settings = settings.to_results_settings();
        let results_text = serde_json::to_string(&results_settings)
            .map_err(|e| Error::InvalidInput(format!("results settings serialize: {e}")))?;

        tx.execute(
            "INSERT INTO jobs (experiment_id, job_id, job_name, hcs_version, time_started, \
             time_finished, settings, settings_results_table_default, settings_results_table, \
             settings_tile_width, settings_tile_height, settings_image_series) \
             VALUES (?, ?, ?, ?, make_timestamp(?), NULL, ?, ?, ?, ?, ?, ?)",
            params![
                settings.project_settings.experiment_settings.experiment_id,
                job_id,
                job_name,
                env!("CARGO_PKG_VERSION"),
                now_micros(),
                encode_settings(&settings_text),
                encode_settings(&results_text),
                encode_settings(&results_text),
                settings.image_setup.tile_width,
                settings.image_setup.tile_height,
                settings.image_setup.series,
            ],
        )
        .ctx("insert job")?;

        let plate = &settings.project_settings.plate;
        let well_order = serde_json::to_string(&plate.plate_setup.well_image_order)
            .map_err(|e| Error::InvalidInput(format!("well image order: {e}")))?;
        let group_by = serde_json::to_string(&plate.group_by)
            .map_err(|e| Error::InvalidInput(format!("group by: {e}")))?;
        tx.execute(
            "INSERT INTO plates (job_id, plate_id, name, notes, rows, cols, image_folder, \
             well_image_order, group_by, filename_regex) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                job_id,
                plate.plate_id,
                plate.name,
                plate.notes,
                plate.plate_setup.rows.max(0) as u16,
                plate.plate_setup.cols.max(0) as u16,
                plate.image_folder,
                well_order,
                group_by,
                plate.filename_regex,
            ],
        )
        .map_err(|e| {
            Error::InvalidInput(format!("a plate with the same id already exists: {e}"))
        })?;

        tx.commit().ctx("commit job")?;
        Ok(job_id)
    }

    /// Experiment metadata plus the first job of the database.
    pub fn select_experiment(&self) -> Result<AnalyzeMeta> {
        let mut meta = AnalyzeMeta::default();
        if let Some(exp) = self.select_optional_row(
            "SELECT experiment_id, name, notes FROM experiment",
            &[],
            |row| {
                Ok(ExperimentSettings {
                    experiment_id: row.get(0)?,
                    experiment_name: row.get(1)?,
                    notes: row.get(2)?,
                })
            },
        )? {
            meta.experiment = exp;
        }

        let job = self.select_optional_row(
            "SELECT epoch_us(time_started), epoch_us(time_finished), settings, job_name, \
             job_id, settings_tile_width, settings_tile_height, settings_image_series \
             FROM jobs ORDER BY time_started",
            &[],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, u32>(6)?,
                    row.get::<_, u32>(7)?,
                ))
            },
        )?;
        if let Some((started, finished, settings, job_name, job_id, tw, th, series)) = job {
            meta.time_started_us = started;
            meta.time_finished_us = finished;
            meta.settings_json = decode_settings(&settings)?;
            meta.job_name = job_name;
            meta.job_id = job_id;
            meta.tile_width = tw;
            meta.tile_height = th;
            meta.series = series;
        }
        Ok(meta)
    }

    pub fn select_jobs(&self) -> Result<Vec<JobInfo>> {
        self.select_rows(
            "SELECT job_id, job_name, epoch_us(time_started), epoch_us(time_finished) \
             FROM jobs ORDER BY time_started",
            &[],
            |row| {
                Ok(JobInfo {
                    job_id: row.get(0)?,
                    job_name: row.get(1)?,
                    time_started_us: row.get(2)?,
                    time_finished_us: row.get(3)?,
                })
            },
        )
    }

    pub fn select_plates(&self) -> Result<BTreeMap<u16, Plate>> {
        let rows = self.select_rows(
            "SELECT plate_id, name, notes, rows, cols, image_folder, well_image_order, \
             group_by, filename_regex FROM plates",
            &[],
            |row| {
                Ok((
                    row.get::<_, u16>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u16>(3)?,
                    row.get::<_, u16>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )?;

        let mut plates = BTreeMap::new();
        for (plate_id, name, notes, rows_n, cols, folder, well_order, group_by, regex) in rows {
            let mut plate = Plate {
                plate_id,
                name,
                notes,
                image_folder: folder,
                filename_regex: regex,
                ..Default::default()
            };
            plate.plate_setup.rows = i32::from(rows_n);
            plate.plate_setup.cols = i32::from(cols);
            plate.plate_setup.well_image_order = serde_json::from_str(&well_order)
                .map_err(|e| Error::Corrupted(format!("well image order: {e}")))?;
            plate.group_by = serde_json::from_str(&group_by)
                .map_err(|e| Error::Corrupted(format!("group by: {e}")))?;
            plates.insert(plate_id, plate);
        }
        Ok(plates)
    }

    /// Persist edited result-table settings of a job (base64 of JSON text).
    pub fn update_results_table_settings(&self, job_id: &str, settings_json: &str) -> Result<()> {
        self.execute(
            "UPDATE jobs SET settings_results_table = ? WHERE job_id = ?",
            &[
                DbValue::Text(encode_settings(settings_json)),
                DbValue::Text(job_id.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn select_results_table_settings(&self, job_id: &str) -> Result<String> {
        let row = self.select_optional_row(
            "SELECT settings_results_table FROM jobs WHERE job_id = ?",
            &[DbValue::Text(job_id.to_string())],
            |row| row.get::<_, String>(0),
        )?;
        match row {
            Some(encoded) => decode_settings(&encoded),
            None => Ok(String::new()),
        }
    }
}
