//! Row models returned by the select helpers.

use hcs_core::settings::ExperimentSettings;

/// Metadata of the stored experiment and its most recent job.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeMeta {
    pub experiment: ExperimentSettings,
    pub time_started_us: i64,
    pub time_finished_us: Option<i64>,
    pub job_name: String,
    pub job_id: String,
    /// Decoded settings document text.
    pub settings_json: String,
    pub tile_width: u32,
    pub tile_height: u32,
    pub series: u32,
}

/// One job row.
#[derive(Debug, Clone, Default)]
pub struct JobInfo {
    pub job_id: String,
    pub job_name: String,
    pub time_started_us: i64,
    pub time_finished_us: Option<i64>,
}

/// One image row joined with its group.
#[derive(Debug, Clone, Default)]
pub struct ImageInfo {
    pub image_id: u64,
    pub filename: String,
    pub image_file_path: String,
    pub image_file_path_rel: String,
    pub validity: u64,
    pub width: u32,
    pub height: u32,
    pub image_group_name: String,
}

/// Name and plate position of one group.
#[derive(Debug, Clone, Default)]
pub struct GroupInfo {
    pub group_name: String,
    pub pos_x: u32,
    pub pos_y: u32,
}

/// Location info of a single object, used for back-navigation.
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    pub image_id: u64,
    pub stack_c: u32,
    pub stack_z: u32,
    pub stack_t: u32,
    pub meas_center_x: u32,
    pub meas_center_y: u32,
    pub meas_box_x: u32,
    pub meas_box_y: u32,
    pub meas_box_width: u32,
    pub meas_box_height: u32,
}
