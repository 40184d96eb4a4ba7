//! Table definitions.
//!
//! `ADD COLUMN IF NOT EXISTS` statements are the canonical migration path:
//! new deployments create the columns inline, old databases gain them on
//! open. Settings blobs are base64 of their JSON text; masks and contours
//! are compact binary encodings (see `hcs_core::rle`).

pub const CREATE_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS experiment (
 experiment_id TEXT,
 name TEXT,
 notes TEXT,
 PRIMARY KEY (experiment_id)
);

CREATE TABLE IF NOT EXISTS jobs (
 experiment_id TEXT,
 job_id TEXT,
 job_name TEXT,
 hcs_version TEXT,
 time_started TIMESTAMP,
 time_finished TIMESTAMP,
 settings TEXT,
 settings_results_table TEXT,
 settings_results_table_default TEXT,
 settings_tile_width UINTEGER,
 settings_tile_height UINTEGER,
 settings_image_series UINTEGER,
 PRIMARY KEY (job_id),
 FOREIGN KEY(experiment_id) REFERENCES experiment(experiment_id)
);

ALTER TABLE jobs ADD COLUMN IF NOT EXISTS settings_results_table TEXT;
ALTER TABLE jobs ADD COLUMN IF NOT EXISTS settings_results_table_default TEXT;
ALTER TABLE jobs ADD COLUMN IF NOT EXISTS settings_tile_width UINTEGER DEFAULT 4096;
ALTER TABLE jobs ADD COLUMN IF NOT EXISTS settings_tile_height UINTEGER DEFAULT 4096;
ALTER TABLE jobs ADD COLUMN IF NOT EXISTS settings_image_series UINTEGER DEFAULT 0;

CREATE TABLE IF NOT EXISTS plates (
 job_id TEXT,
 plate_id USMALLINT,
 name TEXT,
 notes TEXT,
 rows USMALLINT,
 cols USMALLINT,
 image_folder TEXT,
 well_image_order TEXT,
 group_by TEXT,
 filename_regex TEXT,
 PRIMARY KEY (plate_id),
 FOREIGN KEY(job_id) REFERENCES jobs(job_id)
);

CREATE TABLE IF NOT EXISTS classes (
 class_id USMALLINT,
 short_name TEXT,
 name TEXT,
 notes TEXT,
 color TEXT,
 PRIMARY KEY (class_id)
);

CREATE TABLE IF NOT EXISTS groups (
 plate_id USMALLINT,
 group_id USMALLINT,
 name TEXT,
 notes TEXT,
 pos_on_plate_x UINTEGER,
 pos_on_plate_y UINTEGER,
 PRIMARY KEY (plate_id, group_id)
);

CREATE TABLE IF NOT EXISTS images (
 image_id UBIGINT,
 file_name TEXT,
 original_file_path TEXT,
 relative_file_path TEXT,
 nr_of_c_stacks UINTEGER,
 nr_of_z_stacks UINTEGER,
 nr_of_t_stacks UINTEGER,
 width UINTEGER,
 height UINTEGER,
 validity UBIGINT,
 processed BOOLEAN,
 PRIMARY KEY (image_id)
);

ALTER TABLE images ADD COLUMN IF NOT EXISTS relative_file_path TEXT DEFAULT '';

CREATE TABLE IF NOT EXISTS images_groups (
 plate_id USMALLINT,
 group_id USMALLINT,
 image_id UBIGINT,
 image_group_idx UINTEGER,
 PRIMARY KEY (plate_id, group_id, image_id),
 FOREIGN KEY(plate_id, group_id) REFERENCES groups(plate_id, group_id),
 FOREIGN KEY(image_id) REFERENCES images(image_id)
);

CREATE TABLE IF NOT EXISTS images_channels (
 image_id UBIGINT,
 stack_c UINTEGER,
 channel_id TEXT,
 name TEXT,
 PRIMARY KEY (image_id, stack_c),
 FOREIGN KEY(image_id) REFERENCES images(image_id)
);

CREATE TABLE IF NOT EXISTS images_planes (
 image_id UBIGINT,
 stack_c UINTEGER,
 stack_z UINTEGER,
 stack_t UINTEGER,
 validity UBIGINT,
 PRIMARY KEY (image_id, stack_c, stack_z, stack_t),
 FOREIGN KEY(image_id) REFERENCES images(image_id)
);

CREATE TABLE IF NOT EXISTS classes_planes (
 image_id UBIGINT,
 class_id USMALLINT,
 stack_c UINTEGER,
 stack_z UINTEGER,
 stack_t UINTEGER,
 validity UBIGINT,
 PRIMARY KEY (image_id, class_id, stack_c, stack_z, stack_t),
 FOREIGN KEY(image_id) REFERENCES images(image_id)
);

CREATE TABLE IF NOT EXISTS objects (
 image_id UBIGINT,
 object_id UBIGINT,
 class_id USMALLINT,
 stack_c UINTEGER,
 stack_z UINTEGER,
 stack_t UINTEGER,
 meas_confidence FLOAT,
 meas_area_size DOUBLE,
 meas_perimeter FLOAT,
 meas_circularity FLOAT,
 meas_center_x UINTEGER,
 meas_center_y UINTEGER,
 meas_box_x UINTEGER,
 meas_box_y UINTEGER,
 meas_box_width UINTEGER,
 meas_box_height UINTEGER,
 meas_mask BLOB,
 meas_contour BLOB,
 meas_origin_object_id UBIGINT,
 meas_parent_object_id UBIGINT,
 meas_parent_class_id USMALLINT DEFAULT NULL,
 meas_tracking_id UBIGINT
);

ALTER TABLE objects ADD COLUMN IF NOT EXISTS meas_tracking_id UBIGINT DEFAULT 0;
ALTER TABLE objects ADD COLUMN IF NOT EXISTS meas_origin_object_id UBIGINT DEFAULT 0;
ALTER TABLE objects ADD COLUMN IF NOT EXISTS meas_parent_object_id UBIGINT DEFAULT 0;
ALTER TABLE objects ADD COLUMN IF NOT EXISTS meas_parent_class_id USMALLINT DEFAULT NULL;

CREATE TABLE IF NOT EXISTS object_measurements (
 image_id UBIGINT,
 object_id UBIGINT,
 meas_stack_c UINTEGER,
 meas_stack_z UINTEGER,
 meas_stack_t UINTEGER,
 meas_intensity_sum UBIGINT,
 meas_intensity_avg FLOAT,
 meas_intensity_min UINTEGER,
 meas_intensity_max UINTEGER
);

CREATE TABLE IF NOT EXISTS distance_measurements (
 image_id UBIGINT,
 object_id UBIGINT,
 class_id USMALLINT,
 meas_object_id UBIGINT,
 meas_class_id USMALLINT,
 meas_stack_c UINTEGER,
 meas_stack_z UINTEGER,
 meas_stack_t UINTEGER,
 meas_distance_center_to_center DOUBLE,
 meas_distance_center_to_surface_min DOUBLE,
 meas_distance_center_to_surface_max DOUBLE,
 meas_distance_surface_to_surface_min DOUBLE,
 meas_distance_surface_to_surface_max DOUBLE
);

CREATE TABLE IF NOT EXISTS cache_analyze_settings (
 job_id TEXT,
 output_classes TEXT,
 measured_channels TEXT,
 intersecting_channels TEXT,
 distance_from_classes TEXT
);
";
