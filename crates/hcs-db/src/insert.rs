//! Write paths: appender bulk loads at tile completion and the validity
//! bit updates.
//!
//! Bulk loads keep one appender per table open for the duration of one tile
//! (or one image-preparation batch), then close it; the whole unit either
//! lands or the tile fails.

use std::path::PathBuf;

use duckdb::params;
use hcs_core::ids::PlaneId;
use hcs_core::settings::Class;
use hcs_core::{ClassId, GroupInformation, ObjectList, OmeInfo};
use hcs_core::{rle, Result};
use tracing::{error, info};

use crate::{Database, DbResultExt, DbValue};

/// One image readied for insertion: metadata read, id hashed, group
/// assigned.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub path: PathBuf,
    pub relative_path: String,
    pub ome: OmeInfo,
    pub image_id: u64,
    pub group: GroupInformation,
}

fn clamp_u32(v: i32) -> u32 {
    v.max(0) as u32
}

fn encode_contour(points: &[hcs_core::roi::Point]) -> Vec<u8> {
    let mut out = Vec::with_capacity(points.len() * 8);
    for p in points {
        out.extend_from_slice(&clamp_u32(p.x).to_le_bytes());
        out.extend_from_slice(&clamp_u32(p.y).to_le_bytes());
    }
    out
}

impl Database {
    /// Bulk-append all objects of one completed tile together with their
    /// intensity and distance measurements.
    pub fn insert_objects(&self, image_id: u64, objects_list: &ObjectList) -> Result<()> {
        let conn = self.acquire()?;
        let mut objects = conn.appender("objects").ctx("appender objects")?;
        let mut measurements =
            conn.appender("object_measurements").ctx("appender object_measurements")?;
        let mut distances =
            conn.appender("distance_measurements").ctx("appender distance_measurements")?;

        for (_, rois) in objects_list.iter() {
            for roi in rois {
                let parent_class_id: Option<u16> = if roi.parent_object_id > 0 {
                    objects_list
                        .find_by_object_id(roi.parent_object_id)
                        .map(|parent| parent.class_id.0)
                } else {
                    None
                };

                objects
                    .append_row(params![
                        image_id,
                        roi.object_id,
                        roi.class_id.0,
                        roi.plane.c_stack,
                        roi.plane.z_stack,
                        roi.plane.t_stack,
                        roi.confidence,
                        roi.area_size,
                        roi.perimeter,
                        roi.circularity,
                        clamp_u32(roi.centroid.x),
                        clamp_u32(roi.centroid.y),
                        clamp_u32(roi.bbox.x),
                        clamp_u32(roi.bbox.y),
                        roi.bbox.width,
                        roi.bbox.height,
                        rle::rle_encode(&roi.mask),
                        encode_contour(&roi.contour),
                        roi.origin_object_id,
                        roi.parent_object_id,
                        parent_class_id,
                        roi.tracking_id,
                    ])
                    .ctx("append object")?;

                for (plane, intensity) in &roi.intensity {
                    measurements
                        .append_row(params![
                            image_id,
                            roi.object_id,
                            plane.c_stack,
                            plane.z_stack,
                            plane.t_stack,
                            intensity.intensity_sum,
                            intensity.intensity_avg,
                            intensity.intensity_min,
                            intensity.intensity_max,
                        ])
                        .ctx("append object measurement")?;
                }

                for (meas_object_id, distance) in &roi.distances {
                    let Some(target) = objects_list.find_by_object_id(*meas_object_id) else {
                        error!(meas_object_id, "distance target object not found");
                        continue;
                    };
                    distances
                        .append_row(params![
                            image_id,
                            roi.object_id,
                            roi.class_id.0,
                            meas_object_id,
                            target.class_id.0,
                            roi.plane.c_stack,
                            roi.plane.z_stack,
                            roi.plane.t_stack,
                            distance.centroid_to_centroid,
                            distance.centroid_to_surface_min,
                            distance.centroid_to_surface_max,
                            distance.surface_to_surface_min,
                            distance.surface_to_surface_max,
                        ])
                        .ctx("append distance measurement")?;
                }
            }
        }

        objects.flush().ctx("flush objects")?;
        measurements.flush().ctx("flush object_measurements")?;
        distances.flush().ctx("flush distance_measurements")?;
        Ok(())
    }

    /// Insert all enumerated images with their groups and channels before
    /// any pipeline runs.
    pub fn prepare_images(&self, plate_id: u16, items: &[PreparedImage]) -> Result<()> {
        let conn = self.acquire()?;
        let mut groups = conn.appender("groups").ctx("appender groups")?;
        let mut images = conn.appender("images").ctx("appender images")?;
        let mut images_groups = conn.appender("images_groups").ctx("appender images_groups")?;
        let mut images_channels =
            conn.appender("images_channels").ctx("appender images_channels")?;

        let mut added_groups = std::collections::BTreeSet::new();
        for item in items {
            if added_groups.insert(item.group.group_id) {
                groups
                    .append_row(params![
                        plate_id,
                        item.group.group_id,
                        item.group.group_name,
                        "",
                        u32::from(item.group.well_pos_x),
                        u32::from(item.group.well_pos_y),
                    ])
                    .ctx("append group")?;
            }

            let file_name = item
                .path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default();
            images
                .append_row(params![
                    item.image_id,
                    file_name,
                    item.path.to_string_lossy().to_string(),
                    item.relative_path,
                    item.ome.nr_of_channels,
                    item.ome.nr_of_z_stacks,
                    item.ome.nr_of_t_stacks,
                    item.ome.width,
                    item.ome.height,
                    0u64,
                    false,
                ])
                .ctx("append image")?;

            images_groups
                .append_row(params![
                    plate_id,
                    item.group.group_id,
                    item.image_id,
                    item.group.image_idx,
                ])
                .ctx("append image group")?;

            for (stack_c, channel) in &item.ome.channels {
                images_channels
                    .append_row(params![item.image_id, stack_c, channel.channel_id, channel.name])
                    .ctx("append image channel")?;
            }
        }

        groups.flush().ctx("flush groups")?;
        images.flush().ctx("flush images")?;
        images_groups.flush().ctx("flush images_groups")?;
        images_channels.flush().ctx("flush images_channels")?;
        info!(count = items.len(), plate_id, "prepared images");
        Ok(())
    }

    pub fn insert_classes(&self, classes: &[Class]) -> Result<()> {
        let conn = self.acquire()?;
        let mut appender = conn.appender("classes").ctx("appender classes")?;
        for class in classes {
            appender
                .append_row(params![
                    class.class_id.0,
                    class.short_name,
                    class.name,
                    class.notes,
                    class.color,
                ])
                .ctx("append class")?;
        }
        appender.flush().ctx("flush classes")?;
        Ok(())
    }

    pub fn insert_image_plane(&self, image_id: u64, plane: &PlaneId) -> Result<()> {
        self.execute(
            "INSERT OR IGNORE INTO images_planes (image_id, stack_c, stack_z, stack_t, validity) \
             VALUES (?, ?, ?, ?, ?)",
            &[
                DbValue::U64(image_id),
                DbValue::U32(plane.c_stack),
                DbValue::U32(plane.z_stack),
                DbValue::U32(plane.t_stack),
                DbValue::U64(0),
            ],
        )?;
        Ok(())
    }

    /// OR validity bits into the image row.
    pub fn set_image_validity(&self, image_id: u64, validity: u64) -> Result<()> {
        self.execute(
            "UPDATE images SET validity = validity | ? WHERE image_id=?",
            &[DbValue::U64(validity), DbValue::U64(image_id)],
        )?;
        Ok(())
    }

    /// Clear validity bits on the image row.
    pub fn unset_image_validity(&self, image_id: u64, validity: u64) -> Result<()> {
        self.execute(
            "UPDATE images SET validity = validity & ~(?) WHERE image_id=?",
            &[DbValue::U64(validity), DbValue::U64(image_id)],
        )?;
        Ok(())
    }

    pub fn set_image_plane_validity(
        &self,
        image_id: u64,
        plane: &PlaneId,
        validity: u64,
    ) -> Result<()> {
        self.execute(
            "UPDATE images_planes SET validity = validity | ? \
             WHERE image_id=? AND stack_c=? AND stack_z=? AND stack_t=?",
            &[
                DbValue::U64(validity),
                DbValue::U64(image_id),
                DbValue::U32(plane.c_stack),
                DbValue::U32(plane.z_stack),
                DbValue::U32(plane.t_stack),
            ],
        )?;
        Ok(())
    }

    /// Upsert validity bits of one class on one plane.
    pub fn set_class_plane_validity(
        &self,
        image_id: u64,
        plane: &PlaneId,
        class_id: ClassId,
        validity: u64,
    ) -> Result<()> {
        self.execute(
            "INSERT INTO classes_planes (image_id, class_id, stack_c, stack_z, stack_t, validity) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT DO UPDATE SET validity = validity | ?",
            &[
                DbValue::U64(image_id),
                DbValue::U16(class_id.0),
                DbValue::U32(plane.c_stack),
                DbValue::U32(plane.z_stack),
                DbValue::U32(plane.t_stack),
                DbValue::U64(validity),
                DbValue::U64(validity),
            ],
        )?;
        Ok(())
    }

    pub fn set_image_processed(&self, image_id: u64) -> Result<()> {
        self.execute(
            "UPDATE images SET processed = true WHERE image_id=?",
            &[DbValue::U64(image_id)],
        )?;
        Ok(())
    }
}
