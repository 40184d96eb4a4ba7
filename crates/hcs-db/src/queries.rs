//! Read paths used by the query plans and the CLI.

use std::collections::{BTreeMap, BTreeSet};

use hcs_core::settings::Class;
use hcs_core::{ClassId, Error, Result};

use crate::model::{GroupInfo, ImageInfo, ObjectInfo};
use crate::{Database, DbValue};

impl Database {
    pub fn select_groups(&self) -> Result<BTreeMap<u16, String>> {
        let rows = self.select_rows("SELECT group_id, name FROM groups", &[], |row| {
            Ok((row.get::<_, u16>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.into_iter().collect())
    }

    pub fn select_group_info(&self, group_id: u16) -> Result<GroupInfo> {
        let row = self.select_optional_row(
            "SELECT groups.name, groups.pos_on_plate_x, groups.pos_on_plate_y \
             FROM groups WHERE groups.group_id = ?",
            &[DbValue::U16(group_id)],
            |row| {
                Ok(GroupInfo {
                    group_name: row.get(0)?,
                    pos_x: row.get(1)?,
                    pos_y: row.get(2)?,
                })
            },
        )?;
        row.ok_or_else(|| Error::NotFound(format!("group {group_id}")))
    }

    pub fn select_images(&self) -> Result<Vec<ImageInfo>> {
        self.select_rows(
            "SELECT images.image_id, images.file_name, images.original_file_path, \
             images.relative_file_path, images.validity, images.width, images.height, groups.name \
             FROM images \
             JOIN images_groups ON images.image_id = images_groups.image_id \
             JOIN groups ON images_groups.group_id = groups.group_id",
            &[],
            map_image_row,
        )
    }

    pub fn select_image_info(&self, image_id: u64) -> Result<ImageInfo> {
        let row = self.select_optional_row(
            "SELECT images.image_id, images.file_name, images.original_file_path, \
             images.relative_file_path, images.validity, images.width, images.height, groups.name \
             FROM images \
             JOIN images_groups ON images.image_id = images_groups.image_id \
             JOIN groups ON images_groups.group_id = groups.group_id \
             WHERE images.image_id = ?",
            &[DbValue::U64(image_id)],
            map_image_row,
        )?;
        row.ok_or_else(|| Error::NotFound(format!("image {image_id}")))
    }

    pub fn select_image_id_from_file_name(&self, file_name: &str) -> Result<u64> {
        let row = self.select_optional_row(
            "SELECT image_id FROM images WHERE file_name = ?",
            &[DbValue::Text(file_name.to_string())],
            |row| row.get::<_, u64>(0),
        )?;
        row.ok_or_else(|| Error::NotFound(format!("image file name >{file_name}<")))
    }

    pub fn select_object_info(&self, object_id: u64) -> Result<ObjectInfo> {
        let row = self.select_optional_row(
            "SELECT stack_c, stack_z, stack_t, meas_center_x, meas_center_y, meas_box_x, \
             meas_box_y, meas_box_width, meas_box_height, image_id \
             FROM objects WHERE object_id = ?",
            &[DbValue::U64(object_id)],
            |row| {
                Ok(ObjectInfo {
                    stack_c: row.get(0)?,
                    stack_z: row.get(1)?,
                    stack_t: row.get(2)?,
                    meas_center_x: row.get(3)?,
                    meas_center_y: row.get(4)?,
                    meas_box_x: row.get(5)?,
                    meas_box_y: row.get(6)?,
                    meas_box_width: row.get(7)?,
                    meas_box_height: row.get(8)?,
                    image_id: row.get(9)?,
                })
            },
        )?;
        row.ok_or_else(|| Error::NotFound(format!("object {object_id}")))
    }

    pub fn select_classes(&self) -> Result<BTreeMap<ClassId, Class>> {
        let rows = self.select_rows(
            "SELECT class_id, short_name, name, notes, color FROM classes",
            &[],
            |row| {
                Ok(Class {
                    class_id: ClassId(row.get(0)?),
                    short_name: row.get(1)?,
                    name: row.get(2)?,
                    notes: row.get(3)?,
                    color: row.get(4)?,
                })
            },
        )?;
        Ok(rows.into_iter().map(|c| (c.class_id, c)).collect())
    }

    pub fn select_image_channels(&self) -> Result<BTreeMap<u32, String>> {
        let rows = self.select_rows(
            "SELECT image_id, stack_c, name FROM images_channels",
            &[],
            |row| Ok((row.get::<_, u32>(1)?, row.get::<_, String>(2)?)),
        )?;
        Ok(rows.into_iter().collect())
    }

    pub fn select_nr_of_time_stacks(&self) -> Result<u32> {
        let row = self.select_optional_row(
            "SELECT MAX(nr_of_t_stacks) FROM images",
            &[],
            |row| row.get::<_, Option<u32>>(0),
        )?;
        Ok(row.flatten().unwrap_or(0))
    }

    /// Sets of classes sharing at least one non-zero tracking id (the
    /// colocalization groups of the dashboard).
    pub fn select_colocalizing_classes(&self) -> Result<BTreeSet<BTreeSet<ClassId>>> {
        let rows = self.select_rows(
            "SELECT DISTINCT STRING_AGG(DISTINCT class_id::text, ',') AS elements FROM objects \
             WHERE meas_tracking_id != 0 GROUP BY meas_tracking_id",
            &[],
            |row| row.get::<_, String>(0),
        )?;

        let mut sets = BTreeSet::new();
        for list in rows {
            let mut classes = BTreeSet::new();
            for token in list.split(',') {
                let value: u16 = token
                    .trim()
                    .parse()
                    .map_err(|_| Error::Corrupted(format!("class id >{token}<")))?;
                classes.insert(ClassId(value));
            }
            sets.insert(classes);
        }
        Ok(sets)
    }

    /// Count of objects of one image, optionally restricted to a class.
    pub fn count_objects(&self, image_id: u64, class_id: Option<ClassId>) -> Result<i64> {
        let rows = match class_id {
            Some(class_id) => self.select_rows(
                "SELECT COUNT(*) FROM objects WHERE image_id=? AND class_id=?",
                &[DbValue::U64(image_id), DbValue::U16(class_id.0)],
                |row| row.get::<_, i64>(0),
            )?,
            None => self.select_rows(
                "SELECT COUNT(*) FROM objects WHERE image_id=?",
                &[DbValue::U64(image_id)],
                |row| row.get::<_, i64>(0),
            )?,
        };
        Ok(rows.first().copied().unwrap_or(0))
    }
}

fn map_image_row(row: &duckdb::Row<'_>) -> duckdb::Result<ImageInfo> {
    Ok(ImageInfo {
        image_id: row.get(0)?,
        filename: row.get(1)?,
        image_file_path: row.get(2)?,
        image_file_path_rel: row.get(3)?,
        validity: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        image_group_name: row.get(7)?,
    })
}
