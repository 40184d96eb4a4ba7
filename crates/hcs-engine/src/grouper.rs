//! Filename grouping: maps each image path to a group (well) and a well
//! coordinate.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use hcs_core::group::{GroupInformation, UNDEFINED_IMG_IDX, UNDEFINED_WELL};
use hcs_core::settings::GroupBy;
use hcs_core::{Error, Result};
use regex::Regex;
use tracing::warn;

/// Allocates group ids and free well positions.
///
/// Groups without explicit coordinates walk a 24x16 snake over the plate;
/// explicit coordinates are kept verbatim. Image indices count up from 1
/// when the grouping mode does not supply one.
#[derive(Debug, Default)]
pub struct WellPosGenerator {
    groups: BTreeMap<String, GroupInformation>,
    act_well_pos: u32,
    img_idx: u32,
    act_group_id: u16,
}

const MAX_COLS: u32 = 24;

impl WellPosGenerator {
    pub fn new() -> Self {
        Self { groups: BTreeMap::new(), act_well_pos: 0, img_idx: 1, act_group_id: 0 }
    }

    pub fn get_group_id(&mut self, group_info: &GroupInformation) -> GroupInformation {
        // This group already exists.
        if let Some(existing) = self.groups.get(&group_info.group_name) {
            let mut new_pos = existing.clone();
            new_pos.image_idx = if group_info.image_idx == UNDEFINED_IMG_IDX {
                self.next_free_img_idx()
            } else {
                group_info.image_idx
            };
            return new_pos;
        }

        let mut new_pos = GroupInformation {
            group_name: group_info.group_name.clone(),
            group_id: self.act_group_id,
            ..Default::default()
        };
        if group_info.well_pos_x == UNDEFINED_WELL || group_info.well_pos_y == UNDEFINED_WELL {
            new_pos.well_pos_x = ((self.act_well_pos % MAX_COLS) + 1) as u16;
            new_pos.well_pos_y = ((self.act_well_pos / MAX_COLS) + 1) as u16;
        } else {
            new_pos.well_pos_x = group_info.well_pos_x;
            new_pos.well_pos_y = group_info.well_pos_y;
        }
        new_pos.image_idx = if group_info.image_idx == UNDEFINED_IMG_IDX {
            self.next_free_img_idx()
        } else {
            group_info.image_idx
        };

        self.act_well_pos += 1;
        self.act_group_id += 1;
        self.groups.insert(group_info.group_name.clone(), new_pos.clone());
        new_pos
    }

    fn next_free_img_idx(&mut self) -> u32 {
        let idx = self.img_idx;
        self.img_idx += 1;
        idx
    }
}

/// Deterministic mapping of filename to group and well coordinate.
///
/// Thread-safe at the public entry point: the allocator is mutex-guarded so
/// concurrent preparation workers see consistent assignments.
#[derive(Debug)]
pub struct FileGrouper {
    group_by: GroupBy,
    file_regex: Option<Regex>,
    well_generator: Mutex<WellPosGenerator>,
}

impl FileGrouper {
    pub fn new(group_by: GroupBy, file_regex: &str) -> Result<Self> {
        let file_regex = if group_by == GroupBy::Filename {
            Some(
                Regex::new(file_regex)
                    .map_err(|e| Error::InvalidInput(format!("filename regex: {e}")))?,
            )
        } else {
            None
        };
        Ok(Self { group_by, file_regex, well_generator: Mutex::new(WellPosGenerator::new()) })
    }

    /// Group assignment for one path. The same path (and the same group
    /// name) always yields the same group id and well coordinate.
    pub fn get_group_for_filename(&self, file_path: &Path) -> GroupInformation {
        let group_info = match self.group_by {
            GroupBy::Off => GroupInformation {
                group_name: String::new(),
                image_idx: UNDEFINED_IMG_IDX,
                ..Default::default()
            },
            GroupBy::Directory => GroupInformation {
                group_name: file_path
                    .parent()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default(),
                image_idx: UNDEFINED_IMG_IDX,
                ..Default::default()
            },
            GroupBy::Filename => self.apply_regex(file_path),
        };
        let mut generator = self.well_generator.lock().expect("well generator lock");
        generator.get_group_id(&group_info)
    }

    /// Captures (1,2,3,4) = (group, wellRow, wellCol, imageIdx);
    /// (1,2) = (group, imageIdx); (1) = (group). Missing captures fall back
    /// to the undefined sentinels, never to a hard failure.
    fn apply_regex(&self, image_path: &Path) -> GroupInformation {
        let fallback = GroupInformation {
            group_name: String::new(),
            image_idx: UNDEFINED_IMG_IDX,
            ..Default::default()
        };
        let Some(regex) = &self.file_regex else {
            return fallback;
        };
        let file_name = image_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some(captures) = regex.captures(&file_name) else {
            warn!(file_name, "filename did not match the grouping regex, using fallback");
            return fallback;
        };

        let capture_str =
            |idx: usize| captures.get(idx).map(|m| m.as_str().to_string());
        let capture_num = |idx: usize| -> Option<u32> {
            captures.get(idx).and_then(|m| m.as_str().parse().ok())
        };

        match captures.len() {
            n if n >= 5 => GroupInformation {
                group_name: capture_str(1).unwrap_or_default(),
                well_pos_y: capture_num(2).map(|v| v as u16).unwrap_or(UNDEFINED_WELL),
                well_pos_x: capture_num(3).map(|v| v as u16).unwrap_or(UNDEFINED_WELL),
                image_idx: capture_num(4).unwrap_or(UNDEFINED_IMG_IDX),
                ..Default::default()
            },
            n if n >= 3 => GroupInformation {
                group_name: capture_str(1).unwrap_or_default(),
                image_idx: capture_num(2).unwrap_or(UNDEFINED_IMG_IDX),
                ..Default::default()
            },
            n if n >= 2 => GroupInformation {
                group_name: capture_str(1).unwrap_or_default(),
                image_idx: UNDEFINED_IMG_IDX,
                ..Default::default()
            },
            _ => {
                warn!(file_name, "grouping regex has no capture groups, using fallback");
                fallback
            }
        }
    }
}
