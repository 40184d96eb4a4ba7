//! Dashboard projection: per-class tables aligned by parent object id or
//! tracking id, with alternating row colors.

use std::collections::{BTreeMap, BTreeSet};

use hcs_core::settings::{ColumnKey, MeasureType, Measurement, Stats};
use hcs_core::ClassId;

use crate::table::{CellColor, Table, TableCell};

/// The four dashboard shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DashboardType {
    /// One table per class.
    Normal,
    /// Keyed by intersecting target class; rows are parents, columns child
    /// statistics.
    Intersection,
    /// One table per (class, intersecting class) pair.
    Distance,
    /// Classes sharing tracking ids, rows aligned by tracking id.
    Coloc,
}

/// Identity of one dashboard tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TabWindowKey {
    pub dashboard_type: DashboardType,
    pub key: u32,
}

#[derive(Default)]
struct Entry {
    col_name: String,
    intersecting_col: Option<i32>,
    cols: Vec<i32>,
}

#[derive(Clone, Copy)]
struct RowInfo {
    starting_row: i32,
    bg_color: CellColor,
}

fn is_distance(measure: Measurement) -> bool {
    matches!(
        measure.measure_type(),
        MeasureType::Distance | MeasureType::DistanceId
    )
}

pub struct Dashboard;

impl Dashboard {
    /// Categorize the input table's columns into dashboard tabs and align
    /// their rows.
    pub fn convert(
        table_in: &Table,
        classes_with_same_tracking_id: &BTreeSet<BTreeSet<ClassId>>,
        is_image_view: bool,
    ) -> BTreeMap<TabWindowKey, Table> {
        let mut dashboards: BTreeMap<u32, Entry> = BTreeMap::new();
        let mut intersecting: BTreeMap<u32, Entry> = BTreeMap::new();
        let mut distance: BTreeMap<u32, Entry> = BTreeMap::new();
        let mut colocalizing: BTreeMap<u32, Entry> = BTreeMap::new();

        // First find the intersecting target classes and the coloc groups.
        let mut coloc_group_ids: BTreeMap<&BTreeSet<ClassId>, u32> = BTreeMap::new();
        let mut next_coloc_id = 0u32;
        for (col_idx, col) in table_in.columns() {
            if col.settings.measure == Measurement::Intersecting {
                let entry =
                    intersecting.entry(u32::from(col.settings.intersecting_class.0)).or_default();
                entry.intersecting_col = Some(*col_idx);
                entry.col_name = col.settings.names.intersecting_name.clone();
            }

            for coloc_group in classes_with_same_tracking_id {
                if coloc_group.contains(&col.settings.class_id) {
                    let map_id = *coloc_group_ids.entry(coloc_group).or_insert_with(|| {
                        let id = next_coloc_id;
                        next_coloc_id += 1;
                        id
                    });
                    let entry = colocalizing.entry(map_id).or_default();
                    entry.cols.push(*col_idx);
                    entry.col_name = col.settings.names.class_name.clone();
                }
            }
        }

        // Now route every column into its dashboard.
        for (col_idx, col) in table_in.columns() {
            if is_distance(col.settings.measure) && is_image_view {
                let key = (u32::from(col.settings.class_id.0) << 16)
                    | u32::from(col.settings.intersecting_class.0);
                let entry = distance.entry(key).or_default();
                entry.col_name = format!(
                    "Distance {} to {}",
                    col.settings.names.class_name, col.settings.names.intersecting_name
                );
                entry.cols.push(*col_idx);
            } else if let Some(entry) =
                intersecting.get_mut(&u32::from(col.settings.class_id.0))
            {
                entry.col_name = col.settings.names.class_name.clone();
                entry.cols.push(*col_idx);
            } else {
                let entry = dashboards.entry(u32::from(col.settings.class_id.0)).or_default();
                entry.col_name = col.settings.names.class_name.clone();
                entry.cols.push(*col_idx);
            }
        }

        let mut tabs = BTreeMap::new();
        let mut create_dashboards =
            |entries: BTreeMap<u32, Entry>, dashboard_type: DashboardType| {
                for (key, entry) in entries {
                    let tab_key = TabWindowKey { dashboard_type, key };
                    let mut out = Table::new();
                    Self::set_data(
                        &mut out,
                        &entry.col_name,
                        &entry.cols,
                        table_in,
                        is_image_view,
                        dashboard_type == DashboardType::Coloc,
                        entry.intersecting_col,
                    );
                    tabs.insert(tab_key, out);
                }
            };

        create_dashboards(dashboards, DashboardType::Normal);
        create_dashboards(intersecting, DashboardType::Intersection);
        create_dashboards(distance, DashboardType::Distance);
        create_dashboards(colocalizing, DashboardType::Coloc);

        tabs
    }

    /// Fill one dashboard table.
    ///
    /// Data arrives ordered by image, parent object, object. Rows align
    /// first by parent object id (or tracking id for coloc tables); the
    /// first occurrence of a key fixes its row and color, later occurrences
    /// reuse both. The alternating color toggles only on new keys.
    fn set_data(
        table_out: &mut Table,
        description: &str,
        cols: &[i32],
        table_in: &Table,
        is_image_view: bool,
        is_coloc: bool,
        intersecting_col: Option<i32>,
    ) {
        table_out.set_title(description);
        table_out.clear();

        let mut start_of_new_parent: BTreeMap<u64, RowInfo> = BTreeMap::new();
        let mut tracking_id_mapping: BTreeMap<u64, RowInfo> = BTreeMap::new();
        let mut highest_row = 0i32;
        let mut alternate = 0i32;
        let mut bg_color = CellColor::Base;

        // The extra leftmost columns of image views.
        let mut col_idx_object_id = 0i32;
        const COL_IDX_INTERSECTING: i32 = 1;

        let mut act_column_key: Option<ColumnKey> = None;
        let mut col_table_tmp = 0i32;

        for col in cols {
            let Some(column) = table_in.columns().get(col) else {
                continue;
            };
            let class_changed = act_column_key
                .as_ref()
                .map(|key| key.class_id != column.settings.class_id)
                .unwrap_or(true);
            act_column_key = Some(column.settings.clone());
            if class_changed && is_image_view {
                // A fresh class block gets its own object-id column.
                col_idx_object_id = col_table_tmp;
                if intersecting_col.is_some() && col_table_tmp == 0 {
                    // The parent object id sits in the second column.
                    col_table_tmp += 2;
                } else {
                    col_table_tmp += 1;
                }
            }
            let column_key = act_column_key.clone().unwrap_or_default();

            let mut row = 0i32;
            for (_, cell) in table_in.column_cells(*col) {
                if cell.object_id == 0 {
                    continue;
                }

                // Row placement for coloc: tracking id decides.
                let mut row_to_place = row;
                if is_coloc && is_image_view {
                    if cell.tracking_id == 0 {
                        continue;
                    }
                    match tracking_id_mapping.get(&cell.tracking_id) {
                        Some(info) => {
                            row_to_place = info.starting_row;
                            bg_color = info.bg_color;
                        }
                        None => {
                            bg_color = if alternate % 2 != 0 {
                                CellColor::Alternate
                            } else {
                                CellColor::Base
                            };
                            tracking_id_mapping.insert(
                                cell.tracking_id,
                                RowInfo { starting_row: highest_row, bg_color },
                            );
                            row_to_place = highest_row;
                            highest_row += 1;
                            alternate += 1;
                        }
                    }
                }

                // Alternating row color keyed by the parent group.
                if !is_coloc {
                    let mut key = cell.parent_object_id;
                    if key == 0 {
                        key = cell.object_id;
                    }
                    match start_of_new_parent.get(&key) {
                        Some(info) => {
                            bg_color = info.bg_color;
                        }
                        None => {
                            bg_color = if alternate % 2 != 0 {
                                CellColor::Alternate
                            } else {
                                CellColor::Base
                            };
                            alternate += 1;
                            start_of_new_parent
                                .insert(key, RowInfo { starting_row: row_to_place, bg_color });
                        }
                    }
                }

                // The base32 object-id column, accented inside the row tone.
                if is_image_view {
                    let mut id_key = column_key.clone();
                    id_key.measure = Measurement::ObjectId;
                    id_key.stats = Stats::Off;
                    table_out.set_col_settings(col_idx_object_id, id_key);

                    let mut id_cell = cell.clone();
                    id_cell.is_object_id_cell = true;
                    id_cell.background = if bg_color == CellColor::Base {
                        CellColor::BaseAccent
                    } else {
                        CellColor::AlternateAccent
                    };
                    table_out.set_cell(row_to_place, col_idx_object_id, id_cell);
                }

                table_out.set_col_settings(col_table_tmp, column_key.clone());
                let mut data_cell = cell.clone();
                data_cell.background = bg_color;
                table_out.set_cell(row_to_place, col_table_tmp, data_cell);

                row += 1;
            }
            col_table_tmp += 1;
        }

        // The intersecting parent column: one filler row per child, linked
        // to the parent object.
        if let (Some(intersecting_col), true, false) = (intersecting_col, is_image_view, is_coloc)
        {
            for (_, cell) in table_in.column_cells(intersecting_col) {
                if cell.object_id == 0 {
                    continue;
                }
                let Some(info) = start_of_new_parent.get(&cell.object_id) else {
                    continue;
                };
                let filler_rows = cell.get_val().max(0.0) as i32;
                for n in 0..filler_rows {
                    let mut parent_key = table_in
                        .columns()
                        .get(&intersecting_col)
                        .map(|c| c.settings.clone())
                        .unwrap_or_default();
                    parent_key.measure = Measurement::ParentObjectId;
                    table_out.set_col_settings(COL_IDX_INTERSECTING, parent_key);

                    let mut id_cell = cell.clone();
                    id_cell.is_object_id_cell = true;
                    id_cell.background = info.bg_color;
                    table_out.set_cell(info.starting_row + n, COL_IDX_INTERSECTING, id_cell);
                }
            }
        }
    }
}
