//! Per-well and per-plate query plans.
//!
//! Both run the same two-level statement: an inner aggregation per image
//! (`imageGrouped`) and an outer projection that either lists images of one
//! well or rolls wells up into plate positions.

use std::collections::BTreeMap;

use hcs_core::settings::{
    ColumnIdx, MeasureType, ObjectFilter, ResultsSettings, Stats, TStackHandling,
};
use hcs_core::Result;
use hcs_db::{Database, DbArgs, DbValue};
use tracing::debug;

use crate::prepared::PreparedStatement;
use crate::resulting::{QueryKey, ResultingTable};
use crate::table::{CellPosition, Table, TableCell};
use crate::value_to_f64;

/// Rollup target of the group plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    ByWell,
    ByPlate,
}

pub struct StatsPerGroup;

impl StatsPerGroup {
    /// Aggregate table: one row per image of a well (`ByWell`) or one row
    /// per well of the plate (`ByPlate`).
    ///
    /// Per-object columns (ids, positions) are stripped first; they cannot
    /// be rolled up meaningfully. Returns the table plus the filter that was
    /// actually applied.
    pub fn to_table(
        database: &Database,
        filter_in: &ResultsSettings,
        grouping: Grouping,
    ) -> Result<(Table, ResultsSettings)> {
        let mut filter = ResultsSettings::default();
        let mut col_idx_out = 0;
        for key in filter_in.columns().values() {
            match key.measure.measure_type() {
                MeasureType::DistanceId | MeasureType::Id | MeasureType::Position => continue,
                _ => {}
            }
            filter.add_column(ColumnIdx::new(0, col_idx_out), key.clone());
            col_idx_out += 1;
        }
        filter.set_filter(
            filter_in.filter().clone(),
            filter_in.plate_setup().clone(),
            filter_in.density_map_settings().clone(),
        );

        // Image to well-place assignment.
        let well_pos = if grouping == Grouping::ByWell {
            let (map, _, _) = filter.plate_setup().transform_matrix();
            map
        } else {
            BTreeMap::new()
        };

        let mut result = ResultingTable::new(&filter);
        let statements: Vec<(QueryKey, PreparedStatement)> =
            result.statements().map(|(k, s)| (*k, s.clone())).collect();

        // Keeps row indices dense across classes so multi-class exports stay
        // row-aligned even when some classes lack data for some images.
        let mut row_indexes: BTreeMap<(u64, u32), i32> = BTreeMap::new();
        let find_max_row_idx = |row_indexes: &BTreeMap<(u64, u32), i32>| -> i32 {
            row_indexes.values().copied().max().unwrap_or(-1)
        };

        for (query_key, statement) in statements {
            let (sql, args) = Self::to_sql(&query_key, filter.filter(), &statement, grouping);
            debug!(class = %query_key.class_id, ?grouping, "group query");
            let column_nr = statement.col_size() as i32;

            let rows = database.select_rows(&sql, &args, |row| {
                let mut values = Vec::with_capacity(column_nr as usize);
                for col in 0..column_nr {
                    values.push(value_to_f64(&row.get::<_, duckdb::types::Value>(col as usize)?));
                }
                let base = column_nr as usize;
                Ok(GroupRow {
                    values,
                    group_id: row.get(base)?,
                    image_group_idx: row.get(base + 1)?,
                    plate_pos_x: row.get(base + 2)?,
                    plate_pos_y: row.get(base + 3)?,
                    file_name: row.get(base + 4)?,
                    image_id: row.get(base + 5)?,
                    validity: row.get(base + 6)?,
                    t_stack: row.get(base + 7)?,
                })
            })?;

            for data in rows {
                // Classes without data must not shift the rows of other
                // classes; the first occurrence of an id fixes its row.
                let align_key = match grouping {
                    Grouping::ByWell => (data.image_id, data.t_stack),
                    Grouping::ByPlate => (u64::from(data.group_id), data.t_stack),
                };
                let row_idx = match row_indexes.get(&align_key) {
                    Some(row) => *row,
                    None => {
                        let next = find_max_row_idx(&row_indexes) + 1;
                        row_indexes.insert(align_key, next);
                        next
                    }
                };

                let (row_name, pos) = match grouping {
                    Grouping::ByWell => {
                        let pos = well_pos
                            .get(&(data.image_group_idx as i32))
                            .copied()
                            .unwrap_or(hcs_core::settings::ImgPositionInWell { x: 1, y: 1 });
                        (
                            format!("t={} {}", data.t_stack, data.file_name),
                            CellPosition {
                                group_idx: u64::from(data.image_group_idx),
                                pos_x: pos.x as u32,
                                pos_y: pos.y as u32,
                            },
                        )
                    }
                    Grouping::ByPlate => {
                        let col_c = format!(
                            "{}{}",
                            char::from(b'A' + ((data.plate_pos_y.max(1) - 1) % 26) as u8),
                            data.plate_pos_x
                        );
                        (
                            format!("t={} {col_c}", data.t_stack),
                            CellPosition {
                                group_idx: (u64::from(data.plate_pos_x) << 32)
                                    | u64::from(data.plate_pos_y),
                                pos_x: data.plate_pos_x,
                                pos_y: data.plate_pos_y,
                            },
                        )
                    }
                };

                let group_object_id = match grouping {
                    Grouping::ByWell => data.image_id,
                    Grouping::ByPlate => u64::from(data.group_id),
                };

                for (col_idx, value) in data.values.iter().enumerate() {
                    let Some(value) = value else {
                        continue;
                    };
                    let cell = TableCell {
                        value: *value,
                        object_id: group_object_id,
                        object_id_real: group_object_id,
                        is_valid: data.validity == 0,
                        row_name: row_name.clone(),
                        pos: Some(pos),
                        ..Default::default()
                    };
                    result.set_data(&statement, row_idx, col_idx as i32, &row_name, cell);
                }
            }
        }
        Ok((result.into_table(), filter))
    }

    /// Plate or well heatmap grids derived from the aggregate table: one
    /// grid per column, keyed by the cells' plate/well coordinates.
    pub fn to_heatmap(
        database: &Database,
        filter_in: &ResultsSettings,
        grouping: Grouping,
    ) -> Result<Vec<(hcs_core::settings::ColumnKey, Table)>> {
        let (table, filter) = Self::to_table(database, filter_in, grouping)?;

        let (size_x, size_y) = match grouping {
            Grouping::ByWell => {
                let (_, x, y) = filter.plate_setup().transform_matrix();
                (x, y)
            }
            Grouping::ByPlate => {
                (filter.plate_setup().cols.max(1), filter.plate_setup().rows.max(1))
            }
        };

        let mut grids = Vec::new();
        for (col_idx, column) in table.columns() {
            let mut grid = Table::new();
            grid.set_title(column.header.clone());
            grid.set_class_name(column.settings.names.class_name.clone());
            grid.set_col_header_text(0, column.header.clone());
            for row in 0..size_y {
                grid.set_row_header(row, format!("{}", char::from(b'A' + (row % 26) as u8)));
                for col in 0..size_x {
                    let mut cell = TableCell::new(f64::NAN);
                    cell.is_valid = false;
                    grid.set_cell(row, col, cell);
                }
            }
            for (_, cell) in table.column_cells(*col_idx) {
                let Some(pos) = cell.pos else {
                    continue;
                };
                if pos.pos_x == 0 || pos.pos_y == 0 {
                    continue;
                }
                let x = pos.pos_x as i32 - 1;
                let y = pos.pos_y as i32 - 1;
                if x >= size_x || y >= size_y {
                    continue;
                }
                grid.set_cell(y, x, cell.clone());
            }
            grids.push((column.settings.clone(), grid));
        }
        Ok(grids)
    }

    /// The two-level group statement.
    pub fn to_sql(
        query_key: &QueryKey,
        filter: &ObjectFilter,
        statement: &PreparedStatement,
        grouping: Grouping,
    ) -> (String, DbArgs) {
        let sum_fragment = statement.create_intersection_query();
        let intersect = if sum_fragment.is_empty() {
            "WITH ".to_string()
        } else {
            format!(
                "WITH TblIntersecting AS (\n\
                 SELECT\n\
                 ad.image_id,\n\
                 {sum_fragment}\
                 FROM objects ad\n\
                 WHERE ad.meas_parent_class_id = {}\n\
                 GROUP BY ad.image_id, ad.class_id, ad.meas_parent_object_id, ad.meas_parent_class_id\n\
                 ),\n",
                query_key.class_id.0
            )
        };

        let mut sql = format!(
            "{intersect}imageGrouped AS (\n\
             SELECT\n\
             {stats}\
             ANY_VALUE(images_groups.group_id) AS group_id,\n\
             ANY_VALUE(images_groups.image_group_idx) AS image_group_idx,\n\
             ANY_VALUE(groups.pos_on_plate_x) AS pos_on_plate_x,\n\
             ANY_VALUE(groups.pos_on_plate_y) AS pos_on_plate_y,\n\
             ANY_VALUE(images.file_name) AS file_name,\n\
             ANY_VALUE(images.image_id) AS image_id,\n\
             MAX(images.validity) AS validity,\n\
             ANY_VALUE(t1.stack_t) AS stack_t_real\n\
             FROM objects t1\n\
             {joins}\
             JOIN images_groups ON t1.image_id=images_groups.image_id\n\
             JOIN groups ON images_groups.group_id=groups.group_id\n\
             JOIN images ON t1.image_id=images.image_id\n",
            stats = statement.create_stats_query(false, false, "ANY_VALUE", None),
            joins = statement.create_stats_query_joins(false, None),
        );

        // Inner WHERE and grouping: one exact t-stack or one row per t.
        let mut args: DbArgs = Vec::new();
        match filter.t_stack_handling {
            TStackHandling::Individual => {
                if grouping == Grouping::ByWell {
                    sql.push_str(
                        "WHERE\n t1.class_id=? AND images_groups.group_id=? AND stack_z=? AND stack_t=?\n",
                    );
                    args.push(DbValue::U16(query_key.class_id.0));
                    args.push(DbValue::U16(filter.group_id));
                    args.push(DbValue::I32(query_key.z_stack));
                    args.push(DbValue::I32(query_key.t_stack));
                } else {
                    sql.push_str("WHERE\n t1.class_id=? AND stack_z=? AND stack_t=?\n");
                    args.push(DbValue::U16(query_key.class_id.0));
                    args.push(DbValue::I32(query_key.z_stack));
                    args.push(DbValue::I32(query_key.t_stack));
                }
                sql.push_str("GROUP BY\n t1.image_id\n)\nSELECT\n");
            }
            TStackHandling::Slice => {
                if grouping == Grouping::ByWell {
                    sql.push_str(
                        "WHERE\n t1.class_id=? AND images_groups.group_id=? AND stack_z=?\n",
                    );
                    args.push(DbValue::U16(query_key.class_id.0));
                    args.push(DbValue::U16(filter.group_id));
                    args.push(DbValue::I32(query_key.z_stack));
                } else {
                    sql.push_str("WHERE\n t1.class_id=? AND stack_z=?\n");
                    args.push(DbValue::U16(query_key.class_id.0));
                    args.push(DbValue::I32(query_key.z_stack));
                }
                sql.push_str("GROUP BY\n t1.image_id, t1.stack_t\n)\nSELECT\n");
            }
        }

        // Outer projection: plate rollup aggregates again, well listing
        // projects the per-image rows as they are.
        if grouping == Grouping::ByPlate {
            sql.push_str(&statement.create_stats_query(
                true,
                true,
                "ANY_VALUE",
                Some(Stats::Avg),
            ));
            sql.push_str(
                "ANY_VALUE(imageGrouped.group_id) AS group_id,\n\
                 ANY_VALUE(imageGrouped.image_group_idx) AS image_group_idx,\n\
                 ANY_VALUE(imageGrouped.pos_on_plate_x) AS pos_on_plate_x,\n\
                 ANY_VALUE(imageGrouped.pos_on_plate_y) AS pos_on_plate_y,\n\
                 ANY_VALUE(imageGrouped.file_name) AS file_name,\n\
                 ANY_VALUE(imageGrouped.image_id) AS image_id,\n\
                 MAX(imageGrouped.validity) AS validity,\n\
                 ANY_VALUE(imageGrouped.stack_t_real) AS stack_t_real\n",
            );
        } else {
            sql.push_str("*\n");
        }
        sql.push_str("FROM imageGrouped\n");

        match filter.t_stack_handling {
            TStackHandling::Individual => {
                if grouping == Grouping::ByPlate {
                    sql.push_str("GROUP BY group_id\nORDER BY pos_on_plate_y, pos_on_plate_x\n");
                } else {
                    sql.push_str("ORDER BY file_name\n");
                }
            }
            TStackHandling::Slice => {
                if grouping == Grouping::ByPlate {
                    sql.push_str(
                        "GROUP BY group_id, stack_t_real\n\
                         ORDER BY pos_on_plate_y, pos_on_plate_x, stack_t_real\n",
                    );
                } else {
                    sql.push_str("ORDER BY file_name, stack_t_real\n");
                }
            }
        }
        (sql, args)
    }
}

struct GroupRow {
    values: Vec<Option<f64>>,
    group_id: u16,
    image_group_idx: u32,
    plate_pos_x: u32,
    plate_pos_y: u32,
    file_name: String,
    image_id: u64,
    validity: u64,
    t_stack: u32,
}
