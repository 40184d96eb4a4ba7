//! Per-image query plans: the object list and the density heatmap.

use hcs_core::settings::{
    ColumnIdx, ObjectFilter, ResultsSettings, Stats,
};
use hcs_core::{Error, Result};
use hcs_db::{Database, DbArgs, DbValue};
use tracing::debug;

use crate::prepared::PreparedStatement;
use crate::resulting::{QueryKey, ResultingTable};
use crate::table::{Table, TableCell};
use crate::value_to_f64;

/// Grid metadata of one heatmap.
#[derive(Debug, Clone, Default)]
struct ImgInfo {
    width: u64,
    height: u64,
    control_img_path: String,
}

/// List and heatmap plans scoped to explicit image ids.
pub struct StatsPerImage;

impl StatsPerImage {
    /// One row per object. Column stats are forced to `Off` (each object is
    /// its own sample) and collapsing duplicates are dropped.
    pub fn to_table(database: &Database, filter_in: &ResultsSettings) -> Result<Table> {
        let mut filter = ResultsSettings::default();
        let mut still_measured = std::collections::BTreeSet::new();
        let mut tab_col_idx: std::collections::BTreeMap<i32, i32> = std::collections::BTreeMap::new();
        for (idx, key) in filter_in.columns() {
            let mut key_tmp = key.clone();
            key_tmp.stats = Stats::Off;
            if still_measured.insert(key_tmp.clone()) {
                let col = tab_col_idx.entry(idx.tab_idx).or_insert(-1);
                *col += 1;
                filter.add_column(ColumnIdx::new(idx.tab_idx, *col), key_tmp);
            }
        }
        filter.set_filter(
            filter_in.filter().clone(),
            filter_in.plate_setup().clone(),
            filter_in.density_map_settings().clone(),
        );

        let mut result = ResultingTable::new(&filter);
        let statements: Vec<(QueryKey, PreparedStatement)> = result
            .statements()
            .map(|(k, s)| (*k, s.clone()))
            .collect();

        for (query_key, statement) in statements {
            let (sql, args) = Self::to_sql_table(&query_key, filter.filter(), &statement)?;
            debug!(class = %query_key.class_id, "per-image list query");
            let column_nr = statement.col_size() as i32;

            let rows = database.select_rows(&sql, &args, |row| {
                let mut values = Vec::with_capacity(column_nr as usize);
                for col in 0..column_nr {
                    values.push(value_to_f64(&row.get::<_, duckdb::types::Value>(col as usize)?));
                }
                let object_id: u64 = row.get(column_nr as usize + 2)?;
                let object_id_real: u64 = row.get(column_nr as usize + 3)?;
                let parent_object_id: u64 = row.get(column_nr as usize + 4)?;
                let tracking_id: Option<u64> = row.get(column_nr as usize + 5)?;
                let file_name: String = row.get(column_nr as usize + 6)?;
                Ok((values, object_id, object_id_real, parent_object_id, tracking_id, file_name))
            })?;

            for (row_idx, (values, object_id, object_id_real, parent, tracking, file_name)) in
                rows.into_iter().enumerate()
            {
                for (col_idx, value) in values.into_iter().enumerate() {
                    let Some(value) = value else {
                        continue;
                    };
                    let cell = TableCell {
                        value,
                        object_id,
                        object_id_real,
                        parent_object_id: parent,
                        tracking_id: tracking.unwrap_or(0),
                        is_valid: true,
                        row_name: file_name.clone(),
                        ..Default::default()
                    };
                    result.set_data(
                        &statement,
                        row_idx as i32,
                        col_idx as i32,
                        &file_name,
                        cell,
                    );
                }
            }
        }
        Ok(result.into_table())
    }

    /// The per-object statement: inner aggregation grouped by object id,
    /// scoped to the filter's image ids.
    pub fn to_sql_table(
        query_key: &QueryKey,
        filter: &ObjectFilter,
        statement: &PreparedStatement,
    ) -> Result<(String, DbArgs)> {
        let off = "ANY_VALUE";
        let sum_fragment = statement.create_intersection_query();
        let intersect = if sum_fragment.is_empty() {
            String::new()
        } else {
            format!(
                "WITH TblIntersecting AS (\n\
                 SELECT\n\
                 ad.image_id,\n\
                 ad.meas_parent_object_id AS object_id,\n\
                 {sum_fragment}\
                 FROM objects ad\n\
                 WHERE ad.meas_parent_class_id = {}\n\
                 GROUP BY ad.image_id, ad.meas_parent_object_id\n\
                 )\n",
                query_key.class_id.0
            )
        };

        let (placeholders, mut args) = image_id_placeholders(filter)?;

        let sql = format!(
            "{intersect}SELECT\n\
             {stats}\
             {off}(t1.meas_center_x) AS meas_center_x,\n\
             {off}(t1.meas_center_y) AS meas_center_y,\n\
             {off}(t1.object_id) AS object_id,\n\
             {off}(t1.object_id) AS object_id_real,\n\
             {off}(t1.meas_parent_object_id) AS meas_parent_object_id,\n\
             {off}(t1.meas_tracking_id) AS meas_tracking_id,\n\
             {off}(images.file_name) AS file_name\n\
             FROM objects t1\n\
             {joins}\
             JOIN images ON t1.image_id=images.image_id\n\
             WHERE t1.image_id IN ({placeholders}) AND t1.class_id=? AND stack_z=? AND stack_t=?\n\
             GROUP BY t1.object_id\n\
             ORDER BY file_name, object_id",
            stats = statement.create_stats_query(false, false, off, None),
            joins = statement.create_stats_query_joins(true, None),
        );

        args.push(DbValue::U16(query_key.class_id.0));
        args.push(DbValue::I32(query_key.z_stack));
        args.push(DbValue::I32(query_key.t_stack));
        Ok((sql, args))
    }

    /// Density grids: one table per requested column, bucketized by the
    /// density map area size with floor semantics. Empty cells are NaN.
    pub fn to_heatmap(
        database: &Database,
        filter: &ResultsSettings,
    ) -> Result<Vec<(hcs_core::settings::ColumnKey, Table)>> {
        let result = ResultingTable::new(filter);
        let area_size = filter.density_map_settings().density_map_area_size.max(1);
        let mut tables = Vec::new();

        for (query_key, statement) in result.statements() {
            let img_info = Self::image_info(database, filter.filter(), area_size)?;
            let (sql, args) =
                Self::to_sql_heatmap(query_key, filter.filter(), area_size, statement)?;
            debug!(class = %query_key.class_id, "heatmap query");
            let column_nr = statement.col_size() as i32;

            let rows = database.select_rows(&sql, &args, |row| {
                let mut values = Vec::with_capacity(column_nr as usize);
                for col in 0..column_nr {
                    values.push(value_to_f64(&row.get::<_, duckdb::types::Value>(col as usize)?));
                }
                let rect_x = value_to_f64(&row.get::<_, duckdb::types::Value>(column_nr as usize)?);
                let rect_y =
                    value_to_f64(&row.get::<_, duckdb::types::Value>(column_nr as usize + 1)?);
                Ok((values, rect_x, rect_y))
            })?;

            for db_col_idx in 0..column_nr {
                let Some(column_key) = statement.column_at(db_col_idx) else {
                    continue;
                };
                let mut table = Table::new();
                table.set_title(column_key.create_header());
                table.set_class_name(statement.col_names().class_name.clone());
                table.set_col_header_text(0, column_key.create_header());

                for row in 0..img_info.height as i32 {
                    table.set_row_header(row, format!("{}", row + 1));
                    for col in 0..img_info.width as i32 {
                        let mut cell = TableCell::new(f64::NAN);
                        cell.is_valid = false;
                        cell.control_image_path = img_info.control_img_path.clone();
                        table.set_cell(row, col, cell);
                    }
                }

                for (values, rect_x, rect_y) in &rows {
                    let (Some(rect_x), Some(rect_y)) = (rect_x, rect_y) else {
                        continue;
                    };
                    let x = (*rect_x as i64 / i64::from(area_size)) as i32;
                    let y = (*rect_y as i64 / i64::from(area_size)) as i32;
                    if x < 0 || y < 0 || x >= img_info.width as i32 || y >= img_info.height as i32 {
                        continue;
                    }
                    if let Some(value) = values.get(db_col_idx as usize).copied().flatten() {
                        let mut cell = TableCell::new(value);
                        cell.control_image_path = img_info.control_img_path.clone();
                        table.set_cell(y, x, cell);
                    }
                }
                tables.push((column_key.clone(), table));
            }
        }
        Ok(tables)
    }

    fn to_sql_heatmap(
        query_key: &QueryKey,
        filter: &ObjectFilter,
        area_size: u32,
        statement: &PreparedStatement,
    ) -> Result<(String, DbArgs)> {
        let (inner_sql, mut args) = Self::to_sql_table(query_key, filter, statement)?;
        let sql = format!(
            "WITH innerTable AS (\n{inner_sql}\n)\n\
             SELECT\n\
             {stats}\
             floor(meas_center_x / ?) * ? AS rectangle_x,\n\
             floor(meas_center_y / ?) * ? AS rectangle_y\n\
             FROM innerTable\n\
             GROUP BY floor(meas_center_x / ?), floor(meas_center_y / ?)",
            stats = statement.create_stats_query(true, false, "ANY_VALUE", None),
        );
        for _ in 0..6 {
            args.push(DbValue::F64(f64::from(area_size)));
        }
        Ok((sql, args))
    }

    /// Fetch image extents and the control image association of the first
    /// filtered image.
    fn image_info(database: &Database, filter: &ObjectFilter, area_size: u32) -> Result<ImgInfo> {
        let (placeholders, args) = image_id_placeholders(filter)?;
        let sql = format!(
            "SELECT images.width, images.height, images.file_name \
             FROM images WHERE image_id IN ({placeholders})"
        );
        let row = database.select_optional_row(&sql, &args, |row| {
            Ok((
                row.get::<_, u64>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let Some((img_width, img_height, file_name)) = row else {
            return Ok(ImgInfo::default());
        };
        let control = file_name.replace("${tile_id}", "0");
        Ok(ImgInfo {
            width: img_width.div_ceil(u64::from(area_size)),
            height: img_height.div_ceil(u64::from(area_size)),
            control_img_path: control,
        })
    }
}

fn image_id_placeholders(filter: &ObjectFilter) -> Result<(String, DbArgs)> {
    if filter.image_ids.is_empty() {
        return Err(Error::InvalidInput("no image selected".into()));
    }
    let placeholders = vec!["?"; filter.image_ids.len()].join(", ");
    let args = filter.image_ids.iter().map(|id| DbValue::U64(*id)).collect();
    Ok((placeholders, args))
}
