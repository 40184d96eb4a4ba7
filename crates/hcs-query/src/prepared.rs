//! Per-statement SQL fragment composition.
//!
//! A [`PreparedStatement`] carries the columns one generated statement must
//! project and synthesizes the three fragment kinds: the aggregate select
//! list, the measure-specific joins, and the intersection CTE body. The
//! fragments are covered by golden-string tests; this is where most query
//! regressions originate.

use std::collections::{BTreeMap, BTreeSet};

use hcs_core::settings::{ColumnKey, ColumnNames, MeasureType, Measurement, Stats};
use hcs_core::ClassId;

/// What kinds of joins a statement ended up with.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinResults {
    pub contains_distance: bool,
    pub contains_intensity: bool,
    pub contains_intersection: bool,
}

/// One SQL statement in the making: the deduplicated columns it projects in
/// database order.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    columns: BTreeMap<i32, ColumnKey>,
    col_names: ColumnNames,
    /// T-stack the enclosing filter selects; baked into the join conditions.
    t_stack_filter: i32,
}

impl PreparedStatement {
    pub fn new(col_names: ColumnNames, t_stack_filter: i32) -> Self {
        Self { columns: BTreeMap::new(), col_names, t_stack_filter }
    }

    /// Append a column unless an equal one (display names ignored) exists.
    pub fn add_column(&mut self, col: ColumnKey) {
        if self.columns.values().any(|existing| *existing == col) {
            return;
        }
        let pos = self.columns.len() as i32;
        self.columns.insert(pos, col);
    }

    pub fn columns(&self) -> &BTreeMap<i32, ColumnKey> {
        &self.columns
    }

    pub fn column_at(&self, db_col_idx: i32) -> Option<&ColumnKey> {
        self.columns.get(&db_col_idx)
    }

    pub fn col_size(&self) -> usize {
        self.columns.len()
    }

    pub fn col_names(&self) -> &ColumnNames {
        &self.col_names
    }

    /// Child-count sum lines of the intersection CTE, one per intersecting
    /// target class.
    pub fn create_intersection_query(&self) -> String {
        let mut sum = String::new();
        for column in self.columns.values() {
            if column.measure.measure_type() == MeasureType::Intersection {
                let ch = column.intersecting_class.0;
                sum.push_str(&format!(
                    "SUM(CASE WHEN ad.class_id = {ch} THEN 1 ELSE 0 END) AS recursive_child_count_{ch},\n"
                ));
            }
        }
        // Replace the trailing ",\n" so the fragment can close the select list.
        if let Some(stripped) = sum.strip_suffix(",\n") {
            let mut out = stripped.to_string();
            out.push('\n');
            return out;
        }
        sum
    }

    /// The aggregate select list.
    ///
    /// `is_outer` switches between the inner per-object aggregation (reading
    /// table-prefixed raw columns) and the outer rollup (reading the inner
    /// aliases). `exclude_invalid` masks values of invalid images to NULL.
    /// `off_value` is the carrier aggregate used where a column's stat is
    /// `Off`; `override_stats` replaces the per-column stat in cross-image
    /// rollups.
    pub fn create_stats_query(
        &self,
        is_outer: bool,
        exclude_invalid: bool,
        off_value: &str,
        override_stats: Option<Stats>,
    ) -> String {
        let mut channels = String::new();
        for column in self.columns.values() {
            let stats = override_stats.unwrap_or(column.stats);

            let inject_case = |expr: String| -> String {
                if exclude_invalid {
                    format!("CASE WHEN validity = 0 THEN {expr} ELSE NULL END")
                } else {
                    expr
                }
            };

            let create_name = |stats: Stats| -> String {
                if !is_outer {
                    column.measure.sql_value().to_string()
                } else {
                    format!("{}_{}", column.measure.sql_alias(), stats.sql_name(off_value))
                }
            };

            match column.measure.measure_type() {
                MeasureType::Intensity => {
                    let (table_prefix, meas_suffix) = if is_outer {
                        (" ".to_string(), format!("_{}", column.cross_channel_c))
                    } else {
                        (format!(" tj{}.", column.cross_channel_c), String::new())
                    };
                    channels.push_str(&format!(
                        "{}({}) AS {}_{}_{},\n",
                        stats.sql_name(off_value),
                        inject_case(format!(
                            "{table_prefix}{}{meas_suffix}",
                            create_name(column.stats)
                        )),
                        column.measure.sql_alias(),
                        column.stats.sql_name(off_value),
                        column.cross_channel_c,
                    ));
                }
                MeasureType::Intersection => {
                    // The historical off carrier of child counts is AVG.
                    let off_value = if off_value == "ANY_VALUE" { "AVG" } else { off_value };
                    let ch = column.intersecting_class.0;
                    let col_name = if is_outer {
                        format!(
                            "recursive_child_count_{ch}_{}",
                            column.stats.sql_name(off_value)
                        )
                    } else {
                        format!("recursive_child_count_{ch}")
                    };
                    let table_prefix = if is_outer { " " } else { " ti." };
                    channels.push_str(&format!(
                        "{}({}) AS recursive_child_count_{ch}_{},\n",
                        stats.sql_name(off_value),
                        inject_case(format!("{table_prefix}{col_name}")),
                        column.stats.sql_name(off_value),
                    ));
                }
                MeasureType::Id | MeasureType::DistanceId => {
                    // Ids are projected as-is; rollups carry the smallest
                    // representative through the off carrier.
                    let table_prefix = if is_outer {
                        " "
                    } else if column.measure.measure_type() == MeasureType::DistanceId {
                        " td."
                    } else {
                        " t1."
                    };
                    channels.push_str(&format!(
                        "{}({}) AS {}_{},\n",
                        Stats::Off.sql_name(off_value),
                        inject_case(format!("{table_prefix}{}", create_name(Stats::Off))),
                        column.measure.sql_alias(),
                        Stats::Off.sql_name(off_value),
                    ));
                }
                MeasureType::Distance => {
                    let table_prefix = if is_outer { " " } else { " td." };
                    channels.push_str(&format!(
                        "{}({}) AS {}_{},\n",
                        stats.sql_name(off_value),
                        inject_case(format!("{table_prefix}{}", create_name(column.stats))),
                        column.measure.sql_alias(),
                        column.stats.sql_name(off_value),
                    ));
                }
                MeasureType::Object | MeasureType::Position => {
                    let table_prefix = if is_outer || column.measure == Measurement::Count {
                        " "
                    } else {
                        " t1."
                    };
                    channels.push_str(&format!(
                        "{}({}) AS {}_{},\n",
                        stats.sql_name(off_value),
                        inject_case(format!("{table_prefix}{}", create_name(column.stats))),
                        column.measure.sql_alias(),
                        column.stats.sql_name(off_value),
                    ));
                }
            }
        }
        channels
    }

    /// The measure-specific joins of the inner query: one
    /// `object_measurements` join per distinct cross channel, one
    /// `distance_measurements` join per statement, and the intersection CTE
    /// join.
    pub fn create_stats_query_joins(
        &self,
        is_image: bool,
        mut results: Option<&mut JoinResults>,
    ) -> String {
        let mut joined_stacks: BTreeSet<i32> = BTreeSet::new();
        let mut joined_distance: BTreeSet<ClassId> = BTreeSet::new();
        let mut intersection_joined = false;
        let mut joins = String::new();

        for column in self.columns.values() {
            match column.measure.measure_type() {
                MeasureType::Intensity => {
                    if joined_stacks.insert(column.cross_channel_c) {
                        let tbl = format!("tj{}", column.cross_channel_c);
                        joins.push_str(&format!(
                            "LEFT JOIN object_measurements {tbl} ON t1.object_id={tbl}.object_id \
                             AND t1.image_id={tbl}.image_id AND {tbl}.meas_stack_c={} \
                             AND {tbl}.meas_stack_z={} AND {tbl}.meas_stack_t={}\n",
                            column.cross_channel_c, column.z_stack, self.t_stack_filter,
                        ));
                        if let Some(res) = results.as_deref_mut() {
                            res.contains_intensity = true;
                        }
                    }
                }
                MeasureType::Distance | MeasureType::DistanceId => {
                    if joined_distance.insert(column.intersecting_class) {
                        joins.push_str(&format!(
                            "LEFT JOIN distance_measurements td ON t1.object_id=td.object_id \
                             AND t1.image_id=td.image_id AND td.meas_class_id={} \
                             AND td.meas_stack_z={} AND td.meas_stack_t={}\n",
                            column.intersecting_class.0, column.z_stack, self.t_stack_filter,
                        ));
                        if let Some(res) = results.as_deref_mut() {
                            res.contains_distance = true;
                        }
                    }
                }
                MeasureType::Intersection => {
                    if !intersection_joined {
                        intersection_joined = true;
                        joins.push_str("LEFT JOIN TblIntersecting ti ON ti.image_id=t1.image_id");
                        if is_image {
                            joins.push_str(" AND ti.object_id=t1.object_id\n");
                        } else {
                            joins.push('\n');
                        }
                        if let Some(res) = results.as_deref_mut() {
                            res.contains_intersection = true;
                        }
                    }
                }
                _ => {}
            }
        }
        joins
    }
}
