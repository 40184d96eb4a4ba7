//! Grouping of column requests into statements and the assembly of the
//! output table.

use std::collections::BTreeMap;

use hcs_core::settings::{ColumnIdx, ColumnKey, MeasureType, ResultsSettings};
use hcs_core::ClassId;

use crate::prepared::PreparedStatement;
use crate::table::{Table, TableCell};

/// Defines which column requests can be answered by one statement.
///
/// Columns sharing (class, z, t) share a statement; every distance target
/// forces a statement of its own, and a distance column never shares one
/// with non-distance columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryKey {
    pub class_id: ClassId,
    pub z_stack: i32,
    pub t_stack: i32,
    pub distance_to_class: ClassId,
}

impl QueryKey {
    /// Composite used for ordering. Keys without a distance target sort
    /// first so heatmaps keep the order rows were queried in.
    fn sort_key(&self) -> u128 {
        let low = (u64::from(self.z_stack as u32) << 32) | u64::from(self.t_stack as u32);
        let high = if self.distance_to_class == ClassId::NONE {
            u64::from(self.class_id.0)
        } else {
            ((u64::from(self.distance_to_class.0) + 1) << 16) | u64::from(self.class_id.0)
        };
        (u128::from(high) << 64) | u128::from(low)
    }
}

impl PartialOrd for QueryKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// The table skeleton plus one [`PreparedStatement`] per [`QueryKey`].
///
/// The statement's database column order is mapped back to every output
/// column requesting the same key, so duplicated requests resolve to a
/// single projected column.
#[derive(Debug)]
pub struct ResultingTable {
    statements: BTreeMap<QueryKey, PreparedStatement>,
    /// ColumnKey to all output columns requesting it.
    table_mapping: BTreeMap<ColumnKey, Vec<ColumnIdx>>,
    table: Table,
}

impl ResultingTable {
    pub fn new(settings: &ResultsSettings) -> Self {
        let mut statements: BTreeMap<QueryKey, PreparedStatement> = BTreeMap::new();
        let mut table_mapping: BTreeMap<ColumnKey, Vec<ColumnIdx>> = BTreeMap::new();
        let mut table = Table::new();

        for (col_idx, col_key) in settings.columns() {
            let measure_type = col_key.measure.measure_type();
            let query_key = if measure_type == MeasureType::Distance
                || measure_type == MeasureType::DistanceId
            {
                // Each distance pair gets a statement of its own.
                QueryKey {
                    class_id: col_key.class_id,
                    z_stack: col_key.z_stack,
                    t_stack: settings.filter().t_stack,
                    distance_to_class: col_key.intersecting_class,
                }
            } else {
                QueryKey {
                    class_id: col_key.class_id,
                    z_stack: col_key.z_stack,
                    t_stack: settings.filter().t_stack,
                    distance_to_class: ClassId::NONE,
                }
            };

            statements
                .entry(query_key)
                .or_insert_with(|| {
                    PreparedStatement::new(col_key.names.clone(), settings.filter().t_stack)
                })
                .add_column(col_key.clone());
            table_mapping.entry(col_key.clone()).or_default().push(*col_idx);
            table.set_col_settings(col_idx.col_idx, col_key.clone());
        }

        Self { statements, table_mapping, table }
    }

    pub fn statements(&self) -> impl Iterator<Item = (&QueryKey, &PreparedStatement)> {
        self.statements.iter()
    }

    /// Place a cell under every output column mapped to the statement's
    /// database column.
    pub fn set_data(
        &mut self,
        statement: &PreparedStatement,
        row: i32,
        db_col_idx: i32,
        row_name: &str,
        cell: TableCell,
    ) {
        let Some(column_key) = statement.column_at(db_col_idx) else {
            return;
        };
        if let Some(out_columns) = self.table_mapping.get(column_key) {
            self.table.set_row_header(row, row_name);
            for out in out_columns {
                self.table.set_cell(row, out.col_idx, cell.clone());
            }
        }
    }

    /// First output column index of a statement's database column.
    pub fn col_idx_from_db_col_idx(
        &self,
        statement: &PreparedStatement,
        db_col_idx: i32,
    ) -> Option<ColumnIdx> {
        let column_key = statement.column_at(db_col_idx)?;
        self.table_mapping.get(column_key)?.first().copied()
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn into_table(self) -> Table {
        self.table
    }
}
