//! Result table model.
//!
//! Query plans fill [`Table`]s with [`TableCell`]s carrying the measurement
//! value plus the metadata the presentation layer needs: ids for
//! back-navigation and row alignment, validity, plate/well coordinates, and
//! color tags.

use std::collections::BTreeMap;

use hcs_core::base32::to_base32;
use hcs_core::settings::ColumnKey;

/// Background tone of a cell. `Base`/`Alternate` are the two row tones the
/// dashboard alternates between; the `Accent` variants are the light/dark
/// shades used by the object-id column inside the row's tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellColor {
    #[default]
    Base,
    Alternate,
    BaseAccent,
    AlternateAccent,
}

/// Plate/well coordinates a cell maps to in heatmap projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellPosition {
    pub group_idx: u64,
    pub pos_x: u32,
    pub pos_y: u32,
}

/// One table cell: a value plus presentation metadata.
#[derive(Debug, Clone, Default)]
pub struct TableCell {
    pub value: f64,
    /// Id the cell groups under (object id in lists, image or group id in
    /// rollups).
    pub object_id: u64,
    /// Real object id, even when `object_id` carries a grouping id.
    pub object_id_real: u64,
    pub parent_object_id: u64,
    pub tracking_id: u64,
    pub is_valid: bool,
    pub row_name: String,
    /// Control image to open on click; `${tile_id}` already substituted.
    pub control_image_path: String,
    pub pos: Option<CellPosition>,
    pub background: CellColor,
    /// Marks the extra leftmost object-id column of dashboards.
    pub is_object_id_cell: bool,
}

impl TableCell {
    pub fn new(value: f64) -> Self {
        Self { value, is_valid: true, ..Default::default() }
    }

    pub fn get_val(&self) -> f64 {
        self.value
    }

    /// Base32 rendering of the object id shown in id columns.
    pub fn object_id_base32(&self) -> String {
        to_base32(self.object_id)
    }
}

/// One column: header text plus the column key it came from.
#[derive(Debug, Clone, Default)]
pub struct TableColumn {
    pub header: String,
    pub settings: ColumnKey,
}

/// A generated result table.
///
/// Cells are stored column-major, which matches how the dashboard consumes
/// them; random access by (row, col) is available through [`Table::cell`].
#[derive(Debug, Clone, Default)]
pub struct Table {
    title: String,
    class_name: String,
    columns: BTreeMap<i32, TableColumn>,
    row_headers: BTreeMap<i32, String>,
    cells: BTreeMap<(i32, i32), TableCell>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_class_name(&mut self, name: impl Into<String>) {
        self.class_name = name.into();
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Set a column from its key; the header is derived.
    pub fn set_col_settings(&mut self, col: i32, key: ColumnKey) {
        self.columns
            .insert(col, TableColumn { header: key.create_header(), settings: key });
    }

    /// Set a plain text header (heatmap grids).
    pub fn set_col_header_text(&mut self, col: i32, header: impl Into<String>) {
        let entry = self.columns.entry(col).or_default();
        entry.header = header.into();
    }

    pub fn set_row_header(&mut self, row: i32, header: impl Into<String>) {
        self.row_headers.insert(row, header.into());
    }

    pub fn row_header(&self, row: i32) -> &str {
        self.row_headers.get(&row).map(String::as_str).unwrap_or("")
    }

    pub fn set_cell(&mut self, row: i32, col: i32, cell: TableCell) {
        self.cells.insert((col, row), cell);
    }

    pub fn cell(&self, row: i32, col: i32) -> Option<&TableCell> {
        self.cells.get(&(col, row))
    }

    pub fn cell_mut(&mut self, row: i32, col: i32) -> Option<&mut TableCell> {
        self.cells.get_mut(&(col, row))
    }

    pub fn columns(&self) -> &BTreeMap<i32, TableColumn> {
        &self.columns
    }

    /// Cells of one column in row order.
    pub fn column_cells(&self, col: i32) -> impl Iterator<Item = (i32, &TableCell)> {
        self.cells
            .range((col, i32::MIN)..=(col, i32::MAX))
            .map(|((_, row), cell)| (*row, cell))
    }

    pub fn nr_of_cols(&self) -> i32 {
        self.columns.keys().next_back().map(|c| c + 1).unwrap_or(0)
    }

    pub fn nr_of_rows(&self) -> i32 {
        self.cells.keys().map(|(_, row)| row + 1).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.row_headers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_cells_iterates_one_column_in_row_order() {
        let mut table = Table::new();
        table.set_cell(1, 0, TableCell::new(1.0));
        table.set_cell(0, 0, TableCell::new(2.0));
        table.set_cell(0, 1, TableCell::new(3.0));

        let col0: Vec<(i32, f64)> =
            table.column_cells(0).map(|(row, c)| (row, c.value)).collect();
        assert_eq!(col0, vec![(0, 2.0), (1, 1.0)]);
        assert_eq!(table.nr_of_rows(), 2);
        assert_eq!(table.nr_of_cols(), 0);
    }

    #[test]
    fn object_id_renders_base32() {
        let mut cell = TableCell::new(0.0);
        cell.object_id = 1;
        assert_eq!(cell.object_id_base32(), "AAB");
    }
}
