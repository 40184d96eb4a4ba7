//! # HCS Query - Result Table Generation
//!
//! The read path of the analysis engine: composes per-class, per-measure SQL
//! statements over the store ([`PreparedStatement`] grouped by [`QueryKey`]),
//! runs the per-image / per-well / per-plate query plans, and shapes the raw
//! measurement rows into presentation tables, density heatmaps, and aligned
//! dashboards.

mod dashboard;
mod prepared;
mod resulting;
mod stats_group;
mod stats_image;
mod table;
mod template;

pub use dashboard::{Dashboard, DashboardType, TabWindowKey};
pub use prepared::{JoinResults, PreparedStatement};
pub use resulting::{QueryKey, ResultingTable};
pub use stats_group::{Grouping, StatsPerGroup};
pub use stats_image::StatsPerImage;
pub use table::{CellColor, CellPosition, Table, TableCell, TableColumn};
pub use template::results_settings_from_cache;

/// Convert a dynamically typed cell into a float value; NULL and non-numeric
/// values yield `None`.
pub(crate) fn value_to_f64(value: &duckdb::types::Value) -> Option<f64> {
    use duckdb::types::Value;
    match value {
        Value::Null => None,
        Value::Boolean(v) => Some(f64::from(u8::from(*v))),
        Value::TinyInt(v) => Some(f64::from(*v)),
        Value::SmallInt(v) => Some(f64::from(*v)),
        Value::Int(v) => Some(f64::from(*v)),
        Value::BigInt(v) => Some(*v as f64),
        Value::HugeInt(v) => Some(*v as f64),
        Value::UTinyInt(v) => Some(f64::from(*v)),
        Value::USmallInt(v) => Some(f64::from(*v)),
        Value::UInt(v) => Some(f64::from(*v)),
        Value::UBigInt(v) => Some(*v as f64),
        Value::Float(v) => Some(f64::from(*v)),
        Value::Double(v) => Some(*v),
        _ => None,
    }
}
