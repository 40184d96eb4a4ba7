//! # HCS DB - Columnar Result Store
//!
//! This crate owns the persistence layer of the analysis engine: the DuckDB
//! schema holding experiments, jobs, plates, groups, images, planes, objects
//! and their measurements, the appender-based bulk load path used at tile
//! completion, the additive migrations, and the derived analyze-settings
//! cache.
//!
//! ## Concurrency model
//!
//! One [`Database`] handle exists per file. Every operation acquires its own
//! short-lived connection cloned from the handle; parallel readers are fine,
//! writers use per-tile appender units. Appenders are never shared across
//! threads.

mod cache;
mod insert;
mod jobs;
mod migrations;
mod model;
mod queries;
mod schema;

pub use insert::PreparedImage;
pub use model::{AnalyzeMeta, GroupInfo, ImageInfo, JobInfo, ObjectInfo};

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use duckdb::types::{ToSqlOutput, Value};
use duckdb::{Connection, ToSql};
use hcs_core::{Error, Result};
use tracing::debug;

/// Variant-typed parameter for dynamically composed statements.
#[derive(Debug, Clone)]
pub enum DbValue {
    U16(u16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F64(f64),
    Text(String),
}

impl ToSql for DbValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DbValue::U16(v) => ToSqlOutput::Owned(Value::USmallInt(*v)),
            DbValue::U32(v) => ToSqlOutput::Owned(Value::UInt(*v)),
            DbValue::I32(v) => ToSqlOutput::Owned(Value::Int(*v)),
            DbValue::U64(v) => ToSqlOutput::Owned(Value::UBigInt(*v)),
            DbValue::I64(v) => ToSqlOutput::Owned(Value::BigInt(*v)),
            DbValue::F64(v) => ToSqlOutput::Owned(Value::Double(*v)),
            DbValue::Text(v) => ToSqlOutput::Owned(Value::Text(v.clone())),
        })
    }
}

/// List of dynamically composed statement parameters.
pub type DbArgs = Vec<DbValue>;

pub(crate) trait DbResultExt<T> {
    fn ctx(self, what: &str) -> Result<T>;
}

impl<T> DbResultExt<T> for duckdb::Result<T> {
    fn ctx(self, what: &str) -> Result<T> {
        self.map_err(|e| Error::Other(anyhow::anyhow!("{what}: {e}")))
    }
}

/// The singleton store handle.
///
/// Connections are cheap to acquire and short-lived; the handle itself is
/// shared behind `Arc` by the runner and the query plans.
pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) a database file, bring the schema forward, and run
    /// the data migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).ctx("open database")?;
        let db = Self { conn: Mutex::new(conn), path: path.to_path_buf() };
        db.create_tables()?;
        Ok(db)
    }

    /// In-memory store, used by the test suites.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().ctx("open database")?;
        let db = Self { conn: Mutex::new(conn), path: PathBuf::new() };
        db.create_tables()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clone a short-lived connection off the shared handle.
    pub fn acquire(&self) -> Result<Connection> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| Error::Other(anyhow::anyhow!("database handle poisoned")))?;
        guard.try_clone().ctx("clone connection")
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.acquire()?;
        conn.execute_batch(schema::CREATE_TABLES_SQL).ctx("create tables")?;
        migrations::run(self)?;
        Ok(())
    }

    /// Execute a composed statement that returns no rows.
    pub fn execute(&self, sql: &str, args: &[DbValue]) -> Result<usize> {
        debug!(sql, "execute");
        let conn = self.acquire()?;
        conn.execute(sql, duckdb::params_from_iter(args.iter())).ctx("execute")
    }

    /// Execute a composed statement and map every returned row.
    pub fn select_rows<T>(
        &self,
        sql: &str,
        args: &[DbValue],
        mut map_row: impl FnMut(&duckdb::Row<'_>) -> duckdb::Result<T>,
    ) -> Result<Vec<T>> {
        debug!(sql, "select");
        let conn = self.acquire()?;
        let mut stmt = conn.prepare(sql).ctx("prepare")?;
        let mut rows = stmt.query(duckdb::params_from_iter(args.iter())).ctx("query")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().ctx("fetch row")? {
            out.push(map_row(row).ctx("map row")?);
        }
        Ok(out)
    }

    /// Like [`Database::select_rows`] but returns only the first row.
    pub fn select_optional_row<T>(
        &self,
        sql: &str,
        args: &[DbValue],
        map_row: impl FnMut(&duckdb::Row<'_>) -> duckdb::Result<T>,
    ) -> Result<Option<T>> {
        Ok(self.select_rows(sql, args, map_row)?.into_iter().next())
    }
}

/// Current epoch timestamp in microseconds.
pub(crate) fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
