//! # tegpoll Warehouse
//!
//! Local `DuckDB` time-series store for normalized metric points.
//!
//! A poll batch is written in one transaction: either every point of the
//! batch lands in `metric_points` (plus one `ingest_log` row) or none does.
//! The store is write-only from tegpoll's side; reading it back is left to
//! external tooling.
//!
//! ```rust,no_run
//! use tegpoll_warehouse::{PointRecord, StoredValue, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!     let record = PointRecord::new("instant_power", StoredValue::Float(20.0), 1_612_219_386)
//!         .with_tag("device", "site");
//!     let receipt = warehouse.ingest_points("gateway", &[record])?;
//!     println!("stored {} points in {}ms", receipt.points, receipt.latency_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `metric_points` | One row per point: series, device, tags (JSON), epoch seconds, typed value |
//! | `ingest_log` | One row per ingested batch with its write latency |

mod error;
pub mod migrations;
pub mod pool;

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use ::duckdb::{Connection, ToSql};
use serde::Serialize;

pub use error::WarehouseError;
pub use pool::{ConnectionPool, Lease};

/// Warehouse location and pool size.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for tegpoll data.
    pub home: PathBuf,
    pub db_path: PathBuf,
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::in_home(resolve_tegpoll_home())
    }
}

impl WarehouseConfig {
    pub fn in_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            db_path: home.join("warehouse.duckdb"),
            home,
            max_pool_size: 4,
        }
    }
}

/// Typed value column of a stored point.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Float(f64),
    Integer(i64),
    Text(String),
    Boolean(bool),
}

impl StoredValue {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Integer(_) => "integer",
            Self::Text(_) => "string",
            Self::Boolean(_) => "boolean",
        }
    }
}

/// One point as the warehouse stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub series: String,
    pub tags: BTreeMap<String, String>,
    pub epoch_s: i64,
    pub value: StoredValue,
}

impl PointRecord {
    pub fn new(series: impl Into<String>, value: StoredValue, epoch_s: i64) -> Self {
        Self {
            series: series.into(),
            tags: BTreeMap::new(),
            epoch_s,
            value,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The `device` tag, stored in its own column for filtering.
    pub fn device(&self) -> Option<&str> {
        self.tags.get("device").map(String::as_str)
    }
}

/// Outcome of [`Warehouse::ingest_points`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    pub batch_id: String,
    pub points: usize,
    pub latency_ms: u64,
}

/// `DuckDB`-backed point store.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: ConnectionPool,
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply pending migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    pub fn home(&self) -> &Path {
        self.config.home.as_path()
    }

    /// Store a whole batch in one transaction.
    ///
    /// Any invalid record rolls back the batch; nothing is partially written.
    /// An empty batch is a no-op and writes no ingest log row. The logged
    /// latency covers the point inserts of this call.
    pub fn ingest_points(
        &self,
        source: &str,
        rows: &[PointRecord],
    ) -> Result<IngestReceipt, WarehouseError> {
        let batch_id = uuid::Uuid::new_v4().to_string();
        if rows.is_empty() {
            return Ok(IngestReceipt {
                batch_id,
                points: 0,
                latency_ms: 0,
            });
        }

        let connection = self.pool.acquire()?;
        let started = Instant::now();
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<u64, WarehouseError> {
            for row in rows {
                insert_point(&connection, source, &batch_id, row)?;
            }

            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let point_count = i64::try_from(rows.len()).unwrap_or(i64::MAX);
            let logged_latency = i64::try_from(latency_ms).unwrap_or(i64::MAX);
            let params: [&dyn ToSql; 4] = [&batch_id, &source, &point_count, &logged_latency];
            connection.execute(
                "INSERT INTO ingest_log \
                 (batch_id, source, point_count, status, latency_ms, timestamp) \
                 VALUES (?, ?, ?, 'ok', ?, CURRENT_TIMESTAMP)",
                params.as_slice(),
            )?;
            Ok(latency_ms)
        })();

        let latency_ms = finalize_transaction(&connection, result)?;
        Ok(IngestReceipt {
            batch_id,
            points: rows.len(),
            latency_ms,
        })
    }
}

fn insert_point(
    connection: &Connection,
    source: &str,
    batch_id: &str,
    row: &PointRecord,
) -> Result<(), WarehouseError> {
    if row.series.trim().is_empty() {
        return Err(WarehouseError::InvalidRecord(String::from(
            "series must not be empty",
        )));
    }
    if let StoredValue::Float(value) = row.value {
        if !value.is_finite() {
            return Err(WarehouseError::InvalidRecord(format!(
                "series '{}' has non-finite value {value}",
                row.series
            )));
        }
    }

    let tags = serde_json::to_string(&row.tags)
        .map_err(|error| WarehouseError::InvalidRecord(error.to_string()))?;
    let device = row.device();
    let (double, bigint, text, boolean) = match &row.value {
        StoredValue::Float(value) => (Some(*value), None, None, None),
        StoredValue::Integer(value) => (None, Some(*value), None, None),
        StoredValue::Text(value) => (None, None, Some(value.as_str()), None),
        StoredValue::Boolean(value) => (None, None, None, Some(*value)),
    };
    let kind = row.value.kind();

    let params: [&dyn ToSql; 11] = [
        &row.series,
        &device,
        &tags,
        &row.epoch_s,
        &kind,
        &double,
        &bigint,
        &text,
        &boolean,
        &source,
        &batch_id,
    ];
    connection.execute(
        "INSERT INTO metric_points \
         (series, device, tags, epoch_s, value_kind, value_double, value_bigint, value_text, \
          value_bool, source, batch_id, ingested_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
        params.as_slice(),
    )?;
    Ok(())
}

/// Commit on success, roll back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// `TEGPOLL_HOME`, else `$HOME/.tegpoll`, else `./.tegpoll`.
pub fn resolve_tegpoll_home() -> PathBuf {
    if let Some(path) = env::var_os("TEGPOLL_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tegpoll");
    }

    PathBuf::from(".tegpoll")
}
