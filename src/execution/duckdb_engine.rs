//! DuckDB Execution Engine
//!
//! DuckDB is the columnar store behind every dataset. Each database file gets
//! its own bounded read-only pool, opened on first use. Statements run on the
//! blocking thread pool under an explicit deadline.

use crate::config::PoolSettings;
use crate::execution::pool::ConnectionPool;
use crate::execution::{ColumnarEngine, EngineError, RowSet};
use crate::filter::Literal;
use crate::metadata::StorageLocator;
use crate::sql::Statement;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, ToSqlOutput, Value, ValueRef};
use duckdb::ToSql;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

impl ToSql for Literal {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Literal::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Literal::Integer(i) => ToSqlOutput::Owned(Value::BigInt(*i)),
            Literal::Float(x) => ToSqlOutput::Owned(Value::Double(*x)),
            Literal::Bool(b) => ToSqlOutput::Owned(Value::Boolean(*b)),
        })
    }
}

/// DuckDB-backed columnar engine
pub struct DuckDbEngine {
    settings: PoolSettings,
    pools: Mutex<HashMap<PathBuf, ConnectionPool>>,
}

impl DuckDbEngine {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Serve `path` from an already built pool, e.g. an in-memory database.
    pub fn with_pool(self, path: impl Into<PathBuf>, pool: ConnectionPool) -> Self {
        if let Ok(mut pools) = self.pools.lock() {
            pools.insert(path.into(), pool);
        }
        self
    }

    async fn pool_for(&self, path: &Path) -> Result<ConnectionPool, EngineError> {
        if let Some(pool) = self.cached_pool(path)? {
            return Ok(pool);
        }

        let owned = path.to_path_buf();
        let size = self.settings.size;
        let acquire_timeout = self.settings.acquire_timeout;
        let opened = tokio::task::spawn_blocking(move || {
            ConnectionPool::open_read_only(&owned, size, acquire_timeout)
        })
        .await
        .map_err(|e| EngineError::Connection(format!("pool open task failed: {}", e)))??;

        let mut pools = self
            .pools
            .lock()
            .map_err(|_| EngineError::Connection("pool registry lock poisoned".to_string()))?;
        // A concurrent caller may have opened the same file first.
        Ok(pools.entry(path.to_path_buf()).or_insert(opened).clone())
    }

    fn cached_pool(&self, path: &Path) -> Result<Option<ConnectionPool>, EngineError> {
        let pools = self
            .pools
            .lock()
            .map_err(|_| EngineError::Connection("pool registry lock poisoned".to_string()))?;
        Ok(pools.get(path).cloned())
    }
}

#[async_trait]
impl ColumnarEngine for DuckDbEngine {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    async fn query(&self, storage: &StorageLocator, statement: &Statement) -> Result<RowSet, EngineError> {
        let start_time = Instant::now();
        let pool = self.pool_for(&storage.path).await?;
        let connection = pool.acquire().await?;

        let sql = statement.sql.clone();
        let params = statement.params.clone();
        let task = tokio::task::spawn_blocking(move || run_statement(&connection, &sql, &params));

        let deadline = self.settings.query_timeout;
        let result = match tokio::time::timeout(deadline, task).await {
            Ok(joined) => joined.map_err(|e| EngineError::Engine(format!("query task failed: {}", e)))?,
            Err(_) => {
                warn!(table = %storage.table, timeout = ?deadline, "Query exceeded deadline");
                return Err(EngineError::Timeout(deadline));
            }
        };

        let rows = result?;
        debug!(
            table = %storage.table,
            rows = rows.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "DuckDB query complete"
        );
        Ok(rows)
    }

    async fn health_check(&self) -> bool {
        let check = tokio::task::spawn_blocking(|| {
            duckdb::Connection::open_in_memory().and_then(|c| c.execute_batch("SELECT 1"))
        })
        .await;
        match check {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("DuckDB health check failed: {}", e);
                false
            }
            Err(e) => {
                warn!("DuckDB health check task failed: {}", e);
                false
            }
        }
    }
}

/// Execute on a pooled connection and read the cursor's own column names.
fn run_statement(connection: &duckdb::Connection, sql: &str, params: &[Literal]) -> Result<RowSet, EngineError> {
    let mut stmt = connection
        .prepare(sql)
        .map_err(|e| EngineError::Engine(e.to_string()))?;
    let mut cursor = stmt
        .query(duckdb::params_from_iter(params.iter()))
        .map_err(|e| EngineError::Engine(e.to_string()))?;

    let mut rows = Vec::new();
    while let Some(row) = cursor.next().map_err(|e| EngineError::Engine(e.to_string()))? {
        let mut values = Vec::new();
        for i in 0.. {
            match row.get_ref(i) {
                Ok(value) => values.push(value_to_json(value.to_owned())),
                Err(_) => break,
            }
        }
        rows.push(values);
    }

    // Rows borrows the statement; names are readable once it is released.
    drop(cursor);
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    Ok(RowSet { columns, rows })
}

/// Days from 0001-01-01 to the Unix epoch.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Temporal values leave as ISO-8601 strings; lists as JSON arrays.
fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::TinyInt(i) => JsonValue::Number(i.into()),
        Value::SmallInt(i) => JsonValue::Number(i.into()),
        Value::Int(i) => JsonValue::Number(i.into()),
        Value::BigInt(i) => JsonValue::Number(i.into()),
        Value::HugeInt(i) => match i64::try_from(i) {
            Ok(n) => JsonValue::Number(n.into()),
            Err(_) => float(i as f64),
        },
        Value::UTinyInt(i) => JsonValue::Number(i.into()),
        Value::USmallInt(i) => JsonValue::Number(i.into()),
        Value::UInt(i) => JsonValue::Number(i.into()),
        Value::UBigInt(i) => JsonValue::Number(i.into()),
        Value::Float(f) => float(f as f64),
        Value::Double(f) => float(f),
        Value::Decimal(d) => d.to_string().parse::<f64>().map(float).unwrap_or(JsonValue::Null),
        Value::Text(s) | Value::Enum(s) => JsonValue::String(s),
        Value::Date32(days) => days
            .checked_add(EPOCH_DAYS_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(|date| JsonValue::String(date.format("%Y-%m-%d").to_string()))
            .unwrap_or(JsonValue::Null),
        Value::Timestamp(unit, raw) => DateTime::from_timestamp_micros(to_micros(unit, raw))
            .map(|ts| JsonValue::String(ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            .unwrap_or(JsonValue::Null),
        Value::Time64(unit, raw) => {
            let micros = to_micros(unit, raw);
            u32::try_from(micros.div_euclid(1_000_000))
                .ok()
                .and_then(|secs| {
                    NaiveTime::from_num_seconds_from_midnight_opt(secs, (micros.rem_euclid(1_000_000) * 1_000) as u32)
                })
                .map(|time| JsonValue::String(time.format("%H:%M:%S%.f").to_string()))
                .unwrap_or(JsonValue::Null)
        }
        Value::Interval { months, days, nanos } => serde_json::json!({
            "months": months,
            "days": days,
            "nanos": nanos,
        }),
        Value::List(items) | Value::Array(items) => JsonValue::Array(items.into_iter().map(value_to_json).collect()),
        other => JsonValue::String(format!("{:?}", other)),
    }
}

fn to_micros(unit: TimeUnit, raw: i64) -> i64 {
    match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    }
}

fn float(f: f64) -> JsonValue {
    serde_json::Number::from_f64(f)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Open a pool for every distinct database file up front so a bad path
/// fails at startup rather than on the first request.
pub async fn warm_pools<'a>(engine: &DuckDbEngine, storages: impl IntoIterator<Item = &'a StorageLocator>) {
    for storage in storages {
        match engine.pool_for(&storage.path).await {
            Ok(pool) => info!(path = %storage.path.display(), size = pool.size(), "Pool ready"),
            Err(e) => warn!(path = %storage.path.display(), "Could not open pool: {}", e),
        }
    }
}
