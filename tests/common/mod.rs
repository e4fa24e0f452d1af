//! Shared fixtures: an in-memory DuckDB seeded with two small tables, the
//! matching catalog, and stub engines for counting and failing calls.

#![allow(dead_code)]

use async_trait::async_trait;
use duckdb::Connection;
use emissions_query::config::{AppConfig, PoolSettings};
use emissions_query::execution::{ColumnarEngine, ConnectionPool, DuckDbEngine, EngineError, RowSet};
use emissions_query::metadata::{Catalog, DatasetDescriptor, StorageLocator};
use emissions_query::sql::Statement;
use emissions_query::QueryService;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SEED: &str = "
    CREATE TABLE country_year (country_name VARCHAR, admin1_name VARCHAR, year INTEGER, emissions_tonnes INTEGER);
    INSERT INTO country_year VALUES
        ('Germany', 'Bavaria', 2019, 100),
        ('Germany', 'Saxony', 2019, 40),
        ('Germany', 'Bavaria', 2020, 80),
        ('France', 'Brittany', 2019, 50),
        ('France', 'Brittany', 2020, 60),
        ('United States', 'California', 2019, 500),
        ('United States', 'Texas', 2019, 700),
        ('United States', 'California', 2020, 450);
    CREATE TABLE entity_year (entity VARCHAR, year INTEGER, value INTEGER);
    INSERT INTO entity_year VALUES ('A', 2019, 100), ('A', 2020, 80), ('B', 2019, 50), ('B', 2020, 60);
";

fn descriptor(file_id: &str, table: &str, columns: &[(&str, &str)]) -> DatasetDescriptor {
    serde_json::from_value(json!({
        "file_id": file_id,
        "description": format!("{} fixture", table),
        "storage": {"engine": "duckdb", "path": "mem", "table": table},
        "columns": columns
            .iter()
            .map(|(name, ty)| json!({"name": name, "type": ty}))
            .collect::<Vec<_>>(),
        "semantics": {
            "units": "tonnes CO2e",
            "source": "fixture",
            "spatial_resolution": "country",
            "temporal_resolution": "annual",
            "coverage": {"start": 2019, "end": 2020}
        }
    }))
    .unwrap()
}

pub fn catalog() -> Catalog {
    Catalog::from_descriptors(vec![
        descriptor(
            "power-country-year",
            "country_year",
            &[
                ("country_name", "VARCHAR"),
                ("admin1_name", "VARCHAR"),
                ("year", "INTEGER"),
                ("emissions_tonnes", "INTEGER"),
            ],
        ),
        descriptor(
            "demo-entity-year",
            "entity_year",
            &[("entity", "VARCHAR"), ("year", "INTEGER"), ("value", "INTEGER")],
        ),
    ])
    .unwrap()
}

pub fn duckdb_engine() -> Arc<DuckDbEngine> {
    let root = Connection::open_in_memory().unwrap();
    root.execute_batch(SEED).unwrap();
    let pool = ConnectionPool::from_connection(root, 2, Duration::from_secs(1)).unwrap();
    Arc::new(DuckDbEngine::new(PoolSettings::default()).with_pool("mem", pool))
}

pub fn duckdb_service_with(engine: Arc<dyn ColumnarEngine>) -> QueryService {
    QueryService::new(&AppConfig::default(), catalog(), engine)
}

pub fn duckdb_service() -> QueryService {
    QueryService::new(&AppConfig::default(), catalog(), duckdb_engine())
}

/// Answers every statement with a fixed row set and counts calls.
pub struct CountingEngine {
    pub calls: AtomicUsize,
    pub statements: std::sync::Mutex<Vec<Statement>>,
    rows: RowSet,
}

impl CountingEngine {
    pub fn new(rows: RowSet) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            statements: std::sync::Mutex::new(Vec::new()),
            rows,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ColumnarEngine for CountingEngine {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn query(&self, _storage: &StorageLocator, statement: &Statement) -> Result<RowSet, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.statements.lock().unwrap().push(statement.clone());
        Ok(self.rows.clone())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Fails every call with the given error and counts attempts.
pub struct FailingEngine {
    pub calls: AtomicUsize,
    error: EngineError,
}

impl FailingEngine {
    pub fn new(error: EngineError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            error,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ColumnarEngine for FailingEngine {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn query(&self, _storage: &StorageLocator, _statement: &Statement) -> Result<RowSet, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    async fn health_check(&self) -> bool {
        false
    }
}

/// Fails its first `failures` calls with a connection error, then delegates.
pub struct FlakyEngine {
    pub calls: AtomicUsize,
    failures: usize,
    inner: Arc<dyn ColumnarEngine>,
}

impl FlakyEngine {
    pub fn new(failures: usize, inner: Arc<dyn ColumnarEngine>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
            inner,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ColumnarEngine for FlakyEngine {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn query(&self, storage: &StorageLocator, statement: &Statement) -> Result<RowSet, EngineError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(EngineError::Connection("connection reset".into()));
        }
        self.inner.query(storage, statement).await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}

/// Sleeps before every call, then delegates.
pub struct SlowEngine {
    delay: Duration,
    inner: Arc<dyn ColumnarEngine>,
}

impl SlowEngine {
    pub fn new(delay: Duration, inner: Arc<dyn ColumnarEngine>) -> Self {
        Self { delay, inner }
    }
}

#[async_trait]
impl ColumnarEngine for SlowEngine {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn query(&self, storage: &StorageLocator, statement: &Statement) -> Result<RowSet, EngineError> {
        tokio::time::sleep(self.delay).await;
        self.inner.query(storage, statement).await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}
