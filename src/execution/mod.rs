//! Execution Engine Abstraction
//!
//! The columnar store is reached through [`ColumnarEngine`]. Engines receive
//! an already verified [`Statement`] and hand back rows keyed by the column
//! names the engine itself reported for the executed cursor.

pub mod duckdb_engine;
pub mod pool;
pub mod pushdown;

use crate::metadata::StorageLocator;
use crate::sql::Statement;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub use duckdb_engine::DuckDbEngine;
pub use pool::{ConnectionPool, PooledConnection};
pub use pushdown::PushdownExecutor;

/// One result row, in cursor column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Raw engine failure, before translation into a [`crate::error::QueryError`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("query exceeded {0:?}")]
    Timeout(Duration),

    #[error("no pooled connection became available within {0:?}")]
    PoolExhausted(Duration),

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("{0}")]
    Engine(String),
}

/// Column names plus positional rows, as returned by the cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Zip every row with the cursor's column names.
    pub fn into_records(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| columns.iter().cloned().zip(values).collect())
            .collect()
    }
}

/// Execution engine trait
#[async_trait]
pub trait ColumnarEngine: Send + Sync {
    /// Engine name
    fn name(&self) -> &'static str;

    /// Run one read-only statement against the table behind `storage`.
    async fn query(&self, storage: &StorageLocator, statement: &Statement) -> Result<RowSet, EngineError>;

    /// Check if engine is available
    async fn health_check(&self) -> bool;
}
