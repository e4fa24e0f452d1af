//! Pushdown Executor
//!
//! Builds one native statement per request and runs it on the columnar
//! engine behind the circuit breaker. Engine failures come back translated.

use crate::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::error::{QueryError, Result};
use crate::error_classifier::ErrorClassifier;
use crate::execution::{ColumnarEngine, Row, RowSet};
use crate::metadata::DatasetDescriptor;
use crate::request::ParsedQuery;
use crate::sql::{build_select, Statement};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct PushdownExecutor {
    engine: Arc<dyn ColumnarEngine>,
    breaker: Arc<CircuitBreaker>,
    classifier: ErrorClassifier,
}

impl PushdownExecutor {
    pub fn new(engine: Arc<dyn ColumnarEngine>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            engine,
            breaker,
            classifier: ErrorClassifier::new(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn ColumnarEngine> {
        &self.engine
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Assemble the SELECT for `query` and return rows keyed by the
    /// executed cursor's column names.
    pub async fn execute(&self, descriptor: &DatasetDescriptor, query: &ParsedQuery) -> Result<Vec<Row>> {
        let statement = build_select(&descriptor.storage.table, query)?;
        Ok(self.run(descriptor, &statement).await?.into_records())
    }

    /// Run an already verified statement against `descriptor`'s table.
    pub async fn run(&self, descriptor: &DatasetDescriptor, statement: &Statement) -> Result<RowSet> {
        let start_time = Instant::now();
        let result = self
            .breaker
            .call(|| self.engine.query(&descriptor.storage, statement))
            .await;

        match result {
            Ok(rows) => {
                info!(
                    file_id = %descriptor.file_id,
                    engine = self.engine.name(),
                    rows = rows.len(),
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    "Pushdown query complete"
                );
                Ok(rows)
            }
            Err(BreakerError::Open { retry_after }) => {
                warn!(file_id = %descriptor.file_id, retry_after = ?retry_after, "Circuit open, query rejected");
                Err(QueryError::Unavailable {
                    detail: "Data engine temporarily unavailable (circuit breaker open)".to_string(),
                    retry_after_secs: retry_after.as_secs_f64().max(0.1),
                })
            }
            Err(BreakerError::Inner(e)) => {
                let class = self.classifier.classify(&e);
                warn!(file_id = %descriptor.file_id, class = %class, "Engine error: {}", e);
                Err(self.classifier.translate(&e))
            }
        }
    }
}
