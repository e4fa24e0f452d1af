//! Query Service
//!
//! The one object a request handler talks to. It owns the catalog, the
//! pushdown executor (and through it the breaker), the result cache, the
//! coverage index and the resolver. Constructed once at startup and shared
//! behind an `Arc`; tests build isolated instances per case.

use crate::cache::{cache_key, ResultCache};
use crate::circuit_breaker::{BreakerStatus, CircuitBreaker};
use crate::config::{AppConfig, QueryLimits};
use crate::error::{QueryError, Result};
use crate::execution::{ColumnarEngine, PushdownExecutor, Row};
use crate::filter::ColumnFilter;
use crate::llm::{ChatGateway, ChatMessage, ChatReply, ToolCall};
use crate::metadata::{Catalog, DatasetDescriptor, DatasetSchema, DatasetSummary};
use crate::request::{QueryRequest, YoyRequest};
use crate::resolver::{CoverageIndex, CoverageProvider, EntityResolver, GeoLevel, Resolution};
use crate::sql::build_yoy;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct QueryService {
    catalog: Catalog,
    executor: PushdownExecutor,
    cache: ResultCache<Value>,
    coverage: CoverageProvider,
    resolver: EntityResolver,
    limits: QueryLimits,
    chat: Option<ChatGateway>,
}

impl QueryService {
    pub fn new(config: &AppConfig, catalog: Catalog, engine: Arc<dyn ColumnarEngine>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.breaker));
        Self {
            catalog,
            executor: PushdownExecutor::new(engine, breaker),
            cache: ResultCache::new(config.cache),
            coverage: CoverageProvider::new(),
            resolver: EntityResolver::default(),
            limits: config.limits,
            chat: None,
        }
    }

    /// Use a fixed coverage index instead of building one from the engine.
    pub fn with_coverage(mut self, index: CoverageIndex) -> Self {
        self.coverage = CoverageProvider::prebuilt(index);
        self
    }

    pub fn with_resolver(mut self, resolver: EntityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_chat(mut self, gateway: ChatGateway) -> Self {
        self.chat = Some(gateway);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &ResultCache<Value> {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.executor.breaker()
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.executor.breaker().status()
    }

    pub fn list_files(&self) -> Vec<DatasetSummary> {
        self.catalog.list()
    }

    pub fn get_schema(&self, file_id: &str) -> Result<DatasetSchema> {
        Ok(self.catalog.get(file_id)?.schema())
    }

    /// `POST /query`: `{rows, row_count, meta}`.
    pub async fn query(&self, request: &QueryRequest) -> Result<Value> {
        let descriptor = self.catalog.get(&request.file_id)?;
        let mut parsed = request.parse(&self.limits)?;

        let key = cache_key("query", &serde_json::to_value(request)?);
        if let Some(hit) = self.cache.get(&key) {
            debug!(file_id = %request.file_id, "Cache hit");
            return Ok(hit);
        }
        debug!(file_id = %request.file_id, "Cache miss");

        let resolutions = self.resolve_geo_filters(&mut parsed.filters).await;
        let rows = self.executor.execute(descriptor, &parsed).await?;
        let row_count = rows.len();

        let response = json!({
            "row_count": row_count,
            "rows": rows_to_json(rows),
            "meta": response_meta(descriptor, resolutions)?,
        });
        self.cache.set(key, response.clone());
        Ok(response)
    }

    /// `POST /metrics/yoy`: `{rows, row_count, base_year, compare_year, meta}`.
    pub async fn yoy(&self, request: &YoyRequest) -> Result<Value> {
        let descriptor = self.catalog.get(&request.file_id)?;
        let mut parsed = request.parse(&self.limits)?;

        let key = cache_key("yoy", &serde_json::to_value(request)?);
        if let Some(hit) = self.cache.get(&key) {
            debug!(file_id = %request.file_id, "Cache hit");
            return Ok(hit);
        }
        debug!(file_id = %request.file_id, "Cache miss");

        let resolutions = self.resolve_geo_filters(&mut parsed.filters).await;
        let statement = build_yoy(&descriptor.storage.table, &parsed)?;
        let rows = self.executor.run(descriptor, &statement).await?.into_records();
        let row_count = rows.len();

        let response = json!({
            "row_count": row_count,
            "rows": rows_to_json(rows),
            "base_year": parsed.base_year,
            "compare_year": parsed.compare_year,
            "meta": response_meta(descriptor, resolutions)?,
        });
        self.cache.set(key, response.clone());
        Ok(response)
    }

    pub async fn resolve(&self, name: &str, level: Option<GeoLevel>) -> Resolution {
        let coverage = self.coverage.get(&self.catalog, &self.executor).await;
        self.resolver.resolve(coverage, name, level)
    }

    /// Run a decoded model tool call.
    pub async fn dispatch_tool_call(&self, call: ToolCall) -> Result<Value> {
        info!(tool = tool_name(&call), "Dispatching tool call");
        match call {
            ToolCall::QueryDataset(request) => self.query(&request).await,
            ToolCall::YoyMetric(request) => self.yoy(&request).await,
            ToolCall::ListFiles => Ok(serde_json::to_value(self.list_files())?),
            ToolCall::GetSchema { file_id } => Ok(serde_json::to_value(self.get_schema(&file_id)?)?),
            ToolCall::ResolveEntity { name, level } => Ok(serde_json::to_value(self.resolve(&name, level).await)?),
        }
    }

    /// One model turn: a text reply, or every requested tool call run in
    /// order with its result or structured error.
    pub async fn chat_turn(&self, messages: &[ChatMessage]) -> Result<Value> {
        let gateway = self
            .chat
            .as_ref()
            .ok_or_else(|| QueryError::Config("Chat gateway is not configured".to_string()))?;

        match gateway.complete(messages).await? {
            ChatReply::Text(text) => Ok(json!({ "reply": text })),
            ChatReply::ToolCalls(calls) => {
                let mut results = Vec::with_capacity(calls.len());
                for raw in calls {
                    let outcome = match ToolCall::decode(&raw.name, &raw.arguments) {
                        Ok(call) => self.dispatch_tool_call(call).await,
                        Err(e) => Err(e),
                    };
                    let body = match outcome {
                        Ok(result) => json!({ "id": raw.id, "name": raw.name, "result": result }),
                        Err(e) => {
                            warn!(tool = %raw.name, "Tool call failed: {}", e);
                            json!({ "id": raw.id, "name": raw.name, "error": e.to_response() })
                        }
                    };
                    results.push(body);
                }
                Ok(json!({ "tool_results": results }))
            }
        }
    }

    pub fn health(&self) -> Value {
        json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") })
    }

    /// Substitute alias/exact matches into string filters on geographic
    /// columns. Fuzzy-only outcomes leave the value and are returned so the
    /// caller can surface their suggestions.
    async fn resolve_geo_filters(&self, filters: &mut [ColumnFilter]) -> Vec<Resolution> {
        let has_geo_text = filters
            .iter()
            .any(|f| GeoLevel::from_column(f.column.as_str()).is_some() && !f.text_values().is_empty());
        if !has_geo_text {
            return Vec::new();
        }

        let coverage = self.coverage.get(&self.catalog, &self.executor).await;
        let mut unresolved = Vec::new();
        for filter in filters.iter_mut() {
            let Some(level) = GeoLevel::from_column(filter.column.as_str()) else {
                continue;
            };
            filter.map_text_values(|value| {
                let resolution = self.resolver.resolve(coverage, value, Some(level));
                if resolution.is_confident() {
                    if resolution.canonical != value {
                        debug!(input = value, canonical = %resolution.canonical, %level, "Resolved place name");
                    }
                    resolution.canonical
                } else {
                    if !resolution.suggestions.is_empty() {
                        unresolved.push(resolution);
                    }
                    value.to_string()
                }
            });
        }
        unresolved
    }
}

fn tool_name(call: &ToolCall) -> &'static str {
    match call {
        ToolCall::QueryDataset(_) => "query_dataset",
        ToolCall::YoyMetric(_) => "yoy_metric",
        ToolCall::ListFiles => "list_files",
        ToolCall::GetSchema { .. } => "get_schema",
        ToolCall::ResolveEntity { .. } => "resolve_entity",
    }
}

fn rows_to_json(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

fn response_meta(descriptor: &DatasetDescriptor, resolutions: Vec<Resolution>) -> Result<Value> {
    let mut meta = descriptor.meta();
    meta.resolution = resolutions.iter().map(to_value).collect::<Result<Vec<_>>>()?;
    to_value(&meta)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| QueryError::Execution(format!("Failed to encode response: {}", e)))
}
