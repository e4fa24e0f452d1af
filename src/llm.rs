//! Chat-completion gateway and tool-call decoding.
//!
//! The gateway speaks the OpenAI-compatible `/chat/completions` protocol.
//! Concurrent upstream calls are capped by a counting semaphore and every
//! call carries a deadline. Tool calls returned by the model decode into the
//! same typed requests the HTTP surface accepts.

use crate::config::ChatSettings;
use crate::error::{QueryError, Result};
use crate::request::{QueryRequest, YoyRequest};
use crate::resolver::GeoLevel;
use crate::retry::{retry_async, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

pub const TOOL_NAMES: [&str; 5] = ["query_dataset", "yoy_metric", "list_files", "get_schema", "resolve_entity"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A tool invocation as returned by the model, arguments still encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatReply {
    Text(String),
    ToolCalls(Vec<RawToolCall>),
}

#[derive(Debug, Deserialize)]
struct GetSchemaArgs {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct ResolveArgs {
    name: String,
    #[serde(default)]
    level: Option<GeoLevel>,
}

/// Typed form of a model tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    QueryDataset(QueryRequest),
    YoyMetric(YoyRequest),
    ListFiles,
    GetSchema { file_id: String },
    ResolveEntity { name: String, level: Option<GeoLevel> },
}

impl ToolCall {
    pub fn decode(name: &str, arguments: &str) -> Result<Self> {
        let args: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| QueryError::validation(format!("Tool '{}' arguments are not JSON: {}", name, e)))?
        };
        let invalid = |e: serde_json::Error| QueryError::validation(format!("Invalid arguments for '{}': {}", name, e));

        match name {
            "query_dataset" => Ok(ToolCall::QueryDataset(serde_json::from_value(args).map_err(invalid)?)),
            "yoy_metric" => Ok(ToolCall::YoyMetric(serde_json::from_value(args).map_err(invalid)?)),
            "list_files" => Ok(ToolCall::ListFiles),
            "get_schema" => {
                let args: GetSchemaArgs = serde_json::from_value(args).map_err(invalid)?;
                Ok(ToolCall::GetSchema { file_id: args.file_id })
            }
            "resolve_entity" => {
                let args: ResolveArgs = serde_json::from_value(args).map_err(invalid)?;
                Ok(ToolCall::ResolveEntity {
                    name: args.name,
                    level: args.level,
                })
            }
            other => Err(QueryError::validation_with_hint(
                format!("Unknown tool '{}'", other),
                format!("Available tools: {}", TOOL_NAMES.join(", ")),
            )),
        }
    }
}

/// JSON-schema tool definitions advertised to the model.
pub fn tool_definitions() -> Vec<Value> {
    let filter_object = json!({
        "type": "object",
        "description": "column -> value, list (IN), null (IS NULL) or {eq|in|between|gte|lte|gt|lt|contains: operand}"
    });
    vec![
        function(
            "query_dataset",
            "Select, filter, group and aggregate rows of one dataset",
            json!({
                "type": "object",
                "properties": {
                    "file_id": {"type": "string"},
                    "select": {"type": "array", "items": {"type": "string"}},
                    "where": filter_object,
                    "group_by": {"type": "array", "items": {"type": "string"}},
                    "aggregations": {"type": "object", "description": "column -> sum|avg|count|distinct|min|max|std|variance"},
                    "having": filter_object,
                    "order_by": {"type": "string"},
                    "limit": {"type": "integer"},
                    "offset": {"type": "integer"}
                },
                "required": ["file_id"]
            }),
        ),
        function(
            "yoy_metric",
            "Rank entities by the change in a value between two years",
            json!({
                "type": "object",
                "properties": {
                    "file_id": {"type": "string"},
                    "where": filter_object,
                    "key_col": {"type": "string"},
                    "value_col": {"type": "string"},
                    "base_year": {"type": "integer"},
                    "compare_year": {"type": "integer"},
                    "top_n": {"type": "integer"},
                    "direction": {"type": "string", "enum": ["drop", "rise"]}
                },
                "required": ["file_id", "key_col", "value_col", "base_year", "compare_year"]
            }),
        ),
        function("list_files", "List available datasets", json!({"type": "object", "properties": {}})),
        function(
            "get_schema",
            "Columns and semantics of one dataset",
            json!({"type": "object", "properties": {"file_id": {"type": "string"}}, "required": ["file_id"]}),
        ),
        function(
            "resolve_entity",
            "Normalize a place name and detect its level",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "level": {"type": "string", "enum": ["country", "admin1", "city"]}
                },
                "required": ["name"]
            }),
        ),
    ]
}

fn function(name: &str, description: &str, parameters: Value) -> Value {
    json!({"type": "function", "function": {"name": name, "description": description, "parameters": parameters}})
}

pub struct ChatGateway {
    client: reqwest::Client,
    settings: ChatSettings,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl ChatGateway {
    pub fn new(settings: ChatSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| QueryError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
            settings,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Free upstream slots.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// One completion with the tool set attached, retried on transient failure.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatReply> {
        retry_async("chat_completion", self.retry, || self.complete_once(messages)).await
    }

    async fn complete_once(&self, messages: &[ChatMessage]) -> Result<ChatReply> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| QueryError::Config("No chat API key configured".to_string()))?;

        let deadline = self.settings.timeout;
        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| QueryError::Unavailable {
                    detail: "Chat gateway closed".to_string(),
                    retry_after_secs: 1.0,
                })?;

            let body = json!({
                "model": self.settings.model,
                "messages": messages,
                "tools": tool_definitions(),
                "temperature": 0.1
            });
            debug!(model = %self.settings.model, messages = messages.len(), "Chat completion request");

            let response = self
                .client
                .post(format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/')))
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await
                .map_err(map_transport_error)?;

            let status = response.status();
            if !status.is_success() {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok());
                let text = response.text().await.unwrap_or_default();
                return Err(map_status(status, retry_after, &text));
            }

            let payload: Value = response
                .json()
                .await
                .map_err(|e| QueryError::Upstream(format!("Failed to parse chat response: {}", e)))?;
            parse_reply(&payload)
        };

        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout(format!(
                "Chat completion exceeded {:?}",
                deadline
            ))),
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> QueryError {
    if e.is_timeout() {
        QueryError::Timeout(format!("Chat completion timed out: {}", e))
    } else if e.is_connect() {
        QueryError::Unavailable {
            detail: format!("Chat API unreachable: {}", e),
            retry_after_secs: 1.0,
        }
    } else {
        QueryError::Upstream(format!("Chat API call failed: {}", e))
    }
}

fn map_status(status: reqwest::StatusCode, retry_after: Option<f64>, body: &str) -> QueryError {
    let detail = format!("Chat API returned {}: {}", status, body.chars().take(200).collect::<String>());
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        QueryError::Unavailable {
            detail,
            retry_after_secs: retry_after.unwrap_or(1.0),
        }
    } else {
        QueryError::Upstream(detail)
    }
}

fn parse_reply(payload: &Value) -> Result<ChatReply> {
    let message = &payload["choices"][0]["message"];
    if let Some(calls) = message["tool_calls"].as_array().filter(|c| !c.is_empty()) {
        let calls = calls
            .iter()
            .map(|c| {
                let name = c["function"]["name"]
                    .as_str()
                    .ok_or_else(|| QueryError::Upstream("Tool call without a function name".to_string()))?;
                Ok(RawToolCall {
                    id: c["id"].as_str().unwrap_or_default().to_string(),
                    name: name.to_string(),
                    arguments: c["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!(tools = calls.len(), "Model requested tool calls");
        return Ok(ChatReply::ToolCalls(calls));
    }

    message["content"]
        .as_str()
        .map(|s| ChatReply::Text(s.to_string()))
        .ok_or_else(|| QueryError::Upstream("No content in chat response".to_string()))
}
