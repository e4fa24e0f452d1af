//! Error taxonomy
//!
//! Every failure that leaves the crate carries a stable `error` code so a
//! programmatic caller can branch (retry, rephrase, abandon) without parsing
//! prose.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error codes exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Bad identifier, oversized input or disallowed operator. Never retried.
    ValidationError,
    /// Unknown file_id or a column the engine could not bind.
    NotFound,
    /// Unmatched engine failure.
    ExecutionError,
    /// Circuit breaker open or no pooled connection available.
    Unavailable,
    /// Engine or upstream call exceeded its deadline.
    Timeout,
    /// Invalid manifest or settings at startup.
    ConfigError,
    /// Non-transient chat-completion API failure.
    UpstreamError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::ExecutionError => "execution_error",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ConfigError => "config_error",
            ErrorCode::UpstreamError => "upstream_error",
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Unavailable | ErrorCode::Timeout | ErrorCode::ExecutionError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
pub enum QueryError {
    #[error("Validation error: {detail}")]
    Validation {
        detail: String,
        hint: Option<String>,
        /// Every violation found, when more than one was collected.
        violations: Vec<String>,
    },

    #[error("Not found: {detail}")]
    NotFound {
        detail: String,
        suggestions: Vec<String>,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Unavailable: {detail} (retry after {retry_after_secs:.1}s)")]
    Unavailable {
        detail: String,
        retry_after_secs: f64,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl QueryError {
    pub fn validation(detail: impl Into<String>) -> Self {
        QueryError::Validation {
            detail: detail.into(),
            hint: None,
            violations: Vec::new(),
        }
    }

    pub fn validation_with_hint(detail: impl Into<String>, hint: impl Into<String>) -> Self {
        QueryError::Validation {
            detail: detail.into(),
            hint: Some(hint.into()),
            violations: Vec::new(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        QueryError::NotFound {
            detail: detail.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            QueryError::Validation { .. } => ErrorCode::ValidationError,
            QueryError::NotFound { .. } => ErrorCode::NotFound,
            QueryError::Execution(_) => ErrorCode::ExecutionError,
            QueryError::Unavailable { .. } => ErrorCode::Unavailable,
            QueryError::Timeout(_) => ErrorCode::Timeout,
            QueryError::Config(_) => ErrorCode::ConfigError,
            QueryError::Upstream(_) => ErrorCode::UpstreamError,
        }
    }

    /// Wire representation of this error.
    pub fn to_response(&self) -> ErrorResponse {
        let mut response = ErrorResponse::new(self.code(), self.detail());
        match self {
            QueryError::Validation { hint, violations, .. } => {
                response.hint = hint.clone();
                if violations.len() > 1 {
                    response.context = Some(serde_json::json!({ "violations": violations }));
                }
            }
            QueryError::NotFound { suggestions, .. } => {
                if !suggestions.is_empty() {
                    response.suggestions = Some(suggestions.clone());
                    response.hint = Some("Use one of the suggested names".to_string());
                }
            }
            QueryError::Unavailable { retry_after_secs, .. } => {
                response.retry_after = Some(*retry_after_secs);
                response.hint = Some("The data engine is recovering; retry later".to_string());
            }
            QueryError::Timeout(_) => {
                response.hint = Some("Narrow the filters or lower the limit before retrying".to_string());
            }
            _ => {}
        }
        response
    }

    fn detail(&self) -> String {
        match self {
            QueryError::Validation { detail, .. } => detail.clone(),
            QueryError::NotFound { detail, .. } => detail.clone(),
            QueryError::Unavailable { detail, .. } => detail.clone(),
            QueryError::Execution(msg)
            | QueryError::Timeout(msg)
            | QueryError::Config(msg)
            | QueryError::Upstream(msg) => msg.clone(),
        }
    }
}

impl From<std::io::Error> for QueryError {
    fn from(err: std::io::Error) -> Self {
        QueryError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::validation(format!("Malformed JSON: {}", err))
    }
}

/// Structured error body: `{error, detail, hint?, context?, suggestions?, retry_after?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
}

impl ErrorResponse {
    pub fn new(error: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            error,
            detail: detail.into(),
            hint: None,
            context: None,
            suggestions: None,
            retry_after: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
