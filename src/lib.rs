pub mod api;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod error_classifier;
pub mod execution;
pub mod filter;
pub mod llm;
pub mod metadata;
pub mod request;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod sql;
pub mod telemetry;
pub mod validation;

pub use config::AppConfig;
pub use error::{ErrorCode, ErrorResponse, QueryError, Result};
pub use service::QueryService;
