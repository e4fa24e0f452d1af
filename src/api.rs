//! HTTP surface.
//!
//! Thin axum handlers over [`QueryService`]. Every failure leaves as an
//! [`ErrorResponse`] JSON body with a status derived from its error code.

use crate::error::{ErrorCode, ErrorResponse, QueryError};
use crate::llm::ChatMessage;
use crate::request::{QueryRequest, YoyRequest};
use crate::resolver::{GeoLevel, Resolution};
use crate::service::QueryService;
use crate::validation::validate_text_value;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(service: Arc<QueryService>) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/metrics/yoy", post(yoy))
        .route("/list_files", get(list_files))
        .route("/get_schema/{file_id}", get(get_schema))
        .route("/resolve", post(resolve))
        .route("/chat", post(chat))
        .route("/health", get(health))
        .layer(middleware::from_fn(request_span))
        .with_state(service)
}

/// [`QueryError`] as an HTTP response.
pub struct ApiError(pub QueryError);

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(QueryError::validation_with_hint(
            rejection.body_text(),
            "Send a JSON object matching the documented request shape",
        ))
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
        ErrorCode::ExecutionError | ErrorCode::ConfigError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body: ErrorResponse = self.0.to_response();
        let retry_after = body.retry_after;
        let mut response = (status_for(body.error), Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&(secs.ceil() as u64).max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

async fn request_span(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path()
    );

    async move {
        let start_time = Instant::now();
        let mut response = next.run(request).await;
        info!(
            status = response.status().as_u16(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Request complete"
        );
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

async fn query(
    State(service): State<Arc<QueryService>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = payload?;
    Ok(Json(service.query(&request).await?))
}

async fn yoy(
    State(service): State<Arc<QueryService>>,
    payload: Result<Json<YoyRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = payload?;
    Ok(Json(service.yoy(&request).await?))
}

async fn list_files(State(service): State<Arc<QueryService>>) -> Json<Value> {
    Json(Value::Array(
        service
            .list_files()
            .into_iter()
            .filter_map(|summary| serde_json::to_value(summary).ok())
            .collect(),
    ))
}

async fn get_schema(State(service): State<Arc<QueryService>>, Path(file_id): Path<String>) -> ApiResult<Value> {
    let schema = service.get_schema(&file_id)?;
    Ok(Json(serde_json::to_value(schema).map_err(QueryError::from)?))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    name: String,
    #[serde(default)]
    level: Option<GeoLevel>,
}

async fn resolve(
    State(service): State<Arc<QueryService>>,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> ApiResult<Resolution> {
    let Json(request) = payload?;
    if request.name.trim().is_empty() {
        return Err(QueryError::validation("name must not be empty").into());
    }
    validate_text_value(&request.name)?;
    Ok(Json(service.resolve(&request.name, request.level).await))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
}

/// One model turn; tool calls the model asks for run against this service.
async fn chat(
    State(service): State<Arc<QueryService>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = payload?;
    if request.messages.is_empty() {
        return Err(QueryError::validation("messages must not be empty").into());
    }
    Ok(Json(service.chat_turn(&request.messages).await?))
}

async fn health(State(service): State<Arc<QueryService>>) -> Json<Value> {
    Json(service.health())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorCode::ValidationError), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorCode::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorCode::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorCode::ExecutionError), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unavailable_sets_retry_after_header() {
        let response = ApiError(QueryError::Unavailable {
            detail: "open".into(),
            retry_after_secs: 2.4,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }
}
