// src/http.rs
use axum::{
    extract::{DefaultBodyLimit, Path, RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use url::form_urlencoded;

use crate::aggregation::{
    compute_availability, compute_device_aggregates, device_parts, AvailabilityResult,
    DeviceAggregate, DevicePartLoad,
};
use crate::config::ConfigError;
use crate::error::CapacityError;
use crate::ingest::SourceTable;
use crate::snapshot::{ClearOutcome, SnapshotMeta, SourceStore};

const DASHBOARD_HTML: &str = include_str!("../static/dashboard.html");

/// Spreadsheet exports easily exceed axum's 2 MB default.
const UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

// --- Error Handling ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error("Uploaded file rejected: {0}")]
    InvalidUpload(CapacityError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Capacity(e) => match e {
                CapacityError::InvalidMonthFormat(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_month", e.to_string())
                }
                CapacityError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", e.to_string()),
                CapacityError::UnknownTable(_) => {
                    (StatusCode::NOT_FOUND, "unknown_table", e.to_string())
                }
                CapacityError::SourceMissing { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "source_missing", e.to_string())
                }
                CapacityError::MissingColumns { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "missing_columns",
                    e.to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error. Check logs.".to_string(),
                ),
            },
            AppError::InvalidUpload(e) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_upload", e.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Config(_) | AppError::TlsConfig(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration",
                "Configuration error. Check logs.".to_string(),
            ),
            AppError::Io(_) | AppError::Task(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "Internal server error. Check logs.".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, detail) = self.parts();
        if status.is_server_error() {
            error!("Error occurred: {:?}", self);
        } else {
            warn!("Request rejected ({}): {}", status, self);
        }
        (status, Json(json!({ "error": code, "detail": detail }))).into_response()
    }
}

// --- Query Parsing ---

#[derive(Debug, Default, PartialEq)]
pub struct MonthQuery {
    pub months: Vec<String>,
    pub prorate: bool,
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl MonthQuery {
    /// Repeated `month` keys are kept in order; at least one is required.
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        let mut query = MonthQuery::default();
        for (key, value) in form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "month" => query.months.push(value.into_owned()),
                "prorate" => {
                    query.prorate = parse_bool(&value).ok_or_else(|| {
                        AppError::BadRequest(format!("prorate must be a boolean, got '{}'", value))
                    })?
                }
                _ => {}
            }
        }
        if query.months.is_empty() {
            return Err(AppError::BadRequest(
                "at least one 'month' query parameter (YYYY-MM) is required".to_string(),
            ));
        }
        Ok(query)
    }
}

// --- Application State ---

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SourceStore>,
}

impl AppState {
    pub fn new(store: SourceStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

/// File parsing and aggregation are CPU bound and run off the async workers.
async fn run_blocking<R, F>(f: F) -> Result<R, AppError>
where
    F: FnOnce() -> Result<R, CapacityError> + Send + 'static,
    R: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_dashboard))
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/availability/{device_id}", get(handle_availability))
        .route("/devices", get(handle_devices))
        .route("/device_parts/{device_id}", get(handle_device_parts))
        .route("/upload/clear", post(handle_upload_clear))
        .route(
            "/upload/{table}",
            put(handle_upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Web Handlers ---

async fn handle_dashboard() -> Html<&'static str> {
    info!("Handling / request...");
    Html(DASHBOARD_HTML)
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    info!("Handling /status request...");
    let store = state.store.clone();
    let tables = run_blocking(move || Ok(store.status())).await?;
    Ok(Json(json!({ "tables": tables })))
}

async fn handle_availability(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<AvailabilityResult>, AppError> {
    info!("Handling /availability/{} request...", device_id);
    let query = MonthQuery::parse(query.as_deref())?;
    let store = state.store.clone();
    let result = run_blocking(move || {
        store.with_tables(|tables| {
            compute_availability(tables, &device_id, &query.months, query.prorate)
        })
    })
    .await?;
    Ok(Json(result))
}

async fn handle_devices(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<DeviceAggregate>>, AppError> {
    info!("Handling /devices request...");
    let query = MonthQuery::parse(query.as_deref())?;
    let store = state.store.clone();
    let result = run_blocking(move || {
        store.with_tables(|tables| compute_device_aggregates(tables, &query.months))
    })
    .await?;
    Ok(Json(result))
}

async fn handle_device_parts(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<DevicePartLoad>>, AppError> {
    info!("Handling /device_parts/{} request...", device_id);
    let query = MonthQuery::parse(query.as_deref())?;
    let store = state.store.clone();
    let result = run_blocking(move || {
        store.with_tables(|tables| device_parts(tables, &device_id, &query.months))
    })
    .await?;
    Ok(Json(result))
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(table): Path<String>,
    body: Bytes,
) -> Result<Json<SnapshotMeta>, AppError> {
    info!("Handling /upload/{} request ({} bytes)...", table, body.len());
    let table: SourceTable = table.parse()?;
    if body.is_empty() {
        return Err(AppError::BadRequest("upload body is empty".to_string()));
    }
    let store = state.store.clone();
    let stored = tokio::task::spawn_blocking(move || store.store_upload(table, &body))
        .await?
        .map_err(|e| match e {
            CapacityError::MissingColumns { .. } | CapacityError::Csv(_) => {
                AppError::InvalidUpload(e)
            }
            other => AppError::Capacity(other),
        })?;
    Ok(Json(stored))
}

async fn handle_upload_clear(
    State(state): State<AppState>,
) -> Result<Json<ClearOutcome>, AppError> {
    info!("Handling /upload/clear request...");
    let store = state.store.clone();
    let outcome = run_blocking(move || Ok(store.clear_uploads())).await?;
    Ok(Json(outcome))
}
