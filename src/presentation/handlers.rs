// HTTP request handlers
use crate::application::diagnostics_service::DiagnosticsService;
use crate::application::telemetry_service::Sourced;
use crate::domain::generator::GeneratorProfile;
use crate::domain::snapshot::{Reading, TelemetrySnapshot};
use crate::domain::telemetry::{DtcEvent, FieldStats, MilStatus, QueryError, TimeSeriesPoint};
use crate::infrastructure::chunked_json::ndjson_stream;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_HOURS: u32 = 24;
const DEFAULT_WINDOW: &str = "10m";
const DEFAULT_MAX_POINTS: usize = 150;
const MAX_STREAM_SECS: f64 = 3600.0;
const MIN_STREAM_INTERVAL_SECS: f64 = 0.1;

#[derive(Deserialize)]
pub struct RangeQuery {
    pub hours: Option<u32>,
}

#[derive(Deserialize)]
pub struct SeriesQuery {
    pub hours: Option<u32>,
    pub window: Option<String>,
    pub max_points: Option<usize>,
}

#[derive(Deserialize)]
pub struct StreamQuery {
    /// Seconds
    pub duration: Option<f64>,
    /// Seconds
    pub interval: Option<f64>,
}

#[derive(Deserialize)]
pub struct QuestionBody {
    pub question: String,
    pub hours: Option<u32>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Answer {
    pub answer: String,
}

/// Error rendered as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: anyhow::Error,
}

impl ApiError {
    fn new(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        let status = if error.downcast_ref::<QueryError>().is_some() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.error);
        }
        (self.status, Json(json!({ "error": format!("{:#}", self.error) }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// A freshly generated snapshot
pub async fn get_sample(State(state): State<Arc<AppState>>) -> Json<TelemetrySnapshot> {
    Json(state.telemetry_service.sample())
}

/// The active generator profile
pub async fn get_profile(State(state): State<Arc<AppState>>) -> Json<GeneratorProfile> {
    Json(state.telemetry_service.profile().clone())
}

/// Latest stored reading, generated when storage cannot supply one
pub async fn get_obd_data(State(state): State<Arc<AppState>>) -> Json<Sourced<Reading>> {
    Json(state.telemetry_service.current_reading().await)
}

/// Recent readings for charts
pub async fn get_chart_data(State(state): State<Arc<AppState>>) -> Json<Sourced<Vec<Reading>>> {
    Json(state.telemetry_service.chart_data().await)
}

/// Check engine light status
pub async fn get_mil_status(State(state): State<Arc<AppState>>) -> Json<Sourced<MilStatus>> {
    Json(state.telemetry_service.mil_status().await)
}

pub async fn get_dtc_events(
    Query(query): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<DtcEvent>> {
    let hours = query.hours.unwrap_or(DEFAULT_HOURS);
    Ok(Json(state.telemetry_service.dtc_events(hours).await?))
}

pub async fn get_field_stats(
    Path(field): Path<String>,
    Query(query): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Option<FieldStats>> {
    let hours = query.hours.unwrap_or(DEFAULT_HOURS);
    Ok(Json(state.telemetry_service.field_stats(&field, hours).await?))
}

pub async fn get_series(
    Path(field): Path<String>,
    Query(query): Query<SeriesQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<TimeSeriesPoint>> {
    let hours = query.hours.unwrap_or(DEFAULT_HOURS);
    let window = query.window.as_deref().unwrap_or(DEFAULT_WINDOW);
    let max_points = query.max_points.unwrap_or(DEFAULT_MAX_POINTS);

    Ok(Json(
        state
            .telemetry_service
            .series(&field, hours, window, max_points)
            .await?,
    ))
}

/// Stream generated snapshots as NDJSON, one per interval
pub async fn stream_samples(
    Query(query): Query<StreamQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let duration = query.duration.unwrap_or(10.0);
    let interval = query.interval.unwrap_or(1.0);

    if !duration.is_finite() || !interval.is_finite() || duration < 0.0 || interval <= 0.0 {
        let error = anyhow::anyhow!("duration and interval must be positive numbers of seconds");
        return ApiError::new(StatusCode::BAD_REQUEST, error).into_response();
    }

    let duration = Duration::from_secs_f64(duration.min(MAX_STREAM_SECS));
    let interval = Duration::from_secs_f64(interval.clamp(MIN_STREAM_INTERVAL_SECS, MAX_STREAM_SECS));
    let stream = state.telemetry_service.sample_stream(duration, interval);

    match ndjson_stream(stream) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

fn diagnostics(state: &AppState) -> Result<&DiagnosticsService, ApiError> {
    state.diagnostics_service.as_ref().ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            anyhow::anyhow!("diagnostics need both storage and an LLM to be configured"),
        )
    })
}

pub async fn llm_query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QuestionBody>,
) -> ApiResult<Answer> {
    let hours = body.hours.unwrap_or(1);
    let answer = diagnostics(&state)?.query(&body.question, hours).await?;
    Ok(Json(Answer { answer }))
}

pub async fn llm_diagnose(
    Query(query): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Answer> {
    let hours = query.hours.unwrap_or(DEFAULT_HOURS);
    let answer = diagnostics(&state)?.diagnose(hours).await?;
    Ok(Json(Answer { answer }))
}

pub async fn llm_trend(
    Path(field): Path<String>,
    Query(query): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Answer> {
    let hours = query.hours.unwrap_or(DEFAULT_HOURS);
    let answer = diagnostics(&state)?.analyze_trend(&field, hours).await?;
    Ok(Json(Answer { answer }))
}

pub async fn llm_maintenance(State(state): State<Arc<AppState>>) -> ApiResult<Answer> {
    let answer = diagnostics(&state)?.maintenance_advice().await?;
    Ok(Json(Answer { answer }))
}
