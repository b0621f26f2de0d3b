//! Route handlers

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::crawler::CrawlStatus;
use crate::state::CrawlState;
use crate::storage::{FailureRecord, FailureSummary, Record, RecordQuery, RunRecord};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Default and maximum number of rows returned by the list routes
const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub crawl_state: CrawlState,
    pub store_available: bool,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub state: CrawlState,
}

#[derive(Debug, Serialize)]
pub struct FailuresResponse {
    pub total: u64,
    pub summary: Vec<FailureSummary>,
    pub failures: Vec<FailureRecord>,
}

/// Creates the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/records", get(get_records))
        .route("/failures", get(get_failures))
        .route("/runs", get(get_runs))
        .route("/runs/{id}", get(get_run))
        .route("/crawl/start", post(start_crawl))
        .route("/crawl/stop", post(stop_crawl))
        .with_state(state)
}

/// Liveness; always 200 while the process serves requests
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        crawl_state: state.coordinator.state(),
        store_available: state.store.ping().is_ok(),
    })
}

async fn get_status(State(state): State<AppState>) -> Result<Json<CrawlStatus>, ApiError> {
    Ok(Json(state.coordinator.status()?))
}

/// `GET /records?field=value&since=ts&until=ts&url=u&limit=n`
async fn get_records(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let query = parse_record_query(&params)?;
    Ok(Json(state.store.query(&query)?))
}

/// `GET /failures?limit=n`
async fn get_failures(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<FailuresResponse>, ApiError> {
    let limit = limit_param(&params)?;

    Ok(Json(FailuresResponse {
        total: state.store.count_failures()?,
        summary: state.store.failure_summary()?,
        failures: state.store.failures(limit)?,
    }))
}

/// `GET /runs?limit=n`, newest run first
async fn get_runs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<RunRecord>>, ApiError> {
    let limit = limit_param(&params)?;
    Ok(Json(state.store.runs(limit)?))
}

/// `GET /runs/{id}`; 404 for an unknown run
async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    let id = parse_run_id(&id)?;
    Ok(Json(state.store.get_run(id)?))
}

/// Starts a crawl; 409 with the current state while one is Running or Draining
async fn start_crawl(State(state): State<AppState>) -> Result<Json<CrawlStatus>, ApiError> {
    Ok(Json(state.coordinator.start()?))
}

async fn stop_crawl(State(state): State<AppState>) -> Json<StopResponse> {
    Json(StopResponse {
        state: state.coordinator.stop(),
    })
}

/// Builds a record query from URL query parameters
///
/// `since`, `until`, `url` and `limit` are reserved; every other key is a field filter.
/// The limit defaults to 100 and is capped at 1000.
pub fn parse_record_query(params: &HashMap<String, String>) -> Result<RecordQuery, ApiError> {
    let mut query = RecordQuery::default();

    for (key, value) in params {
        match key.as_str() {
            "since" => query.since = Some(parse_timestamp(value)?),
            "until" => query.until = Some(parse_timestamp(value)?),
            "url" => query.url = Some(value.clone()),
            "limit" => query.limit = Some(parse_limit(value)?.min(MAX_LIMIT)),
            field => {
                query.fields.insert(field.to_string(), value.clone());
            }
        }
    }

    query.limit.get_or_insert(DEFAULT_LIMIT);

    if let (Some(since), Some(until)) = (query.since, query.until) {
        if since > until {
            return Err(ApiError::BadRequest(
                "'since' must not be after 'until'".to_string(),
            ));
        }
    }

    Ok(query)
}

/// Parses an RFC 3339 timestamp or integer unix seconds
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| ApiError::BadRequest(format!("invalid timestamp '{}'", raw)))
}

/// Parses a run id path segment
pub fn parse_run_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("invalid run id '{}'", raw)))
}

fn parse_limit(raw: &str) -> Result<usize, ApiError> {
    raw.parse::<usize>()
        .map_err(|_| ApiError::BadRequest(format!("invalid limit '{}'", raw)))
}

fn limit_param(params: &HashMap<String, String>) -> Result<usize, ApiError> {
    match params.get("limit") {
        Some(raw) => Ok(parse_limit(raw)?.min(MAX_LIMIT)),
        None => Ok(DEFAULT_LIMIT),
    }
}
