// src/api/functions.rs
// Function triggers and run log queries

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::error::{ApiResult, IntoApiErrorOption};
use crate::state::AppState;
use crate::types::SortDirection;

pub const TOTAL_COUNT_HEADER: &str = "x-total-count";
const DEFAULT_PAGE: i64 = 20;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order: Option<String>,
}

pub fn total_count_headers(total: i64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(TOTAL_COUNT_HEADER, HeaderValue::from(total));
    headers
}

/// GET /api/functions/{id}/run
pub async fn run_function(
    State(state): State<Arc<AppState>>,
    Path(function_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let run_id = state.runner.trigger(function_id).await?;
    info!(function_id = %function_id, run_id = %run_id, "Run accepted");
    Ok(Json(json!({ "id": run_id })))
}

/// GET /api/functions/{id}/runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(function_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let direction = page
        .order
        .as_deref()
        .map(SortDirection::parse_lenient)
        .unwrap_or_default();
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).max(0);
    let offset = page.offset.unwrap_or(0).max(0);

    let logs = state
        .meta
        .list_run_logs(function_id, limit, offset, direction)
        .await?;
    let total = state.meta.count_run_logs(function_id).await?;

    Ok((total_count_headers(total), Json(logs)))
}

/// GET /api/functions/{id}/runs/{run_id}
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path((function_id, run_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    let log = state
        .meta
        .get_run_log(function_id, run_id)
        .await?
        .ok_or_not_found("run log not found")?;
    Ok(Json(log))
}
