// src/api/topics.rs
// Topic document endpoints; every call passes the access policy first

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::error::{ApiError, ApiResult};
use super::functions::total_count_headers;
use crate::state::AppState;
use crate::topics::{Filter, ListQuery};
use crate::types::SortDirection;

const DEFAULT_END: i64 = 10;

/// `_start`/`_end`/`_sort`/`_order` paging; remaining non-empty params become filters
#[derive(Debug, Clone, PartialEq)]
pub struct GridParams {
    pub limit: i64,
    pub offset: i64,
    pub sort: Option<String>,
    pub direction: SortDirection,
    pub filter: Filter,
}

impl GridParams {
    pub fn from_query(mut params: HashMap<String, String>) -> Self {
        let offset = params
            .remove("_start")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            .max(0);
        let end = params
            .remove("_end")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_END);
        let direction = params
            .remove("_order")
            .map(|v| SortDirection::parse_lenient(&v))
            .unwrap_or(SortDirection::Asc);
        let sort = params.remove("_sort").filter(|s| !s.is_empty());

        let filter = params
            .into_iter()
            .filter(|(k, v)| !k.starts_with('_') && !v.is_empty())
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        Self {
            limit: (end - offset).max(0),
            offset,
            sort,
            direction,
            filter,
        }
    }
}

fn filter_from_body(body: &[u8]) -> ApiResult<Filter> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Filter::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::bad_request("filter must be a JSON object")),
        Err(e) => Err(ApiError::bad_request(format!("invalid JSON: {}", e))),
    }
}

/// POST /em/{topic}
pub async fn insert_document(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    state.access.check_headers(&topic, &headers).await?;
    let document = state.topics.insert(&topic, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(document)))
}

/// POST /em/find/{topic}
pub async fn find_documents(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    state.access.check_headers(&topic, &headers).await?;
    let filter = filter_from_body(&body)?;
    let grid = GridParams::from_query(params);

    let documents = state
        .topics
        .find(&topic, &filter, Some(grid.limit), grid.offset)
        .await?;
    Ok(Json(documents))
}

/// GET /em/list/{topic}
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.access.check_headers(&topic, &headers).await?;
    let grid = GridParams::from_query(params);
    debug!(topic = %topic, limit = grid.limit, offset = grid.offset, sort = ?grid.sort, "List documents");

    let query = ListQuery {
        limit: Some(grid.limit),
        offset: grid.offset,
        sort: grid.sort,
        direction: grid.direction,
        filter: grid.filter,
    };
    let page = state.topics.list(&topic, &query).await?;

    Ok((total_count_headers(page.total), Json(page.documents)))
}

/// PATCH /em/{topic}/{id}
pub async fn update_document(
    State(state): State<Arc<AppState>>,
    Path((topic, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    state.access.check_headers(&topic, &headers).await?;
    let updated = state.topics.update(&topic, &id, patch).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "updated": updated }))))
}

/// DELETE /em/{topic}/{id}
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path((topic, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.access.check_headers(&topic, &headers).await?;
    let deleted = state.topics.delete(&topic, &id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "deleted": deleted }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_grid_defaults() {
        let grid = GridParams::from_query(HashMap::new());
        assert_eq!(grid.limit, 10);
        assert_eq!(grid.offset, 0);
        assert_eq!(grid.direction, SortDirection::Asc);
        assert!(grid.sort.is_none());
        assert!(grid.filter.is_empty());
    }

    #[test]
    fn test_grid_window_and_filters() {
        let grid = GridParams::from_query(params(&[
            ("_start", "5"),
            ("_end", "15"),
            ("_sort", "score"),
            ("_order", "DESC"),
            ("userId", "u1"),
            ("empty", ""),
        ]));
        assert_eq!(grid.offset, 5);
        assert_eq!(grid.limit, 10);
        assert_eq!(grid.sort.as_deref(), Some("score"));
        assert_eq!(grid.direction, SortDirection::Desc);
        assert_eq!(grid.filter.len(), 1);
        assert_eq!(grid.filter["userId"], "u1");
    }

    #[test]
    fn test_inverted_window_is_empty() {
        let grid = GridParams::from_query(params(&[("_start", "20"), ("_end", "10")]));
        assert_eq!(grid.limit, 0);
    }

    #[test]
    fn test_filter_body() {
        assert!(filter_from_body(b"").unwrap().is_empty());
        assert_eq!(filter_from_body(br#"{"a":1}"#).unwrap()["a"], 1);
        assert!(filter_from_body(b"[1]").is_err());
        assert!(filter_from_body(b"{").is_err());
    }
}
