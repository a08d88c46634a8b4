// src/api/push.rs
// Direct pushes to a single subscribed device

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use super::error::ApiResult;
use crate::state::AppState;

/// POST /api/push/{device_id}
///
/// 410 when the device has no live connection.
pub async fn push_to_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let delivered = state.device_hub.send(&device_id, &payload).await?;
    info!(device_id = %device_id, delivered, "Push delivered");
    Ok(Json(json!({ "delivered": delivered })))
}
