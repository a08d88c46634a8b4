// src/api/mod.rs
// HTTP and WebSocket surface over the runner and topic store

pub mod access;
pub mod error;
pub mod functions;
pub mod push;
pub mod topics;
pub mod ws;

use axum::{
    Json, Router,
    routing::{get, patch, post},
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use error::{ApiError, ApiResult};

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Functions
        .route("/api/functions/{id}/run", get(functions::run_function))
        .route("/api/functions/{id}/runs", get(functions::list_runs))
        .route("/api/functions/{id}/runs/{run_id}", get(functions::get_run))
        // Topics
        .route("/em/{topic}", post(topics::insert_document))
        .route("/em/find/{topic}", post(topics::find_documents))
        .route("/em/list/{topic}", get(topics::list_documents))
        .route(
            "/em/{topic}/{id}",
            patch(topics::update_document).delete(topics::delete_document),
        )
        // Live subscriptions
        .route("/em/subscribe/{topic}/{key}", get(ws::subscribe_topic))
        .route("/api/push/subscribe/{device_id}", get(ws::subscribe_device))
        .route("/api/push/{device_id}", post(push::push_to_device))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
