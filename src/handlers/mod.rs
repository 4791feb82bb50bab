pub mod admin;
pub mod auth;
pub mod internal;

use axum::{Router, routing::get};
use serde_json::{Value, json};

use crate::db::AppState;
use crate::extractors::Json;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Every route the service exposes, with auth layers applied per group.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(internal::router(state.clone()))
        .merge(admin::router(state))
        .merge(auth::router())
}
