pub mod audit;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod rate_limit;
pub mod util;
pub mod validity;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::db::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    handlers::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
