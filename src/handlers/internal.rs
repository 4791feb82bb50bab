use axum::{Router, extract::State, middleware, routing::post};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::lifecycle::ScanReport;
use crate::middleware::require_scheduler_secret;

/// POST /internal/license-scan
/// Run the daily license scan. Invoked by an external cron with the shared secret.
pub async fn run_license_scan(State(state): State<AppState>) -> Result<Json<ScanReport>> {
    let report = state.scheduler().run(chrono::Utc::now()).await?;
    Ok(Json(report))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/internal/license-scan", post(run_license_scan))
        .layer(middleware::from_fn_with_state(
            state,
            require_scheduler_secret,
        ))
}
