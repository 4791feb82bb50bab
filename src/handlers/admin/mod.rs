mod credentials;
mod licenses;

pub use credentials::*;
pub use licenses::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::middleware::require_admin_token;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/admin/companies/{company_id}/license",
            get(get_company_license),
        )
        .route(
            "/admin/companies/{company_id}/license/suspend",
            post(suspend_company_license),
        )
        .route(
            "/admin/companies/{company_id}/license/resume",
            post(resume_company_license),
        )
        .route("/admin/credentials", post(create_credential))
        .route("/admin/credentials/{id}", get(get_credential))
        .layer(middleware::from_fn_with_state(state, require_admin_token))
}
