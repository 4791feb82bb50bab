//! Login throttling checks for the login page.
//!
//! The login page calls `check` before verifying a password, then reports the
//! outcome through `failure` or `success`.

use axum::{Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::{ClientIp, Json};
use crate::rate_limit::{LoginAllowance, LoginFailure};

#[derive(Debug, Deserialize)]
pub struct LoginAttemptBody {
    pub email: String,
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub reset: bool,
}

fn require_email(body: &LoginAttemptBody) -> Result<()> {
    if body.email.trim().is_empty() {
        return Err(AppError::BadRequest("email is required".into()));
    }
    Ok(())
}

/// POST /auth/login-attempts/check
pub async fn check_login_attempt(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginAttemptBody>,
) -> Result<Json<LoginAllowance>> {
    require_email(&body)?;
    let allowance = state.login_guard().precheck(&ip, &body.email)?;
    Ok(Json(allowance))
}

/// POST /auth/login-attempts/failure
pub async fn record_login_failure(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginAttemptBody>,
) -> Result<Json<LoginFailure>> {
    require_email(&body)?;
    let failure = state
        .login_guard()
        .record_failure(&ip, &body.email)?;
    Ok(Json(failure))
}

/// POST /auth/login-attempts/success
pub async fn record_login_success(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginAttemptBody>,
) -> Result<Json<ResetResponse>> {
    require_email(&body)?;
    state
        .login_guard()
        .record_success(&ip, &body.email)?;
    Ok(Json(ResetResponse { reset: true }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login-attempts/check", post(check_login_attempt))
        .route("/auth/login-attempts/failure", post(record_login_failure))
        .route("/auth/login-attempts/success", post(record_login_success))
}
