use axum::{
    extract::{Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::rate_limit::RateLimitKey;
use crate::util::{client_ip, extract_bearer_token, secret_matches};

/// Verify a bearer secret against `expected`.
///
/// Failed attempts count against the caller's IP in the shared limiter, so a
/// secret cannot be brute-forced faster than a password.
fn authenticate_secret(
    state: &AppState,
    headers: &HeaderMap,
    extensions: &Extensions,
    expected: Option<&str>,
    route: &'static str,
) -> Result<()> {
    let Some(expected) = expected else {
        tracing::warn!(route, "Secret not configured, rejecting request");
        return Err(AppError::Unauthorized);
    };

    let ip = client_ip(headers, extensions);
    let key = RateLimitKey::ip(&ip);

    let verdict = state.rate_limiter.check(&key)?;
    if !verdict.allowed {
        return Err(AppError::RateLimited {
            message: verdict.message.unwrap_or_default(),
            retry_after: verdict.retry_after.unwrap_or(0),
        });
    }

    match extract_bearer_token(headers) {
        Some(presented) if secret_matches(presented, expected) => Ok(()),
        _ => {
            tracing::warn!(route, ip = %ip, "Rejected request with missing or wrong secret");
            state.rate_limiter.record_failure(&key)?;
            Err(AppError::Unauthorized)
        }
    }
}

/// Guard for the externally triggered license scan.
pub async fn require_scheduler_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    authenticate_secret(
        &state,
        request.headers(),
        request.extensions(),
        state.scheduler_secret.as_deref(),
        "scheduler",
    )?;
    Ok(next.run(request).await)
}

/// Guard for admin routes.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    authenticate_secret(
        &state,
        request.headers(),
        request.extensions(),
        state.admin_api_token.as_deref(),
        "admin",
    )?;
    Ok(next.run(request).await)
}
