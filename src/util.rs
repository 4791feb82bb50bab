//! Shared utility functions.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

pub const SECONDS_PER_DAY: i64 = 86_400;

pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Convert a stored Unix timestamp (seconds) into a `DateTime<Utc>`.
pub fn datetime_from_ts(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .ok_or_else(|| AppError::Internal(format!("Timestamp out of range: {}", ts)))
}

/// Whole days from `from` to `to`, rounded toward negative infinity.
pub fn floor_days_between(from: i64, to: i64) -> i64 {
    (to - from).div_euclid(SECONDS_PER_DAY)
}

/// Extract the client IP from proxy headers.
///
/// Tries `x-forwarded-for` first (first hop only), then `x-real-ip`.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Client IP used as a rate limit key: proxy headers first, then the socket
/// peer recorded by `into_make_service_with_connect_info`.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    extract_client_ip(headers)
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Constant-time comparison of a presented secret against the configured one.
pub fn secret_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Format a Unix timestamp as a human-readable date (e.g., "Jan 15, 2024").
pub fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%b %d, %Y").to_string())
        .unwrap_or_else(|| "Unknown date".to_string())
}
