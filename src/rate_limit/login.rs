use std::sync::Arc;

use serde::Serialize;

use crate::audit::AuditSink;
use crate::error::{AppError, Result};
use crate::models::{AuditEntry, SYSTEM_ACTOR};
use crate::util::now;

use super::{FailureResult, RateLimitKey, RateLimiter, retry_message};

/// The only failure text a login caller may show. It must not hint at whether
/// the email belongs to an account.
pub const LOGIN_FAILED_MESSAGE: &str = "Invalid email or password";

#[derive(Debug, Clone, Serialize)]
pub struct LoginAllowance {
    /// The tighter of the IP and email allowances
    pub remaining_attempts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginFailure {
    pub message: String,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<i64>,
}

/// Login-side contract over the limiter: call `precheck` before verifying the
/// password, then exactly one of `record_failure` / `record_success`.
#[derive(Clone)]
pub struct LoginGuard {
    limiter: RateLimiter,
    audit: Arc<dyn AuditSink>,
}

impl LoginGuard {
    pub fn new(limiter: RateLimiter, audit: Arc<dyn AuditSink>) -> Self {
        Self { limiter, audit }
    }

    pub fn precheck(&self, ip: &str, email: &str) -> Result<LoginAllowance> {
        self.precheck_at(ip, email, now())
    }

    /// Both the IP and the email subject must be allowed.
    pub fn precheck_at(&self, ip: &str, email: &str, now: i64) -> Result<LoginAllowance> {
        let by_ip = self.limiter.check_at(&RateLimitKey::ip(ip), now)?;
        let by_email = self.limiter.check_at(&RateLimitKey::email(email), now)?;

        if !by_ip.allowed || !by_email.allowed {
            let retry_after = by_ip
                .retry_after
                .unwrap_or(0)
                .max(by_email.retry_after.unwrap_or(0));
            return Err(AppError::RateLimited {
                message: retry_message(retry_after),
                retry_after,
            });
        }

        Ok(LoginAllowance {
            remaining_attempts: by_ip
                .remaining_attempts
                .unwrap_or(0)
                .min(by_email.remaining_attempts.unwrap_or(0)),
        })
    }

    pub fn record_failure(&self, ip: &str, email: &str) -> Result<LoginFailure> {
        self.record_failure_at(ip, email, now())
    }

    /// Count a failed password check. Must be called whether or not the email exists.
    pub fn record_failure_at(&self, ip: &str, email: &str, now: i64) -> Result<LoginFailure> {
        let ip_key = RateLimitKey::ip(ip);
        let email_key = RateLimitKey::email(email);

        let by_ip = self.limiter.record_failure_at(&ip_key, now)?;
        let by_email = self.limiter.record_failure_at(&email_key, now)?;

        self.audit_auto_block(&ip_key, &by_ip, now);
        self.audit_auto_block(&email_key, &by_email, now);

        let retry_after = match (by_ip.retry_after, by_email.retry_after) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        Ok(LoginFailure {
            message: retry_after
                .map(retry_message)
                .unwrap_or_else(|| LOGIN_FAILED_MESSAGE.to_string()),
            blocked: retry_after.is_some(),
            retry_after,
        })
    }

    /// A successful login forgives every prior failure for both subjects.
    pub fn record_success(&self, ip: &str, email: &str) -> Result<()> {
        self.limiter.reset(&RateLimitKey::ip(ip))?;
        self.limiter.reset(&RateLimitKey::email(email))?;
        Ok(())
    }

    fn audit_auto_block(&self, key: &RateLimitKey, result: &FailureResult, now: i64) {
        if !result.auto_blocked {
            return;
        }
        let entry = AuditEntry::new(
            "login_auto_blocked",
            "rate_limit",
            &key.storage_key(),
            SYSTEM_ACTOR,
            now,
        )
        .reason(Some("failed login threshold reached"))
        .metadata(serde_json::json!({
            "kind": key.kind,
            "retry_after": result.retry_after,
        }));

        if let Err(e) = self.audit.record(&entry) {
            tracing::warn!(error = %e, "Failed to audit login auto-block");
        }
    }
}
