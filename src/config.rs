use std::env;
use std::time::Duration;

use crate::rate_limit::{RateLimitPolicy, RateLimitSettings};

/// Where rate-limit counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    /// Process-local map; per-instance limits.
    Memory,
    /// Rows in the main database, shared by every instance pointing at it.
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub audit_database_path: String,
    /// Shared secret required by the license scan trigger (None = trigger disabled)
    pub scheduler_secret: Option<String>,
    /// Bearer token for admin routes (None = admin routes disabled)
    pub admin_api_token: Option<String>,
    /// Enable/disable audit logging entirely
    pub audit_log_enabled: bool,
    /// Days to retain audit logs before purging (0 = never purge)
    pub audit_log_retention_days: i64,
    pub email: EmailConfig,
    /// Upper bound on the time spent on any single license during a scan
    pub scheduler_license_timeout: Duration,
    pub rate_limit_backend: RateLimitBackend,
    pub rate_limits: RateLimitSettings,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub enabled: bool,
    pub resend_api_key: Option<String>,
    pub from_email: String,
    /// When set, notifications are POSTed here instead of emailed
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let audit_log_enabled = env::var("AUDIT_LOG_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let audit_log_retention_days: i64 = env::var("AUDIT_LOG_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(365);

        let scheduler_license_timeout = Duration::from_secs(
            env::var("SCHEDULER_LICENSE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        );

        let rate_limit_backend = match env::var("RATE_LIMIT_BACKEND").as_deref() {
            Ok("sqlite") => RateLimitBackend::Sqlite,
            _ => RateLimitBackend::Memory,
        };

        let defaults = RateLimitPolicy::default();
        let login_policy = RateLimitPolicy {
            max_attempts: env_i64("LOGIN_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            window_secs: env_i64("LOGIN_WINDOW_SECS").unwrap_or(defaults.window_secs),
            auto_block_attempts: env_i64("LOGIN_AUTO_BLOCK_ATTEMPTS")
                .unwrap_or(defaults.auto_block_attempts),
            auto_block_secs: env_i64("LOGIN_AUTO_BLOCK_SECS").unwrap_or(defaults.auto_block_secs),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "coursegate.db".to_string()),
            audit_database_path: env::var("AUDIT_DATABASE_PATH")
                .unwrap_or_else(|_| "coursegate_audit.db".to_string()),
            scheduler_secret: non_empty_var("SCHEDULER_SECRET"),
            admin_api_token: non_empty_var("ADMIN_API_TOKEN"),
            audit_log_enabled,
            audit_log_retention_days,
            email: EmailConfig {
                enabled: env::var("EMAIL_ENABLED")
                    .map(|v| v != "false" && v != "0")
                    .unwrap_or(true),
                resend_api_key: non_empty_var("RESEND_API_KEY"),
                from_email: env::var("EMAIL_FROM")
                    .unwrap_or_else(|_| "noreply@coursegate.local".to_string()),
                webhook_url: non_empty_var("NOTIFICATION_WEBHOOK_URL"),
            },
            scheduler_license_timeout,
            rate_limit_backend,
            rate_limits: RateLimitSettings {
                ip: login_policy,
                email: login_policy,
            },
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v: &i64| *v > 0)
}
