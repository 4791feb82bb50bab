mod from_row;
pub mod queries;
mod schema;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::audit::AuditSink;
use crate::error::Result;
use crate::lifecycle::{EffectDispatcher, LicenseScheduler, SchedulerSettings};
use crate::notify::NotificationSink;
use crate::rate_limit::{LoginGuard, RateLimiter};

pub use schema::{init_audit_db, init_db};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open a pooled SQLite database at `path`.
pub fn create_pool(path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))
    });
    let pool = Pool::builder().max_size(8).build(manager)?;
    Ok(pool)
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationSink>,
    pub rate_limiter: RateLimiter,
    /// Shared secret for the scan trigger (None = trigger rejects everything)
    pub scheduler_secret: Option<String>,
    /// Bearer token for admin routes (None = admin routes reject everything)
    pub admin_api_token: Option<String>,
    pub scheduler_settings: SchedulerSettings,
}

impl AppState {
    pub fn dispatcher(&self) -> EffectDispatcher {
        EffectDispatcher::new(
            self.audit.clone(),
            self.notifier.clone(),
            self.scheduler_settings.license_timeout,
        )
    }

    pub fn scheduler(&self) -> LicenseScheduler {
        LicenseScheduler::new(
            self.db.clone(),
            self.dispatcher(),
            self.scheduler_settings.clone(),
        )
    }

    pub fn login_guard(&self) -> LoginGuard {
        LoginGuard::new(self.rate_limiter.clone(), self.audit.clone())
    }
}
