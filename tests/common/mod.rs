//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub use coursegate::audit::SqliteAuditSink;
pub use coursegate::db::{AppState, DbPool, init_audit_db, init_db, queries};
pub use coursegate::error::AppError;
use coursegate::error::Result;
pub use coursegate::lifecycle::SchedulerSettings;
pub use coursegate::models::*;
pub use coursegate::notify::{ExpiryWarning, NotificationOutcome, NotificationSink, SuspensionNotice};
pub use coursegate::rate_limit::{RateLimitSettings, RateLimiter};

pub const SCHEDULER_SECRET: &str = "test-scheduler-secret";
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// 2026-01-01T12:00:00Z
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

pub fn days(n: i64) -> chrono::Duration {
    chrono::Duration::days(n)
}

/// Single-connection in-memory pool; every checkout sees the same database.
pub fn test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    init_db(&pool.get().unwrap()).unwrap();
    pool
}

pub fn test_audit_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    init_audit_db(&pool.get().unwrap()).unwrap();
    pool
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierMode {
    Deliver,
    Fail,
    Stall(Duration),
}

/// Notification sink that records what it was asked to send.
pub struct RecordingNotifier {
    mode: NotifierMode,
    pub warnings: Mutex<Vec<ExpiryWarning>>,
    pub suspensions: Mutex<Vec<SuspensionNotice>>,
}

impl RecordingNotifier {
    pub fn new(mode: NotifierMode) -> Self {
        Self {
            mode,
            warnings: Mutex::new(Vec::new()),
            suspensions: Mutex::new(Vec::new()),
        }
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.lock().unwrap().len()
    }

    pub fn suspension_count(&self) -> usize {
        self.suspensions.lock().unwrap().len()
    }

    async fn outcome(&self) -> Result<NotificationOutcome> {
        match self.mode {
            NotifierMode::Deliver => Ok(NotificationOutcome::Sent),
            NotifierMode::Fail => Err(AppError::Internal("provider unavailable".into())),
            NotifierMode::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Ok(NotificationOutcome::Sent)
            }
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send_license_expiry_warning(
        &self,
        warning: &ExpiryWarning,
    ) -> Result<NotificationOutcome> {
        let outcome = self.outcome().await?;
        self.warnings.lock().unwrap().push(warning.clone());
        Ok(outcome)
    }

    async fn send_license_suspended(
        &self,
        notice: &SuspensionNotice,
    ) -> Result<NotificationOutcome> {
        let outcome = self.outcome().await?;
        self.suspensions.lock().unwrap().push(notice.clone());
        Ok(outcome)
    }
}

pub struct TestContext {
    pub state: AppState,
    pub audit_db: DbPool,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_mode(NotifierMode::Deliver)
    }

    pub fn with_mode(mode: NotifierMode) -> Self {
        Self::with_settings(mode, SchedulerSettings::default())
    }

    pub fn with_settings(mode: NotifierMode, settings: SchedulerSettings) -> Self {
        let db = test_pool();
        let audit_db = test_audit_pool();
        let notifier = Arc::new(RecordingNotifier::new(mode));

        let state = AppState {
            db,
            audit: Arc::new(SqliteAuditSink::new(audit_db.clone(), true)),
            notifier: notifier.clone(),
            rate_limiter: RateLimiter::in_memory(RateLimitSettings::default()),
            scheduler_secret: Some(SCHEDULER_SECRET.to_string()),
            admin_api_token: Some(ADMIN_TOKEN.to_string()),
            scheduler_settings: settings,
        };

        Self {
            state,
            audit_db,
            notifier,
        }
    }

    pub fn audit_count(&self, action: &str) -> i64 {
        let conn = self.audit_db.get().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM audit_logs WHERE action = ?1",
            [action],
            |row| row.get(0),
        )
        .unwrap()
    }

    pub fn license(&self, id: &str) -> License {
        let conn = self.state.db.get().unwrap();
        queries::get_license_by_id(&conn, id).unwrap().unwrap()
    }

    pub fn company(&self, id: &str) -> Company {
        let conn = self.state.db.get().unwrap();
        queries::get_company_by_id(&conn, id).unwrap().unwrap()
    }

    pub fn activities(&self, license_id: &str) -> Vec<LicenseActivity> {
        let conn = self.state.db.get().unwrap();
        queries::list_license_activities(&conn, license_id).unwrap()
    }

    pub fn activity_count(&self, license_id: &str, action: LicenseAction) -> usize {
        self.activities(license_id)
            .iter()
            .filter(|a| a.action == action)
            .count()
    }
}

pub fn create_test_company(conn: &Connection, name: &str, email: Option<&str>) -> Company {
    queries::create_company(
        conn,
        &CreateCompany {
            name: name.to_string(),
            email: email.map(String::from),
            contact_email: None,
        },
    )
    .unwrap()
}

pub fn create_test_license(
    conn: &Connection,
    company_id: &str,
    status: LicenseStatus,
    end_date: Option<DateTime<Utc>>,
    grace_period_days: u32,
) -> License {
    queries::create_license(
        conn,
        &CreateLicense {
            company_id: company_id.to_string(),
            status,
            start_date: (t0() - days(365)).timestamp(),
            end_date: end_date.map(|d| d.timestamp()),
            grace_period_days,
        },
        "test",
    )
    .unwrap()
}

/// A company with a contact email and a license ending at `end_date`.
pub fn seed_license(
    ctx: &TestContext,
    name: &str,
    status: LicenseStatus,
    end_date: DateTime<Utc>,
    grace_period_days: u32,
) -> (Company, License) {
    let conn = ctx.state.db.get().unwrap();
    let email = format!("{}@example.com", name.to_lowercase().replace(' ', "-"));
    let company = create_test_company(&conn, name, Some(&email));
    let license = create_test_license(&conn, &company.id, status, Some(end_date), grace_period_days);
    (company, license)
}

pub fn create_test_course(conn: &Connection, name: &str, validity: Option<ValidityPolicy>) -> Course {
    queries::create_course(
        conn,
        &CreateCourse {
            name: name.to_string(),
            validity,
        },
    )
    .unwrap()
}
