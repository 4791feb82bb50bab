use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;
use crate::rate_limit::RateLimitRecord;
use crate::util::now;
use crate::validity::Validity;

use super::from_row::{
    COMPANY_COLS, COURSE_COLS, CREDENTIAL_COLS, LICENSE_ACTIVITY_COLS, LICENSE_COLS, query_all,
    query_one,
};

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Companies ============

pub fn create_company(conn: &Connection, input: &CreateCompany) -> Result<Company> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO companies (id, name, email, contact_email, license_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
        params![&id, &input.name, &input.email, &input.contact_email, now, now],
    )?;

    Ok(Company {
        id,
        name: input.name.clone(),
        email: input.email.clone(),
        contact_email: input.contact_email.clone(),
        license_status: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_company_by_id(conn: &Connection, id: &str) -> Result<Option<Company>> {
    query_one(
        conn,
        &format!("SELECT {} FROM companies WHERE id = ?1", COMPANY_COLS),
        &[&id],
    )
}

/// Mirror a license status onto its owning company.
pub fn set_company_license_status(
    conn: &Connection,
    company_id: &str,
    status: LicenseStatus,
    at: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE companies SET license_status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_ref(), at, company_id],
    )?;
    Ok(affected > 0)
}

// ============ Courses ============

pub fn create_course(conn: &Connection, input: &CreateCourse) -> Result<Course> {
    let id = gen_id();
    let now = now();
    let policy = input.validity.as_ref();

    conn.execute(
        "INSERT INTO courses (id, name, validity_kind, validity_years, grace_days, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.name,
            policy.map(|p| p.kind.as_ref().to_string()),
            policy.and_then(|p| p.years),
            policy.map(|p| p.grace_days).unwrap_or(0),
            now
        ],
    )?;

    Ok(Course {
        id,
        name: input.name.clone(),
        validity: input.validity,
        created_at: now,
    })
}

pub fn get_course_by_id(conn: &Connection, id: &str) -> Result<Option<Course>> {
    query_one(
        conn,
        &format!("SELECT {} FROM courses WHERE id = ?1", COURSE_COLS),
        &[&id],
    )
}

/// Replace a course's validity policy. Already-issued credentials keep their dates.
pub fn update_course_validity(
    conn: &Connection,
    id: &str,
    policy: Option<&ValidityPolicy>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE courses SET validity_kind = ?1, validity_years = ?2, grace_days = ?3 WHERE id = ?4",
        params![
            policy.map(|p| p.kind.as_ref().to_string()),
            policy.and_then(|p| p.years),
            policy.map(|p| p.grace_days).unwrap_or(0),
            id
        ],
    )?;
    Ok(affected > 0)
}

// ============ Credentials ============

pub fn create_credential(
    conn: &Connection,
    input: &IssueCredential,
    validity: &Validity,
    grace_days: u32,
) -> Result<Credential> {
    let id = gen_id();
    let now = now();
    let valid_from = validity.valid_from.timestamp();
    let valid_to = validity.valid_to.map(|t| t.timestamp());

    conn.execute(
        "INSERT INTO credentials (id, person_id, course_id, completed_at, valid_from, valid_to, grace_days, validity_basis, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &id,
            &input.person_id,
            &input.course_id,
            input.completed_at,
            valid_from,
            valid_to,
            grace_days,
            validity.basis.as_ref(),
            now
        ],
    )?;

    Ok(Credential {
        id,
        person_id: input.person_id.clone(),
        course_id: input.course_id.clone(),
        completed_at: input.completed_at,
        valid_from,
        valid_to,
        grace_days,
        validity_basis: validity.basis,
        created_at: now,
    })
}

pub fn get_credential_by_id(conn: &Connection, id: &str) -> Result<Option<Credential>> {
    query_one(
        conn,
        &format!("SELECT {} FROM credentials WHERE id = ?1", CREDENTIAL_COLS),
        &[&id],
    )
}

// ============ Licenses ============

/// Create a license and its CREATED activity, and mirror the status onto the company.
///
/// A company holds at most one trial/active license; a renewal must wait until
/// the running one has expired or been suspended.
pub fn create_license(conn: &Connection, input: &CreateLicense, actor: &str) -> Result<License> {
    if has_running_license(conn, &input.company_id)? {
        return Err(AppError::Conflict(
            "Company already has a running license".into(),
        ));
    }

    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO licenses (id, company_id, status, start_date, end_date, grace_period_days, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            &input.company_id,
            input.status.as_ref(),
            input.start_date,
            input.end_date,
            input.grace_period_days,
            now,
            now
        ],
    )?;

    set_company_license_status(conn, &input.company_id, input.status, now)?;
    create_license_activity(
        conn,
        &id,
        LicenseAction::Created,
        actor,
        None,
        Some(&serde_json::json!({ "status": input.status, "end_date": input.end_date })),
        now,
    )?;

    Ok(License {
        id,
        company_id: input.company_id.clone(),
        status: input.status,
        start_date: input.start_date,
        end_date: input.end_date,
        grace_period_days: input.grace_period_days,
        suspended_at: None,
        suspended_by: None,
        suspended_reason: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )
}

pub fn has_running_license(conn: &Connection, company_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM licenses WHERE company_id = ?1 AND status IN ('trial', 'active')",
        [company_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// The company's current license: the most recently created one.
pub fn get_current_license_for_company(
    conn: &Connection,
    company_id: &str,
) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE company_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            LICENSE_COLS
        ),
        &[&company_id],
    )
}

/// Trial and active licenses that have an end date, soonest first.
pub fn list_expirable_licenses(conn: &Connection) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE status IN ('trial', 'active') AND end_date IS NOT NULL ORDER BY end_date ASC",
            LICENSE_COLS
        ),
        &[],
    )
}

/// Persist a status change, guarded on the status the caller read.
///
/// Returns false when the row no longer has `expected_status`, meaning another
/// writer got there first.
pub fn update_license_state(
    conn: &Connection,
    license: &License,
    expected_status: LicenseStatus,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses
         SET status = ?1, end_date = ?2, suspended_at = ?3, suspended_by = ?4, suspended_reason = ?5, updated_at = ?6
         WHERE id = ?7 AND status = ?8",
        params![
            license.status.as_ref(),
            license.end_date,
            license.suspended_at,
            &license.suspended_by,
            &license.suspended_reason,
            license.updated_at,
            &license.id,
            expected_status.as_ref()
        ],
    )?;
    Ok(affected > 0)
}

// ============ License Activity ============

pub fn create_license_activity(
    conn: &Connection,
    license_id: &str,
    action: LicenseAction,
    actor: &str,
    reason: Option<&str>,
    metadata: Option<&serde_json::Value>,
    at: i64,
) -> Result<LicenseActivity> {
    let id = gen_id();
    let metadata_str = metadata.map(|m| m.to_string());

    conn.execute(
        "INSERT INTO license_activities (id, license_id, action, actor, reason, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, license_id, action.as_ref(), actor, reason, &metadata_str, at],
    )?;

    Ok(LicenseActivity {
        id,
        license_id: license_id.to_string(),
        action,
        actor: actor.to_string(),
        reason: reason.map(String::from),
        metadata: metadata.cloned(),
        created_at: at,
    })
}

pub fn list_license_activities(conn: &Connection, license_id: &str) -> Result<Vec<LicenseActivity>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM license_activities WHERE license_id = ?1 ORDER BY created_at ASC, rowid ASC",
            LICENSE_ACTIVITY_COLS
        ),
        &[&license_id],
    )
}

// ============ Notification Keys ============

/// Claim an idempotency key. Returns false if it was already claimed.
pub fn claim_notification_key(
    conn: &Connection,
    key: &str,
    license_id: &str,
    at: i64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO notification_keys (key, license_id, created_at) VALUES (?1, ?2, ?3)",
        params![key, license_id, at],
    )?;
    Ok(inserted > 0)
}

pub fn purge_old_notification_keys(conn: &Connection, before: i64) -> Result<usize> {
    let affected = conn.execute(
        "DELETE FROM notification_keys WHERE created_at < ?1",
        params![before],
    )?;
    Ok(affected)
}

// ============ Rate Limits ============

pub fn get_rate_limit(conn: &Connection, key: &str, now: i64) -> Result<Option<RateLimitRecord>> {
    let record = conn
        .query_row(
            "SELECT count, window_reset_at, blocked_until FROM rate_limits WHERE key = ?1 AND expires_at > ?2",
            params![key, now],
            |row| {
                Ok(RateLimitRecord {
                    count: row.get(0)?,
                    window_reset_at: row.get(1)?,
                    blocked_until: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

pub fn upsert_rate_limit(
    conn: &Connection,
    key: &str,
    record: &RateLimitRecord,
    expires_at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO rate_limits (key, count, window_reset_at, blocked_until, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(key) DO UPDATE SET
            count = excluded.count,
            window_reset_at = excluded.window_reset_at,
            blocked_until = excluded.blocked_until,
            expires_at = excluded.expires_at",
        params![key, record.count, record.window_reset_at, record.blocked_until, expires_at],
    )?;
    Ok(())
}

pub fn delete_rate_limit(conn: &Connection, key: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM rate_limits WHERE key = ?1", params![key])?;
    Ok(affected > 0)
}

pub fn purge_expired_rate_limits(conn: &Connection, now: i64) -> Result<usize> {
    let affected = conn.execute("DELETE FROM rate_limits WHERE expires_at <= ?1", params![now])?;
    Ok(affected)
}

// ============ Audit Logs ============

pub fn create_audit_log(conn: &Connection, entry: &AuditEntry) -> Result<String> {
    let id = gen_id();
    let metadata_str = entry.metadata.as_ref().map(|m| m.to_string());

    conn.execute(
        "INSERT INTO audit_logs (id, timestamp, action, entity, entity_id, actor, reason, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            entry.timestamp,
            &entry.action,
            &entry.entity,
            &entry.entity_id,
            &entry.actor,
            &entry.reason,
            &metadata_str
        ],
    )?;

    Ok(id)
}

/// Delete audit logs older than `retention_days`. Zero retention keeps everything.
pub fn purge_old_audit_logs(conn: &Connection, retention_days: i64, now: i64) -> Result<usize> {
    if retention_days <= 0 {
        return Ok(0);
    }
    let cutoff = now - retention_days * crate::util::SECONDS_PER_DAY;
    let affected = conn.execute("DELETE FROM audit_logs WHERE timestamp < ?1", params![cutoff])?;
    Ok(affected)
}
