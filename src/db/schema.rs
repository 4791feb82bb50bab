use rusqlite::Connection;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS companies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            contact_email TEXT,
            license_status TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS courses (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            validity_kind TEXT,
            validity_years INTEGER,
            grace_days INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS credentials (
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL,
            course_id TEXT NOT NULL REFERENCES courses(id),
            completed_at INTEGER NOT NULL,
            valid_from INTEGER NOT NULL,
            valid_to INTEGER,
            grace_days INTEGER NOT NULL DEFAULT 0,
            validity_basis TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_credentials_person ON credentials(person_id);

        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL REFERENCES companies(id),
            status TEXT NOT NULL,
            start_date INTEGER NOT NULL,
            end_date INTEGER,
            grace_period_days INTEGER NOT NULL DEFAULT 0,
            suspended_at INTEGER,
            suspended_by TEXT,
            suspended_reason TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_company ON licenses(company_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_licenses_status ON licenses(status, end_date);

        CREATE TABLE IF NOT EXISTS license_activities (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            reason TEXT,
            metadata TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_license_activities_license
            ON license_activities(license_id, created_at);

        CREATE TABLE IF NOT EXISTS notification_keys (
            key TEXT PRIMARY KEY,
            license_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notification_keys_created
            ON notification_keys(created_at);

        CREATE TABLE IF NOT EXISTS rate_limits (
            key TEXT PRIMARY KEY,
            count INTEGER NOT NULL,
            window_reset_at INTEGER NOT NULL,
            blocked_until INTEGER,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rate_limits_expires ON rate_limits(expires_at);
        "#,
    )?;
    Ok(())
}

pub fn init_audit_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            action TEXT NOT NULL,
            entity TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            actor TEXT NOT NULL,
            reason TEXT,
            metadata TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_entity ON audit_logs(entity, entity_id);
        "#,
    )?;
    Ok(())
}
