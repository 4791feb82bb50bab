//! Append-only audit trail for state transitions and security events.

use crate::db::{DbPool, queries};
use crate::error::Result;
use crate::models::AuditEntry;

/// Write-only audit destination. Nothing in the lifecycle engine reads it back.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry) -> Result<()>;
}

/// Audit sink backed by the dedicated audit database.
pub struct SqliteAuditSink {
    pool: DbPool,
    enabled: bool,
}

impl SqliteAuditSink {
    pub fn new(pool: DbPool, enabled: bool) -> Self {
        Self { pool, enabled }
    }

    /// Apply the retention window (0 = keep forever).
    pub fn purge_older_than(&self, retention_days: i64, now: i64) -> Result<usize> {
        let conn = self.pool.get()?;
        let purged = queries::purge_old_audit_logs(&conn, retention_days, now)?;
        if purged > 0 {
            tracing::info!(purged, retention_days, "Purged old audit logs");
        }
        Ok(purged)
    }
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        // Skip database insert if audit logging is disabled
        if !self.enabled {
            tracing::debug!(action = %entry.action, entity_id = %entry.entity_id, "Audit logging disabled, skipping");
            return Ok(());
        }

        let conn = self.pool.get()?;
        queries::create_audit_log(&conn, entry)?;
        Ok(())
    }
}
