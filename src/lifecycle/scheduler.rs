use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::TransactionBehavior;
use serde::Serialize;

use crate::db::{DbPool, queries};
use crate::error::{AppError, Result};
use crate::models::{AuditEntry, License, LicenseAction, SYSTEM_ACTOR};
use crate::notify::ExpiryWarning;
use crate::util::{SECONDS_PER_DAY, datetime_from_ts, floor_days_between};

use super::{EffectDispatcher, EffectFailure, SideEffect, TransitionRequest, apply_transition};

pub const DEFAULT_WARNING_TIERS: [i64; 3] = [30, 14, 7];

const EXPIRY_REASON: &str = "License expired and grace period elapsed";

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Days-before-expiry at which a warning goes out (exact match)
    pub warning_tiers: Vec<i64>,
    /// Upper bound on any single notification send
    pub license_timeout: Duration,
}

impl SchedulerSettings {
    /// Days a warning key must survive: once the largest tier has passed,
    /// that term's end date is behind it and no tier can match again.
    pub fn notification_key_retention_days(&self) -> i64 {
        self.warning_tiers.iter().copied().max().unwrap_or(0).max(0) + 1
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            warning_tiers: DEFAULT_WARNING_TIERS.to_vec(),
            license_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanError {
    pub license_id: String,
    pub company_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub run_at: i64,
    pub checked: usize,
    pub warnings_sent_by_tier: BTreeMap<i64, usize>,
    pub suspended: usize,
    /// Warnings skipped because the same tier already went out for this term
    pub duplicate_warnings_skipped: usize,
    pub errors: Vec<ScanError>,
}

impl ScanReport {
    fn new(run_at: i64, tiers: &[i64]) -> Self {
        Self {
            run_at,
            checked: 0,
            warnings_sent_by_tier: tiers.iter().map(|t| (*t, 0)).collect(),
            suspended: 0,
            duplicate_warnings_skipped: 0,
            errors: Vec::new(),
        }
    }

    pub fn warnings_sent(&self) -> usize {
        self.warnings_sent_by_tier.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Untouched,
    /// Another run already moved the license on
    AlreadyHandled,
    Expired,
    Warned(i64),
    DuplicateWarning,
}

/// Idempotency key for one warning tier of one license term.
///
/// Dated by the term's end date, not the run date: the tier window is a
/// rolling 24h span that straddles midnight unless the end date is at 00:00.
pub fn warning_key(license_id: &str, tier: i64, end_date: NaiveDate) -> String {
    format!("license-warning:{}:{}d:{}", license_id, tier, end_date.format("%Y-%m-%d"))
}

/// Daily license scan: expire licenses past their grace deadline and send
/// tiered expiry warnings.
///
/// Safe to run more than once a day. Expiry is guarded by the license status
/// and warnings by a per-term idempotency key, so re-runs and overlapping runs
/// never duplicate notices or activity records.
pub struct LicenseScheduler {
    db: DbPool,
    dispatcher: EffectDispatcher,
    settings: SchedulerSettings,
}

impl LicenseScheduler {
    pub fn new(db: DbPool, dispatcher: EffectDispatcher, settings: SchedulerSettings) -> Self {
        Self {
            db,
            dispatcher,
            settings,
        }
    }

    /// Process every trial/active license that has an end date.
    ///
    /// Only failing to list licenses fails the run; per-license problems are
    /// collected into `errors`.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let now_ts = now.timestamp();
        let licenses = {
            let conn = self.db.get()?;
            queries::list_expirable_licenses(&conn)?
        };

        tracing::info!(count = licenses.len(), "Starting license scan");
        let mut report = ScanReport::new(now_ts, &self.settings.warning_tiers);

        for license in &licenses {
            report.checked += 1;

            let (outcome, failures) = match self.process_license(license, now).await {
                Ok(processed) => processed,
                Err(e) => {
                    tracing::error!(license_id = %license.id, error = %e, "License scan failed for license");
                    report.errors.push(ScanError {
                        license_id: license.id.clone(),
                        company_id: license.company_id.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let notification_failed = failures.iter().any(EffectFailure::is_notification);

            match outcome {
                Outcome::Expired => report.suspended += 1,
                Outcome::Warned(tier) if !notification_failed => {
                    *report.warnings_sent_by_tier.entry(tier).or_insert(0) += 1;
                }
                Outcome::DuplicateWarning => report.duplicate_warnings_skipped += 1,
                Outcome::Warned(_) | Outcome::Untouched | Outcome::AlreadyHandled => {}
            }

            for failure in failures {
                report.errors.push(ScanError {
                    license_id: license.id.clone(),
                    company_id: license.company_id.clone(),
                    message: format!("{}: {}", failure.effect, failure.message),
                });
            }
        }

        let summary = AuditEntry::new("license_scan_completed", "license_scan", &now_ts.to_string(), SYSTEM_ACTOR, now_ts)
            .metadata(serde_json::json!({
                "checked": report.checked,
                "suspended": report.suspended,
                "warnings_sent_by_tier": report.warnings_sent_by_tier,
                "errors": report.errors.len(),
            }));
        if let Err(e) = self.dispatcher.audit().record(&summary) {
            tracing::warn!(error = %e, "Failed to audit license scan summary");
        }

        tracing::info!(
            checked = report.checked,
            suspended = report.suspended,
            warnings = report.warnings_sent(),
            errors = report.errors.len(),
            "License scan complete"
        );

        Ok(report)
    }

    async fn process_license(
        &self,
        license: &License,
        now: DateTime<Utc>,
    ) -> Result<(Outcome, Vec<EffectFailure>)> {
        let Some(end_date) = license.end_date else {
            return Ok((Outcome::Untouched, Vec::new()));
        };

        let now_ts = now.timestamp();
        let days_until_expiry = floor_days_between(now_ts, end_date);
        let grace_deadline = end_date + i64::from(license.grace_period_days) * SECONDS_PER_DAY;

        if now_ts > grace_deadline {
            let Some(effects) = self.expire(license, now_ts)? else {
                return Ok((Outcome::AlreadyHandled, Vec::new()));
            };
            let failures = self.dispatcher.dispatch(effects).await;
            return Ok((Outcome::Expired, failures));
        }

        let Some(tier) = self
            .settings
            .warning_tiers
            .iter()
            .copied()
            .find(|tier| *tier == days_until_expiry)
        else {
            return Ok((Outcome::Untouched, Vec::new()));
        };

        let Some(effects) = self.claim_warning(license, end_date, tier, now)? else {
            tracing::debug!(license_id = %license.id, tier, "Warning already sent for this term, skipping");
            return Ok((Outcome::DuplicateWarning, Vec::new()));
        };
        let failures = self.dispatcher.dispatch(effects).await;
        Ok((Outcome::Warned(tier), failures))
    }

    /// Delete warning keys too old to dedup any future run.
    pub fn purge_notification_keys(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now.timestamp() - self.settings.notification_key_retention_days() * SECONDS_PER_DAY;
        let conn = self.db.get()?;
        let purged = queries::purge_old_notification_keys(&conn, cutoff)?;
        if purged > 0 {
            tracing::info!(purged, "Purged old notification keys");
        }
        Ok(purged)
    }

    /// Commit the expiry. None when the license is no longer trial/active.
    fn expire(&self, license: &License, now: i64) -> Result<Option<Vec<SideEffect>>> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Re-read under the write lock; an overlapping run may have expired it already
        let current = queries::get_license_by_id(&tx, &license.id)?
            .ok_or_else(|| AppError::NotFound("License not found".into()))?;
        if !current.status.is_running() {
            return Ok(None);
        }

        let applied = apply_transition(&tx, &current, &TransitionRequest::expire(EXPIRY_REASON), now)?;
        tx.commit()?;
        Ok(Some(applied.effects))
    }

    /// Claim the term's key for `tier` and log the warning. None if already claimed.
    fn claim_warning(
        &self,
        license: &License,
        end_date: i64,
        tier: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<SideEffect>>> {
        let now_ts = now.timestamp();
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let company = queries::get_company_by_id(&tx, &license.company_id)?
            .ok_or_else(|| AppError::NotFound("Company not found".into()))?;
        if company.notice_recipient().is_none() {
            return Err(AppError::BadRequest(format!(
                "Company {} has no contact email",
                company.id
            )));
        }

        let key = warning_key(&license.id, tier, datetime_from_ts(end_date)?.date_naive());
        if !queries::claim_notification_key(&tx, &key, &license.id, now_ts)? {
            return Ok(None);
        }

        let metadata = serde_json::json!({
            "warning_days": tier,
            "expiry_date": end_date,
            "idempotency_key": key,
        });
        queries::create_license_activity(
            &tx,
            &license.id,
            LicenseAction::Extended,
            SYSTEM_ACTOR,
            Some("expiry warning"),
            Some(&metadata),
            now_ts,
        )?;
        tx.commit()?;

        Ok(Some(vec![
            SideEffect::Audit(
                AuditEntry::new("license_expiry_warning", "license", &license.id, SYSTEM_ACTOR, now_ts)
                    .metadata(metadata),
            ),
            SideEffect::ExpiryWarning(ExpiryWarning {
                license_id: license.id.clone(),
                company_id: company.id,
                company_name: company.name,
                email: company.email,
                contact_email: company.contact_email,
                days_until_expiry: tier,
                expiry_date: end_date,
            }),
        ]))
    }
}
