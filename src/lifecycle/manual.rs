use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::LicenseStatus;
use crate::util::SECONDS_PER_DAY;

use super::{AppliedTransition, TransitionRequest, Trigger, apply_transition};

/// Suspend a company's current license.
pub fn suspend_license(
    conn: &mut Connection,
    company_id: &str,
    reason: &str,
    actor: &str,
    now: i64,
) -> Result<AppliedTransition> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::BadRequest("A suspension reason is required".into()));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let license = queries::get_current_license_for_company(&tx, company_id)?
        .ok_or_else(|| AppError::NotFound("No license found for company".into()))?;

    if license.status == LicenseStatus::Suspended {
        return Err(AppError::Conflict("License is already suspended".into()));
    }

    let applied = apply_transition(
        &tx,
        &license,
        &TransitionRequest {
            to: LicenseStatus::Suspended,
            trigger: Trigger::Admin,
            actor: actor.to_string(),
            reason: Some(reason.to_string()),
            extend_days: None,
        },
        now,
    )?;
    tx.commit()?;
    Ok(applied)
}

/// Return a company's suspended (or expired) license to active, optionally
/// pushing its end date out by `extend_days`.
///
/// An expired license must be extended far enough that it would not be
/// expired again by the next scan.
pub fn resume_license(
    conn: &mut Connection,
    company_id: &str,
    actor: &str,
    extend_days: Option<u32>,
    now: i64,
) -> Result<AppliedTransition> {
    if extend_days == Some(0) {
        return Err(AppError::BadRequest("extend_days must be positive".into()));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let license = queries::get_current_license_for_company(&tx, company_id)?
        .ok_or_else(|| AppError::NotFound("No license found for company".into()))?;

    if license.status == LicenseStatus::Active {
        return Err(AppError::Conflict("License is already active".into()));
    }

    if license.status == LicenseStatus::Expired {
        let Some(days) = extend_days else {
            return Err(AppError::BadRequest(
                "Resuming an expired license requires extend_days".into(),
            ));
        };
        if let Some(end) = license.end_date {
            let grace_deadline = end
                + (i64::from(days) + i64::from(license.grace_period_days)) * SECONDS_PER_DAY;
            if grace_deadline < now {
                return Err(AppError::BadRequest(
                    "Extension does not carry the license past today".into(),
                ));
            }
        }
    }

    let applied = apply_transition(
        &tx,
        &license,
        &TransitionRequest {
            to: LicenseStatus::Active,
            trigger: Trigger::Admin,
            actor: actor.to_string(),
            reason: None,
            extend_days,
        },
        now,
    )?;
    tx.commit()?;
    Ok(applied)
}
