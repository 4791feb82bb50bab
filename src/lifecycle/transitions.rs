use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{AuditEntry, License, LicenseAction, LicenseActivity, LicenseStatus};
use crate::notify::SuspensionNotice;
use crate::util::SECONDS_PER_DAY;

use super::SideEffect;

/// Who is allowed to drive a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Scheduler,
    Admin,
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub from: LicenseStatus,
    pub to: LicenseStatus,
    pub trigger: Trigger,
    pub action: LicenseAction,
}

/// Every allowed license status change. Anything else is rejected.
pub const TRANSITIONS: &[TransitionRule] = &[
    TransitionRule {
        from: LicenseStatus::Trial,
        to: LicenseStatus::Expired,
        trigger: Trigger::Scheduler,
        action: LicenseAction::Expired,
    },
    TransitionRule {
        from: LicenseStatus::Active,
        to: LicenseStatus::Expired,
        trigger: Trigger::Scheduler,
        action: LicenseAction::Expired,
    },
    TransitionRule {
        from: LicenseStatus::Active,
        to: LicenseStatus::Suspended,
        trigger: Trigger::Admin,
        action: LicenseAction::Suspended,
    },
    TransitionRule {
        from: LicenseStatus::Suspended,
        to: LicenseStatus::Active,
        trigger: Trigger::Admin,
        action: LicenseAction::Resumed,
    },
    TransitionRule {
        from: LicenseStatus::Expired,
        to: LicenseStatus::Active,
        trigger: Trigger::Admin,
        action: LicenseAction::Resumed,
    },
];

pub fn find_transition(
    from: LicenseStatus,
    to: LicenseStatus,
    trigger: Trigger,
) -> Result<&'static TransitionRule> {
    TRANSITIONS
        .iter()
        .find(|rule| rule.from == from && rule.to == to && rule.trigger == trigger)
        .ok_or_else(|| AppError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
}

#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub to: LicenseStatus,
    pub trigger: Trigger,
    pub actor: String,
    pub reason: Option<String>,
    /// Only meaningful when moving back to `Active`
    pub extend_days: Option<u32>,
}

impl TransitionRequest {
    pub fn expire(reason: &str) -> Self {
        Self {
            to: LicenseStatus::Expired,
            trigger: Trigger::Scheduler,
            actor: crate::models::SYSTEM_ACTOR.to_string(),
            reason: Some(reason.to_string()),
            extend_days: None,
        }
    }
}

#[derive(Debug)]
pub struct AppliedTransition {
    pub from: LicenseStatus,
    pub license: License,
    pub activity: LicenseActivity,
    /// To be dispatched once the surrounding transaction has committed
    pub effects: Vec<SideEffect>,
}

/// Apply one transition to `license` inside the caller's transaction.
///
/// Updates the license row (guarded on its current status), mirrors the status
/// onto the company when this is its current license and appends exactly one
/// activity. Fails with `Conflict` if
/// another writer changed the license since it was read.
pub fn apply_transition(
    conn: &Connection,
    license: &License,
    request: &TransitionRequest,
    now: i64,
) -> Result<AppliedTransition> {
    let rule = find_transition(license.status, request.to, request.trigger)?;

    let mut next = license.clone();
    next.status = request.to;
    next.updated_at = now;

    match request.to {
        LicenseStatus::Expired | LicenseStatus::Suspended => {
            next.suspended_at = Some(now);
            next.suspended_by = Some(request.actor.clone());
            next.suspended_reason = request.reason.clone();
        }
        LicenseStatus::Active => {
            next.suspended_at = None;
            next.suspended_by = None;
            next.suspended_reason = None;
            if let (Some(end), Some(days)) = (next.end_date, request.extend_days) {
                next.end_date = Some(end + i64::from(days) * SECONDS_PER_DAY);
            }
        }
        LicenseStatus::Trial => {}
    }

    if !queries::update_license_state(conn, &next, license.status)? {
        return Err(AppError::Conflict(format!(
            "License {} is no longer {}",
            license.id, license.status
        )));
    }

    // A superseded license must not overwrite the company's current status
    let is_current = queries::get_current_license_for_company(conn, &license.company_id)?
        .is_some_and(|current| current.id == license.id);
    if is_current {
        queries::set_company_license_status(conn, &license.company_id, next.status, now)?;
    }

    let metadata = serde_json::json!({
        "from": license.status,
        "to": next.status,
        "trigger": request.trigger,
        "company_id": license.company_id,
        "end_date": next.end_date,
        "extend_days": request.extend_days,
        "current": is_current,
    });

    let activity = queries::create_license_activity(
        conn,
        &license.id,
        rule.action,
        &request.actor,
        request.reason.as_deref(),
        Some(&metadata),
        now,
    )?;

    let mut effects = vec![SideEffect::Audit(
        AuditEntry::new(
            &format!("license_{}", rule.action.as_ref()),
            "license",
            &license.id,
            &request.actor,
            now,
        )
        .reason(request.reason.as_deref())
        .metadata(metadata),
    )];

    if next.status == LicenseStatus::Expired && is_current {
        let company = queries::get_company_by_id(conn, &license.company_id)?
            .ok_or_else(|| AppError::NotFound("Company not found".into()))?;
        effects.push(SideEffect::SuspensionNotice(SuspensionNotice {
            license_id: license.id.clone(),
            company_id: company.id,
            company_name: company.name,
            email: company.email,
            contact_email: company.contact_email,
            suspended_at: now,
            reason: request.reason.clone(),
        }));
    }

    tracing::info!(
        license_id = %license.id,
        company_id = %license.company_id,
        from = %license.status,
        to = %next.status,
        actor = %request.actor,
        "License transitioned"
    );

    Ok(AppliedTransition {
        from: license.status,
        license: next,
        activity,
        effects,
    })
}
