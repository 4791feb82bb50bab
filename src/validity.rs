//! Credential validity: interval derivation at issuance and freshness on read.
//!
//! Both functions are pure. `compute_validity` runs once when a credential is
//! issued; `classify_freshness` runs on every read so the classification can
//! never go stale.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result};
use crate::models::{Credential, CredentialStatus, ValidityKind, ValidityPolicy};
use crate::util::datetime_from_ts;

/// How far ahead of `valid_to` a credential starts reporting `ExpiringSoon`.
pub const EXPIRING_SOON_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Valid,
    ExpiringSoon,
    Expired,
}

/// Which branch of the policy produced a validity interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidityBasis {
    /// No policy, or `ValidityKind::None`
    Unbounded,
    FixedYears,
    /// `CustomRule` has no evaluator yet; the interval is left open-ended.
    CustomRuleNotEvaluated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub basis: ValidityBasis,
}

/// Derive the validity interval for a completion under `policy`.
///
/// Fixed-year policies use calendar arithmetic: Feb 29 plus one year lands on
/// Feb 28, plus four years on Feb 29.
pub fn compute_validity(
    completed_at: DateTime<Utc>,
    policy: Option<&ValidityPolicy>,
) -> Result<Validity> {
    let unbounded = |basis| Validity {
        valid_from: completed_at,
        valid_to: None,
        basis,
    };

    let Some(policy) = policy else {
        return Ok(unbounded(ValidityBasis::Unbounded));
    };

    match policy.kind {
        ValidityKind::None => Ok(unbounded(ValidityBasis::Unbounded)),
        ValidityKind::FixedYears => {
            let years = match policy.years {
                Some(y) if y > 0 => y,
                Some(_) => {
                    return Err(AppError::Configuration(
                        "Fixed-years validity policy requires a positive number of years".into(),
                    ));
                }
                None => {
                    return Err(AppError::Configuration(
                        "Fixed-years validity policy is missing its number of years".into(),
                    ));
                }
            };

            let valid_to = years
                .checked_mul(12)
                .and_then(|months| completed_at.checked_add_months(Months::new(months)))
                .ok_or_else(|| {
                    AppError::Configuration(format!(
                        "Validity of {} years is out of the supported date range",
                        years
                    ))
                })?;

            Ok(Validity {
                valid_from: completed_at,
                valid_to: Some(valid_to),
                basis: ValidityBasis::FixedYears,
            })
        }
        ValidityKind::CustomRule => {
            tracing::warn!("Custom validity rule is not evaluated; issuing open-ended validity");
            Ok(unbounded(ValidityBasis::CustomRuleNotEvaluated))
        }
    }
}

/// Classify a validity end date relative to `now`.
///
/// The expiring-soon window is measured against `valid_to` itself, while
/// expiry waits for the grace period. A credential past `valid_to` but still in
/// grace therefore reads as `ExpiringSoon`.
pub fn classify_freshness(
    valid_to: Option<DateTime<Utc>>,
    grace_days: u32,
    now: DateTime<Utc>,
) -> Freshness {
    let Some(valid_to) = valid_to else {
        return Freshness::Valid;
    };

    if now > valid_to + Duration::days(i64::from(grace_days)) {
        Freshness::Expired
    } else if valid_to <= now + Duration::days(EXPIRING_SOON_DAYS) {
        Freshness::ExpiringSoon
    } else {
        Freshness::Valid
    }
}

/// Freshness view of a stored credential at `now`.
pub fn credential_status(credential: Credential, now: DateTime<Utc>) -> Result<CredentialStatus> {
    let valid_to = credential.valid_to.map(datetime_from_ts).transpose()?;
    let freshness = classify_freshness(valid_to, credential.grace_days, now);
    let days_remaining = valid_to.map(|to| (to - now).num_seconds().div_euclid(86_400));

    Ok(CredentialStatus {
        credential,
        freshness,
        days_remaining,
    })
}
