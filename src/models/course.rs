use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// How a course's credentials expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidityKind {
    None,
    FixedYears,
    /// Recognized but not evaluated; see `validity::ValidityBasis::CustomRuleNotEvaluated`
    CustomRule,
}

/// Validity configuration attached to a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityPolicy {
    pub kind: ValidityKind,
    /// Required (and positive) when `kind` is `FixedYears`
    #[serde(default)]
    pub years: Option<u32>,
    #[serde(default)]
    pub grace_days: u32,
}

impl ValidityPolicy {
    pub fn none() -> Self {
        Self {
            kind: ValidityKind::None,
            years: None,
            grace_days: 0,
        }
    }

    pub fn fixed_years(years: u32, grace_days: u32) -> Self {
        Self {
            kind: ValidityKind::FixedYears,
            years: Some(years),
            grace_days,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub name: String,
    /// None when the course carries no validity configuration at all
    pub validity: Option<ValidityPolicy>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCourse {
    pub name: String,
    #[serde(default)]
    pub validity: Option<ValidityPolicy>,
}
