use serde::{Deserialize, Serialize};

use crate::validity::{Freshness, ValidityBasis};

/// An issued record asserting a person completed a course.
///
/// `valid_from`/`valid_to` are fixed at issuance; later policy edits on the
/// course never touch them. `grace_days` is the policy's value at issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub person_id: String,
    pub course_id: String,
    pub completed_at: i64,
    pub valid_from: i64,
    /// None = never expires
    pub valid_to: Option<i64>,
    pub grace_days: u32,
    pub validity_basis: ValidityBasis,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct IssueCredential {
    pub person_id: String,
    pub course_id: String,
    /// Unix timestamp of course completion
    pub completed_at: i64,
}

/// Read-side view of a credential; freshness is computed, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    #[serde(flatten)]
    pub credential: Credential,
    pub freshness: Freshness,
    /// Whole days until `valid_to` (negative once past it); None for open-ended credentials
    pub days_remaining: Option<i64>,
}
