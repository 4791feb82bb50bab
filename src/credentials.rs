//! Credential issuance.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{Credential, IssueCredential};
use crate::util::datetime_from_ts;
use crate::validity::compute_validity;

/// Issue a credential for a completed course.
///
/// Validity is derived from the course's policy as it stands now and frozen
/// onto the credential, together with the policy's grace days.
pub fn issue_credential(conn: &Connection, input: &IssueCredential) -> Result<Credential> {
    let course = queries::get_course_by_id(conn, &input.course_id)?
        .ok_or_else(|| AppError::NotFound("Course not found".into()))?;

    let completed_at = datetime_from_ts(input.completed_at)?;
    let validity = compute_validity(completed_at, course.validity.as_ref())?;
    let grace_days = course.validity.map(|p| p.grace_days).unwrap_or(0);

    let credential = queries::create_credential(conn, input, &validity, grace_days)?;

    tracing::info!(
        credential_id = %credential.id,
        course_id = %course.id,
        basis = validity.basis.as_ref(),
        valid_to = ?credential.valid_to,
        "Credential issued"
    );

    Ok(credential)
}
