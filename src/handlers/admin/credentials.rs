use axum::extract::State;
use chrono::Utc;
use serde::Deserialize;

use crate::credentials::issue_credential;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::models::{CredentialStatus, IssueCredential};
use crate::validity::credential_status;

#[derive(Deserialize)]
pub struct CredentialPath {
    pub id: String,
}

/// POST /admin/credentials
pub async fn create_credential(
    State(state): State<AppState>,
    Json(body): Json<IssueCredential>,
) -> Result<Json<CredentialStatus>> {
    let conn = state.db.get()?;
    let credential = issue_credential(&conn, &body)?;
    Ok(Json(credential_status(credential, Utc::now())?))
}

/// GET /admin/credentials/{id}
pub async fn get_credential(
    State(state): State<AppState>,
    Path(path): Path<CredentialPath>,
) -> Result<Json<CredentialStatus>> {
    let conn = state.db.get()?;
    let credential = queries::get_credential_by_id(&conn, &path.id)?
        .ok_or_else(|| AppError::NotFound("Credential not found".into()))?;
    Ok(Json(credential_status(credential, Utc::now())?))
}
