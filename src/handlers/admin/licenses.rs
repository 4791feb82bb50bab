use axum::extract::State;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::lifecycle::{AppliedTransition, resume_license, suspend_license};
use crate::models::{License, LicenseActivity, LicenseWithActivity};
use crate::util::now;

#[derive(Deserialize)]
pub struct CompanyPath {
    pub company_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SuspendBody {
    pub reason: String,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct ResumeBody {
    pub actor: String,
    #[serde(default)]
    pub extend_days: Option<u32>,
}

#[derive(serde::Serialize)]
pub struct TransitionResponse {
    pub license: License,
    pub activity: LicenseActivity,
}

fn require_actor(actor: &str) -> Result<()> {
    if actor.trim().is_empty() {
        return Err(AppError::BadRequest("actor is required".into()));
    }
    Ok(())
}

/// Dispatch the transition's side effects and shape the response.
async fn finish(state: &AppState, applied: AppliedTransition) -> Json<TransitionResponse> {
    let failures = state.dispatcher().dispatch(applied.effects).await;
    for failure in &failures {
        tracing::warn!(
            license_id = %applied.license.id,
            effect = failure.effect,
            error = %failure.message,
            "Side effect failed after manual transition"
        );
    }
    Json(TransitionResponse {
        license: applied.license,
        activity: applied.activity,
    })
}

/// GET /admin/companies/{company_id}/license
pub async fn get_company_license(
    State(state): State<AppState>,
    Path(path): Path<CompanyPath>,
) -> Result<Json<LicenseWithActivity>> {
    let conn = state.db.get()?;

    let license = queries::get_current_license_for_company(&conn, &path.company_id)?
        .ok_or_else(|| AppError::NotFound("No license found for company".into()))?;
    let activity = queries::list_license_activities(&conn, &license.id)?;

    Ok(Json(LicenseWithActivity { license, activity }))
}

/// POST /admin/companies/{company_id}/license/suspend
pub async fn suspend_company_license(
    State(state): State<AppState>,
    Path(path): Path<CompanyPath>,
    Json(body): Json<SuspendBody>,
) -> Result<Json<TransitionResponse>> {
    require_actor(&body.actor)?;

    let applied = {
        let mut conn = state.db.get()?;
        suspend_license(&mut conn, &path.company_id, &body.reason, &body.actor, now())?
    };

    Ok(finish(&state, applied).await)
}

/// POST /admin/companies/{company_id}/license/resume
pub async fn resume_company_license(
    State(state): State<AppState>,
    Path(path): Path<CompanyPath>,
    Json(body): Json<ResumeBody>,
) -> Result<Json<TransitionResponse>> {
    require_actor(&body.actor)?;

    let applied = {
        let mut conn = state.db.get()?;
        resume_license(&mut conn, &path.company_id, &body.actor, body.extend_days, now())?
    };

    Ok(finish(&state, applied).await)
}
