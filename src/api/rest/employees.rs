use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ensure_admin, ensure_tenant};
use crate::domain::models::EmployeeProfile;
use crate::infrastructure::auth::AuthenticatedActor;
use crate::infrastructure::state::AppState;
use crate::services::employee;
use crate::services::errors::ServiceError;

#[derive(Debug, Deserialize)]
pub struct UpsertEmployeeBody {
    pub workday_minutes: i32,
    pub timezone: String,
    pub hire_date: Option<NaiveDate>,
}

/// Writes the minimal employee directory record this service owns
/// (SPEC_FULL.md §12); the rest of the employee's HR data lives elsewhere.
pub async fn upsert_employee(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, employee_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpsertEmployeeBody>,
) -> Result<Json<EmployeeProfile>, ServiceError> {
    ensure_tenant(&actor, company_id)?;
    ensure_admin(&actor)?;

    let profile = employee::upsert_employee(
        &state.pool,
        company_id,
        employee_id,
        employee::UpsertEmployee {
            workday_minutes: body.workday_minutes,
            timezone: body.timezone,
            hire_date: body.hire_date,
        },
    )
    .await?;

    Ok(Json(profile))
}

pub async fn get_employee(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, employee_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<EmployeeProfile>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let profile = employee::get_employee(&state.pool, company_id, employee_id).await?;
    Ok(Json(profile))
}
