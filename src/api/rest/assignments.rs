use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ensure_admin, ensure_tenant, Page, PageQuery};
use crate::domain::models::Assignment;
use crate::infrastructure::auth::AuthenticatedActor;
use crate::infrastructure::state::AppState;
use crate::services::assignment;
use crate::services::errors::ServiceError;

#[derive(Debug, Deserialize)]
pub struct CreateAssignmentBody {
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

pub async fn create_assignment(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, policy_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<CreateAssignmentBody>,
) -> Result<(axum::http::StatusCode, Json<Assignment>), ServiceError> {
    ensure_tenant(&actor, company_id)?;
    ensure_admin(&actor)?;

    if body.policy_id != policy_id {
        return Err(ServiceError::Validation(
            "policy_id in body must match the path".to_string(),
        ));
    }

    let created = assignment::create_assignment(
        &state.pool,
        company_id,
        actor.user_id,
        assignment::CreateAssignment {
            employee_id: body.employee_id,
            policy_id,
            effective_from: body.effective_from,
            effective_to: body.effective_to,
        },
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

pub async fn list_by_policy(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, policy_id)): Path<(Uuid, Uuid)>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Page<Assignment>>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let (items, total) =
        assignment::list_assignments_by_policy(&state.pool, company_id, policy_id, page.offset, page.limit).await?;
    Ok(Json(Page { items, total }))
}

pub async fn list_by_employee(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, employee_id)): Path<(Uuid, Uuid)>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Page<Assignment>>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let (items, total) =
        assignment::list_assignments_by_employee(&state.pool, company_id, employee_id, page.offset, page.limit)
            .await?;
    Ok(Json(Page { items, total }))
}

#[derive(Debug, Deserialize)]
pub struct EndDateQuery {
    pub effective_to: NaiveDate,
}

pub async fn end_date_assignment(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, assignment_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<EndDateQuery>,
) -> Result<Json<Assignment>, ServiceError> {
    ensure_tenant(&actor, company_id)?;
    ensure_admin(&actor)?;

    let updated = assignment::end_date_assignment(
        &state.pool,
        company_id,
        actor.user_id,
        assignment_id,
        query.effective_to,
    )
    .await?;

    Ok(Json(updated))
}
