use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ensure_tenant, Page, PageQuery};
use crate::domain::models::{Request, RequestStatus};
use crate::infrastructure::auth::AuthenticatedActor;
use crate::infrastructure::state::AppState;
use crate::services::duration::RequestTimestamp;
use crate::services::errors::ServiceError;
use crate::services::request;

#[derive(Debug, Deserialize)]
pub struct SubmitRequestBody {
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub start_at: RequestTimestamp,
    pub end_at: RequestTimestamp,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
}

pub async fn submit_request(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
    Json(body): Json<SubmitRequestBody>,
) -> Result<(axum::http::StatusCode, Json<Request>), ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let created = request::submit_request(
        &state.pool,
        &state.employees,
        &state.companies,
        company_id,
        actor.user_id,
        request::SubmitRequest {
            employee_id: body.employee_id,
            policy_id: body.policy_id,
            start_at: body.start_at,
            end_at: body.end_at,
            reason: body.reason,
            idempotency_key: body.idempotency_key,
        },
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<String>,
    pub policy_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
    #[serde(flatten)]
    pub page: PageQuery,
}

pub async fn list_requests(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<Page<Request>>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let status = query
        .status
        .map(|s| s.parse::<RequestStatus>())
        .transpose()
        .map_err(ServiceError::Validation)?;

    let (items, total) = request::list_requests(
        &state.pool,
        company_id,
        request::ListRequestsFilter {
            status,
            policy_id: query.policy_id,
            employee_id: query.employee_id,
            offset: query.page.offset,
            limit: query.page.limit,
        },
    )
    .await?;

    Ok(Json(Page { items, total }))
}

pub async fn get_request(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, request_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Request>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let found = request::get_request(&state.pool, company_id, request_id).await?;
    Ok(Json(found))
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionBody {
    pub note: Option<String>,
}

pub async fn approve_request(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, request_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<DecisionBody>>,
) -> Result<Json<Request>, ServiceError> {
    ensure_tenant(&actor, company_id)?;
    if !actor.is_admin() {
        return Err(ServiceError::Forbidden);
    }

    let note = body.and_then(|Json(b)| b.note);
    let updated = request::approve_request(&state.pool, company_id, actor.user_id, request_id, note).await?;
    Ok(Json(updated))
}

pub async fn deny_request(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, request_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<DecisionBody>>,
) -> Result<Json<Request>, ServiceError> {
    ensure_tenant(&actor, company_id)?;
    if !actor.is_admin() {
        return Err(ServiceError::Forbidden);
    }

    let note = body.and_then(|Json(b)| b.note);
    let updated = request::deny_request(&state.pool, company_id, actor.user_id, request_id, note).await?;
    Ok(Json(updated))
}

/// The employee who submitted the request, or an admin, may cancel
/// (spec.md §6, `cancel admin-or-owner`).
pub async fn cancel_request(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, request_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Request>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let updated =
        request::cancel_request(&state.pool, company_id, actor.user_id, actor.is_admin(), request_id).await?;
    Ok(Json(updated))
}
