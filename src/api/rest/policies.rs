use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ensure_admin, ensure_tenant, Page, PageQuery};
use crate::domain::models::{PolicySettings, PolicyVersion};
use crate::infrastructure::auth::AuthenticatedActor;
use crate::infrastructure::state::AppState;
use crate::services::errors::ServiceError;
use crate::services::policy;

#[derive(Debug, Deserialize)]
pub struct CreatePolicyBody {
    pub key: String,
    pub category: String,
    pub effective_from: NaiveDate,
    pub settings: PolicySettings,
    pub change_reason: Option<String>,
}

pub async fn create_policy(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
    Json(body): Json<CreatePolicyBody>,
) -> Result<(axum::http::StatusCode, Json<serde_json::Value>), ServiceError> {
    ensure_tenant(&actor, company_id)?;
    ensure_admin(&actor)?;

    let (created, version) = policy::create_policy(
        &state.pool,
        company_id,
        actor.user_id,
        policy::CreatePolicy {
            key: body.key,
            category: body.category,
            effective_from: body.effective_from,
            settings: body.settings,
            change_reason: body.change_reason,
        },
    )
    .await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(serde_json::json!({ "policy": created, "current_version": version })),
    ))
}

pub async fn list_policies(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Page<serde_json::Value>>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let (items, total) = policy::list_policies(&state.pool, company_id, page.offset, page.limit).await?;
    let items = items
        .into_iter()
        .map(|(p, v)| serde_json::json!({ "policy": p, "current_version": v }))
        .collect();

    Ok(Json(Page { items, total }))
}

pub async fn get_policy(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, policy_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let (found, version) = policy::get_policy(&state.pool, company_id, policy_id).await?;
    Ok(Json(serde_json::json!({ "policy": found, "current_version": version })))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePolicyBody {
    pub settings: PolicySettings,
    pub effective_from: NaiveDate,
    pub change_reason: Option<String>,
}

pub async fn update_policy(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, policy_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdatePolicyBody>,
) -> Result<Json<PolicyVersion>, ServiceError> {
    ensure_tenant(&actor, company_id)?;
    ensure_admin(&actor)?;

    let version = policy::update_policy(
        &state.pool,
        company_id,
        actor.user_id,
        policy_id,
        policy::UpdatePolicy {
            settings: body.settings,
            effective_from: body.effective_from,
            change_reason: body.change_reason,
        },
    )
    .await?;

    Ok(Json(version))
}

pub async fn list_versions(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, policy_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<PolicyVersion>>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let versions = policy::list_versions(&state.pool, company_id, policy_id).await?;
    Ok(Json(versions))
}
