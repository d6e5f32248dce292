use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ensure_tenant, Page};
use crate::domain::models::LedgerEntry;
use crate::infrastructure::auth::AuthenticatedActor;
use crate::infrastructure::state::AppState;
use crate::services::balance;
use crate::services::errors::ServiceError;

pub async fn get_balances(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, employee_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let views = balance::get_employee_balances(&state.pool, company_id, employee_id).await?;
    let items: Vec<serde_json::Value> = views
        .into_iter()
        .map(|v| {
            serde_json::json!({
                "policy_id": v.policy_id,
                "policy_key": v.policy_key,
                "policy_category": v.policy_category,
                "accrued_minutes": v.accrued_minutes,
                "used_minutes": v.used_minutes,
                "held_minutes": v.held_minutes,
                "available_minutes": v.available_minutes,
                "is_unlimited": v.is_unlimited,
                "updated_at": v.updated_at,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "balances": items })))
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub policy_id: Uuid,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn get_ledger(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, employee_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Page<LedgerEntry>>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let (items, total) = balance::get_employee_ledger(
        &state.pool,
        company_id,
        employee_id,
        query.policy_id,
        query.offset,
        query.limit,
    )
    .await?;

    Ok(Json(Page { items, total }))
}
