use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ensure_tenant, Page, PageQuery};
use crate::domain::models::LedgerEntry;
use crate::infrastructure::auth::AuthenticatedActor;
use crate::infrastructure::state::AppState;
use crate::services::errors::ServiceError;
use crate::services::reporting::{self, LedgerExportFilter};

#[derive(Debug, Serialize)]
pub struct BalanceSummaryRow {
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub policy_key: String,
    pub policy_category: String,
    pub accrued_minutes: i64,
    pub used_minutes: i64,
    pub held_minutes: i64,
    pub available_minutes: Option<i64>,
    pub is_unlimited: bool,
}

pub async fn balances_summary(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
) -> Result<Json<Vec<BalanceSummaryRow>>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let rows = reporting::get_company_balance_summary(&state.pool, company_id).await?;
    let out = rows
        .into_iter()
        .map(|r| BalanceSummaryRow {
            employee_id: r.employee_id,
            policy_id: r.policy_id,
            policy_key: r.policy_key,
            policy_category: r.policy_category,
            accrued_minutes: r.accrued_minutes,
            used_minutes: r.used_minutes,
            held_minutes: r.held_minutes,
            available_minutes: r.available_minutes,
            is_unlimited: r.is_unlimited,
        })
        .collect();

    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
pub struct LedgerExportQuery {
    pub policy_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub page: PageQuery,
}

pub async fn ledger_export(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
    Query(query): Query<LedgerExportQuery>,
) -> Result<Json<Page<LedgerEntry>>, ServiceError> {
    ensure_tenant(&actor, company_id)?;
    if !actor.is_admin() {
        return Err(ServiceError::Forbidden);
    }

    let (items, total) = reporting::export_ledger(
        &state.pool,
        company_id,
        LedgerExportFilter {
            policy_id: query.policy_id,
            employee_id: query.employee_id,
            start_date: query.start_date,
            end_date: query.end_date,
            offset: query.page.offset,
            limit: query.page.limit,
        },
    )
    .await?;

    Ok(Json(Page { items, total }))
}
