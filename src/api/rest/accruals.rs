use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ensure_admin, ensure_tenant};
use crate::infrastructure::auth::AuthenticatedActor;
use crate::infrastructure::state::AppState;
use crate::services::accrual::{self, AccrualRunResult};
use crate::services::errors::ServiceError;

#[derive(Debug, Deserialize)]
pub struct TriggerQuery {
    pub target_date: NaiveDate,
}

/// Manual backfill trigger for the time-based accrual engine (spec.md
/// §4.9), for replaying a missed or corrected worker run.
pub async fn trigger(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
    Query(query): Query<TriggerQuery>,
) -> Result<Json<AccrualRunResult>, ServiceError> {
    ensure_tenant(&actor, company_id)?;
    ensure_admin(&actor)?;

    let result = accrual::run_time_based_accruals(
        &state.pool,
        &state.employees,
        query.target_date,
        Some(company_id),
    )
    .await?;

    Ok(Json(result))
}
