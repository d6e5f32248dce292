use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ensure_admin, ensure_tenant};
use crate::domain::models::LedgerEntry;
use crate::infrastructure::auth::AuthenticatedActor;
use crate::infrastructure::state::AppState;
use crate::services::assignment::verify_active_assignment;
use crate::services::balance;
use crate::services::errors::ServiceError;

#[derive(Debug, Deserialize)]
pub struct CreateAdjustmentBody {
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub amount_minutes: i64,
    pub reason: String,
}

pub async fn create_adjustment(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
    Json(body): Json<CreateAdjustmentBody>,
) -> Result<(axum::http::StatusCode, Json<LedgerEntry>), ServiceError> {
    ensure_tenant(&actor, company_id)?;
    ensure_admin(&actor)?;

    let today = Utc::now().date_naive();
    verify_active_assignment(&state.pool, company_id, body.employee_id, body.policy_id, today).await?;

    let mut tx = state.pool.begin().await?;
    let entry = balance::create_adjustment(
        &mut tx,
        company_id,
        actor.user_id,
        balance::CreateAdjustment {
            employee_id: body.employee_id,
            policy_id: body.policy_id,
            amount_minutes: body.amount_minutes,
            reason: body.reason,
        },
    )
    .await?;
    tx.commit().await?;

    Ok((axum::http::StatusCode::CREATED, Json(entry)))
}
