use std::sync::Arc;

use axum::extract::Extension;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::infrastructure::state::AppState;
use crate::services::accrual::{self, PayrollEmployeeEntry, PayrollProcessedPayload, PayrollProcessingResult};
use crate::services::errors::ServiceError;

#[derive(Debug, Deserialize)]
pub struct PayrollEntryBody {
    pub employee_id: Uuid,
    pub worked_minutes: i64,
}

#[derive(Debug, Deserialize)]
pub struct PayrollProcessedBody {
    pub payroll_run_id: String,
    pub company_id: Uuid,
    pub period_end: NaiveDate,
    pub entries: Vec<PayrollEntryBody>,
}

/// The payroll processor identifies its own tenant in the payload rather
/// than the path (spec.md §6, "body-scoped tenant") — this is a
/// system-to-system webhook, not an actor-scoped request.
pub async fn payroll_processed(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<PayrollProcessedBody>,
) -> Result<Json<PayrollProcessingResult>, ServiceError> {
    let payload = PayrollProcessedPayload {
        payroll_run_id: body.payroll_run_id,
        company_id: body.company_id,
        period_end: body.period_end,
        entries: body
            .entries
            .into_iter()
            .map(|e| PayrollEmployeeEntry {
                employee_id: e.employee_id,
                worked_minutes: e.worked_minutes,
            })
            .collect(),
    };

    let result = accrual::process_payroll_event(&state.pool, payload).await?;
    Ok(Json(result))
}
