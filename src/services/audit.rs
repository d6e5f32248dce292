use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::domain::models::AuditAction;
use crate::services::errors::ServiceError;

/// Appends one immutable audit record within the caller's transaction
/// (spec.md §4.1). Never mutated or deleted once written.
pub async fn write_audit_log(
    tx: &mut Transaction<'_, Postgres>,
    company_id: Uuid,
    actor_id: Uuid,
    entity_type: &str,
    entity_id: Uuid,
    action: AuditAction,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
) -> Result<(), ServiceError> {
    sqlx::query(
        "INSERT INTO audit_log (id, company_id, actor_id, entity_type, entity_id, action, before, after) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(Uuid::new_v4())
    .bind(company_id)
    .bind(actor_id)
    .bind(entity_type)
    .bind(entity_id)
    .bind(action)
    .bind(before)
    .bind(after)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
