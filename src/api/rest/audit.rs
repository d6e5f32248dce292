use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ensure_admin, ensure_tenant, Page, PageQuery};
use crate::domain::models::{AuditAction, AuditLog};
use crate::infrastructure::auth::AuthenticatedActor;
use crate::infrastructure::state::AppState;
use crate::services::errors::ServiceError;
use crate::services::reporting::{self, AuditLogFilter};

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub entity_type: Option<String>,
    pub action: Option<String>,
    pub actor_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub page: PageQuery,
}

pub async fn query_audit_log(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Page<AuditLog>>, ServiceError> {
    ensure_tenant(&actor, company_id)?;
    ensure_admin(&actor)?;

    let action = query
        .action
        .map(|a| a.parse::<AuditAction>())
        .transpose()
        .map_err(ServiceError::Validation)?;

    let (items, total) = reporting::query_audit_log(
        &state.pool,
        company_id,
        AuditLogFilter {
            entity_type: query.entity_type,
            action,
            actor_id: query.actor_id,
            start_date: query.start_date,
            end_date: query.end_date,
            offset: query.page.offset,
            limit: query.page.limit,
        },
    )
    .await?;

    Ok(Json(Page { items, total }))
}
