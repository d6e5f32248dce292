use axum::{http::StatusCode, Json, Router};

use self::rest::router as rest_router;
use crate::infrastructure::auth::AuthenticatedActor;
use crate::services::errors::ServiceError;
use uuid::Uuid;

pub mod rest;

pub fn build_router() -> Router {
    Router::new().nest("/api", rest_router())
}

pub async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "not_found"})),
    )
}

/// Rejects cross-tenant access (spec.md §4.15, "Tenant isolation"): the
/// `X-Company-Id` header must match the company in the path.
pub(crate) fn ensure_tenant(actor: &AuthenticatedActor, path_company_id: Uuid) -> Result<(), ServiceError> {
    if actor.company_id != path_company_id {
        return Err(ServiceError::Forbidden);
    }
    Ok(())
}

pub(crate) fn ensure_admin(actor: &AuthenticatedActor) -> Result<(), ServiceError> {
    if !actor.is_admin() {
        return Err(ServiceError::Forbidden);
    }
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct PageQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}
