use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ensure_admin, ensure_tenant, Page};
use crate::domain::models::CompanyHoliday;
use crate::infrastructure::auth::AuthenticatedActor;
use crate::infrastructure::state::AppState;
use crate::services::errors::ServiceError;
use crate::services::holiday;

#[derive(Debug, Deserialize)]
pub struct CreateHolidayBody {
    pub date: NaiveDate,
    pub name: String,
}

pub async fn create_holiday(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
    Json(body): Json<CreateHolidayBody>,
) -> Result<(axum::http::StatusCode, Json<CompanyHoliday>), ServiceError> {
    ensure_tenant(&actor, company_id)?;
    ensure_admin(&actor)?;

    let created = holiday::create_holiday(
        &state.pool,
        company_id,
        actor.user_id,
        holiday::CreateHoliday {
            date: body.date,
            name: body.name,
        },
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct ListHolidaysQuery {
    pub year: Option<i32>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_holidays(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path(company_id): Path<Uuid>,
    Query(query): Query<ListHolidaysQuery>,
) -> Result<Json<Page<CompanyHoliday>>, ServiceError> {
    ensure_tenant(&actor, company_id)?;

    let (items, total) =
        holiday::list_holidays(&state.pool, company_id, query.year, query.offset, query.limit).await?;
    Ok(Json(Page { items, total }))
}

pub async fn delete_holiday(
    Extension(state): Extension<Arc<AppState>>,
    actor: AuthenticatedActor,
    Path((company_id, holiday_id)): Path<(Uuid, Uuid)>,
) -> Result<axum::http::StatusCode, ServiceError> {
    ensure_tenant(&actor, company_id)?;
    ensure_admin(&actor)?;

    holiday::delete_holiday(&state.pool, company_id, actor.user_id, holiday_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
