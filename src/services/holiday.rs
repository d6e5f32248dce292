use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::models::{AuditAction, CompanyHoliday};
use crate::services::audit::write_audit_log;
use crate::services::errors::ServiceError;

pub struct CreateHoliday {
    pub date: NaiveDate,
    pub name: String,
}

/// Creates a company holiday, used by the duration calculator (spec.md
/// §4.4) to exclude that date from requested-minutes computation.
pub async fn create_holiday(
    pool: &PgPool,
    company_id: Uuid,
    actor_id: Uuid,
    payload: CreateHoliday,
) -> Result<CompanyHoliday, ServiceError> {
    let mut tx = pool.begin().await?;

    let holiday = sqlx::query_as::<_, CompanyHoliday>(
        "INSERT INTO company_holidays (id, company_id, date, name) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(company_id)
    .bind(payload.date)
    .bind(&payload.name)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            ServiceError::Conflict("a holiday already exists for this date".to_string())
        }
        _ => ServiceError::from(err),
    })?;

    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "holiday",
        holiday.id,
        AuditAction::Create,
        None,
        Some(serde_json::to_value(&holiday)?),
    )
    .await?;

    tx.commit().await?;
    Ok(holiday)
}

pub async fn list_holidays(
    pool: &PgPool,
    company_id: Uuid,
    year: Option<i32>,
    offset: i64,
    limit: i64,
) -> Result<(Vec<CompanyHoliday>, i64), ServiceError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM company_holidays WHERE company_id = $1 \
            AND ($2::int IS NULL OR EXTRACT(YEAR FROM date) = $2)",
    )
    .bind(company_id)
    .bind(year)
    .fetch_one(pool)
    .await?;

    let holidays = sqlx::query_as::<_, CompanyHoliday>(
        "SELECT * FROM company_holidays WHERE company_id = $1 \
            AND ($2::int IS NULL OR EXTRACT(YEAR FROM date) = $2) \
         ORDER BY date OFFSET $3 LIMIT $4",
    )
    .bind(company_id)
    .bind(year)
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok((holidays, total))
}

pub async fn delete_holiday(
    pool: &PgPool,
    company_id: Uuid,
    actor_id: Uuid,
    holiday_id: Uuid,
) -> Result<(), ServiceError> {
    let mut tx = pool.begin().await?;

    let holiday = sqlx::query_as::<_, CompanyHoliday>(
        "SELECT * FROM company_holidays WHERE id = $1 AND company_id = $2",
    )
    .bind(holiday_id)
    .bind(company_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ServiceError::NotFound)?;

    sqlx::query("DELETE FROM company_holidays WHERE id = $1")
        .bind(holiday_id)
        .execute(&mut *tx)
        .await?;

    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "holiday",
        holiday.id,
        AuditAction::Delete,
        Some(serde_json::to_value(&holiday)?),
        None,
    )
    .await?;

    tx.commit().await?;
    Ok(())
}
