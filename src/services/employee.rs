use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::models::EmployeeProfile;
use crate::services::errors::ServiceError;

pub struct UpsertEmployee {
    pub workday_minutes: i32,
    pub timezone: String,
    pub hire_date: Option<NaiveDate>,
}

/// Writes the minimal employee record the duration calculator and accrual
/// engine read (spec.md §6 "employee stub"). The employee/company surface
/// beyond these fields belongs to another service (SPEC_FULL.md §12).
pub async fn upsert_employee(
    pool: &PgPool,
    company_id: Uuid,
    employee_id: Uuid,
    payload: UpsertEmployee,
) -> Result<EmployeeProfile, ServiceError> {
    let company_exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM companies WHERE id = $1")
        .bind(company_id)
        .fetch_optional(pool)
        .await?;
    if company_exists.is_none() {
        return Err(ServiceError::NotFound);
    }

    sqlx::query(
        "INSERT INTO employees (id, company_id, workday_minutes, timezone, hire_date) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (id) DO UPDATE SET \
            workday_minutes = EXCLUDED.workday_minutes, \
            timezone = EXCLUDED.timezone, \
            hire_date = EXCLUDED.hire_date",
    )
    .bind(employee_id)
    .bind(company_id)
    .bind(payload.workday_minutes)
    .bind(&payload.timezone)
    .bind(payload.hire_date)
    .execute(pool)
    .await?;

    Ok(EmployeeProfile {
        id: employee_id,
        company_id,
        workday_minutes: payload.workday_minutes,
        timezone: payload.timezone,
        hire_date: payload.hire_date,
    })
}

pub async fn get_employee(
    pool: &PgPool,
    company_id: Uuid,
    employee_id: Uuid,
) -> Result<EmployeeProfile, ServiceError> {
    let row = sqlx::query_as::<_, EmployeeRow>(
        "SELECT id, company_id, workday_minutes, timezone, hire_date FROM employees \
         WHERE id = $1 AND company_id = $2",
    )
    .bind(employee_id)
    .bind(company_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ServiceError::NotFound)?;

    Ok(row.into())
}

#[derive(sqlx::FromRow)]
struct EmployeeRow {
    id: Uuid,
    company_id: Uuid,
    workday_minutes: Option<i32>,
    timezone: Option<String>,
    hire_date: Option<NaiveDate>,
}

impl From<EmployeeRow> for EmployeeProfile {
    fn from(row: EmployeeRow) -> Self {
        EmployeeProfile {
            id: row.id,
            company_id: row.company_id,
            workday_minutes: row.workday_minutes.unwrap_or(480),
            timezone: row.timezone.unwrap_or_else(|| "UTC".to_string()),
            hire_date: row.hire_date,
        }
    }
}
