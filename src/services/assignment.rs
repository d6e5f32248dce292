use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::models::{Assignment, AuditAction};
use crate::services::audit::write_audit_log;
use crate::services::errors::ServiceError;

async fn verify_policy_exists(pool: &PgPool, company_id: Uuid, policy_id: Uuid) -> Result<(), ServiceError> {
    let exists: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM policies WHERE id = $1 AND company_id = $2")
            .bind(policy_id)
            .bind(company_id)
            .fetch_optional(pool)
            .await?;

    if exists.is_none() {
        return Err(ServiceError::NotFound);
    }
    Ok(())
}

async fn check_overlap(
    pool: &PgPool,
    company_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
    effective_from: NaiveDate,
    effective_to: Option<NaiveDate>,
) -> Result<(), ServiceError> {
    let overlapping: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM assignments \
         WHERE company_id = $1 AND employee_id = $2 AND policy_id = $3 \
            AND (effective_to IS NULL OR effective_to > $4) \
            AND ($5::date IS NULL OR effective_from < $5) \
         LIMIT 1",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(policy_id)
    .bind(effective_from)
    .bind(effective_to)
    .fetch_optional(pool)
    .await?;

    if overlapping.is_some() {
        return Err(ServiceError::Conflict(
            "assignment overlaps with an existing assignment for this employee and policy".to_string(),
        ));
    }
    Ok(())
}

pub struct CreateAssignment {
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

/// Links an employee to a policy over `[from,to)`; detects overlap
/// (spec.md §4.3, I6).
pub async fn create_assignment(
    pool: &PgPool,
    company_id: Uuid,
    actor_id: Uuid,
    payload: CreateAssignment,
) -> Result<Assignment, ServiceError> {
    verify_policy_exists(pool, company_id, payload.policy_id).await?;
    check_overlap(
        pool,
        company_id,
        payload.employee_id,
        payload.policy_id,
        payload.effective_from,
        payload.effective_to,
    )
    .await?;

    let mut tx = pool.begin().await?;

    let assignment = sqlx::query_as::<_, Assignment>(
        "INSERT INTO assignments (id, company_id, employee_id, policy_id, effective_from, effective_to, created_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(company_id)
    .bind(payload.employee_id)
    .bind(payload.policy_id)
    .bind(payload.effective_from)
    .bind(payload.effective_to)
    .bind(actor_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            ServiceError::Conflict("duplicate assignment".to_string())
        }
        _ => ServiceError::from(err),
    })?;

    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "assignment",
        assignment.id,
        AuditAction::Create,
        None,
        Some(serde_json::to_value(&assignment)?),
    )
    .await?;

    tx.commit().await?;
    Ok(assignment)
}

pub async fn list_assignments_by_policy(
    pool: &PgPool,
    company_id: Uuid,
    policy_id: Uuid,
    offset: i64,
    limit: i64,
) -> Result<(Vec<Assignment>, i64), ServiceError> {
    verify_policy_exists(pool, company_id, policy_id).await?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM assignments WHERE company_id = $1 AND policy_id = $2",
    )
    .bind(company_id)
    .bind(policy_id)
    .fetch_one(pool)
    .await?;

    let assignments = sqlx::query_as::<_, Assignment>(
        "SELECT * FROM assignments WHERE company_id = $1 AND policy_id = $2 \
         ORDER BY effective_from DESC OFFSET $3 LIMIT $4",
    )
    .bind(company_id)
    .bind(policy_id)
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok((assignments, total))
}

pub async fn list_assignments_by_employee(
    pool: &PgPool,
    company_id: Uuid,
    employee_id: Uuid,
    offset: i64,
    limit: i64,
) -> Result<(Vec<Assignment>, i64), ServiceError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM assignments WHERE company_id = $1 AND employee_id = $2",
    )
    .bind(company_id)
    .bind(employee_id)
    .fetch_one(pool)
    .await?;

    let assignments = sqlx::query_as::<_, Assignment>(
        "SELECT * FROM assignments WHERE company_id = $1 AND employee_id = $2 \
         ORDER BY effective_from DESC OFFSET $3 LIMIT $4",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok((assignments, total))
}

/// End-dates an assignment (soft delete). Does not reach into any request
/// submitted while the assignment was active — see DESIGN.md Open Question #2.
pub async fn end_date_assignment(
    pool: &PgPool,
    company_id: Uuid,
    actor_id: Uuid,
    assignment_id: Uuid,
    effective_to: NaiveDate,
) -> Result<Assignment, ServiceError> {
    let mut tx = pool.begin().await?;

    let assignment = sqlx::query_as::<_, Assignment>(
        "SELECT * FROM assignments WHERE id = $1 AND company_id = $2",
    )
    .bind(assignment_id)
    .bind(company_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ServiceError::NotFound)?;

    if assignment.effective_to.is_some() {
        return Err(ServiceError::BusinessRule(
            "assignment is already end-dated".to_string(),
        ));
    }
    if effective_to < assignment.effective_from {
        return Err(ServiceError::BusinessRule(
            "effective_to must be >= effective_from".to_string(),
        ));
    }

    let before = serde_json::to_value(&assignment)?;

    let updated = sqlx::query_as::<_, Assignment>(
        "UPDATE assignments SET effective_to = $1 WHERE id = $2 RETURNING *",
    )
    .bind(effective_to)
    .bind(assignment_id)
    .fetch_one(&mut *tx)
    .await?;

    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "assignment",
        updated.id,
        AuditAction::Update,
        Some(before),
        Some(serde_json::to_value(&updated)?),
    )
    .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Verifies an employee has an active assignment to a policy on `at_date`
/// (half-open interval). Raises `BusinessRule` if none is found.
pub async fn verify_active_assignment(
    pool: &PgPool,
    company_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
    at_date: NaiveDate,
) -> Result<Assignment, ServiceError> {
    sqlx::query_as::<_, Assignment>(
        "SELECT * FROM assignments WHERE company_id = $1 AND employee_id = $2 AND policy_id = $3 \
            AND effective_from <= $4 AND (effective_to IS NULL OR effective_to > $4)",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(policy_id)
    .bind(at_date)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServiceError::BusinessRule("employee is not assigned to this policy on the given date".to_string()))
}
