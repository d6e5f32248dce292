use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::models::{AuditAction, LedgerEntryType, LedgerSourceType, Request, RequestStatus};
use crate::infrastructure::directories::{CompanyDirectory, EmployeeDirectory};
use crate::services::assignment::verify_active_assignment;
use crate::services::audit::write_audit_log;
use crate::services::balance::{get_or_create_snapshot_for_update, persist_snapshot, post_ledger_entry, LedgerPost};
use crate::services::duration::{calculate_requested_minutes, RequestTimestamp};
use crate::services::errors::ServiceError;
use crate::services::policy::current_version;

async fn get_request_or_404(pool: &PgPool, company_id: Uuid, request_id: Uuid) -> Result<Request, ServiceError> {
    sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = $1 AND company_id = $2")
        .bind(request_id)
        .bind(company_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound)
}

/// Two `[start_at,end_at)` intervals overlap iff `a.start < b.end AND a.end > b.start`.
/// Only SUBMITTED/APPROVED requests are considered active for this check.
async fn check_request_overlap(
    pool: &PgPool,
    company_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let overlapping: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM requests WHERE company_id = $1 AND employee_id = $2 AND policy_id = $3 \
            AND status IN ('SUBMITTED', 'APPROVED') AND start_at < $4 AND end_at > $5",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(policy_id)
    .bind(end_at)
    .bind(start_at)
    .fetch_optional(pool)
    .await?;

    if overlapping.is_some() {
        return Err(ServiceError::Conflict(
            "request overlaps with an existing submitted or approved request".to_string(),
        ));
    }
    Ok(())
}

pub struct SubmitRequest {
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub start_at: RequestTimestamp,
    pub end_at: RequestTimestamp,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Submits a time-off request, placing a balance HOLD (spec.md §4.7).
#[allow(clippy::too_many_arguments)]
pub async fn submit_request(
    pool: &PgPool,
    employees: &std::sync::Arc<dyn EmployeeDirectory>,
    companies: &std::sync::Arc<dyn CompanyDirectory>,
    company_id: Uuid,
    actor_id: Uuid,
    payload: SubmitRequest,
) -> Result<Request, ServiceError> {
    let today = Utc::now().date_naive();

    verify_active_assignment(pool, company_id, payload.employee_id, payload.policy_id, today).await?;

    let mut tx = pool.begin().await?;
    let version = current_version(&mut tx, payload.policy_id)
        .await?
        .ok_or_else(|| ServiceError::BusinessRule("policy has no active version".to_string()))?;
    tx.commit().await?;

    let duration = calculate_requested_minutes(
        employees,
        companies,
        company_id,
        payload.employee_id,
        payload.start_at,
        payload.end_at,
    )
    .await?;
    let requested_minutes = duration.minutes;
    let start_at = duration.start_at;
    let end_at = duration.end_at;

    check_request_overlap(
        pool,
        company_id,
        payload.employee_id,
        payload.policy_id,
        start_at,
        end_at,
    )
    .await?;

    let settings = version.parsed_settings()?;
    let is_unlimited = settings.is_unlimited();

    let mut tx = pool.begin().await?;

    let mut snapshot =
        get_or_create_snapshot_for_update(&mut tx, company_id, payload.employee_id, payload.policy_id).await?;

    if !is_unlimited {
        let new_available = snapshot.available_minutes - requested_minutes;
        let allow_negative = settings.allow_negative();
        let negative_limit = settings.negative_limit_minutes();

        if !allow_negative && new_available < 0 {
            return Err(ServiceError::BusinessRule("insufficient balance for this request".to_string()));
        }
        if let Some(limit) = negative_limit {
            if allow_negative && new_available < -limit {
                return Err(ServiceError::BusinessRule(format!(
                    "request would exceed negative balance limit of {limit} minutes"
                )));
            }
        }
    }

    let now = Utc::now();
    let request_id = Uuid::new_v4();

    let insert_result = sqlx::query_as::<_, Request>(
        "INSERT INTO requests \
            (id, company_id, employee_id, policy_id, start_at, end_at, requested_minutes, reason, status, submitted_at, idempotency_key) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'SUBMITTED', $9, $10) \
         RETURNING *",
    )
    .bind(request_id)
    .bind(company_id)
    .bind(payload.employee_id)
    .bind(payload.policy_id)
    .bind(start_at)
    .bind(end_at)
    .bind(requested_minutes)
    .bind(&payload.reason)
    .bind(now)
    .bind(&payload.idempotency_key)
    .fetch_one(&mut *tx)
    .await;

    let request = match insert_result {
        Ok(request) => request,
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            tx.rollback().await?;
            if let Some(key) = &payload.idempotency_key {
                if let Some(existing) = sqlx::query_as::<_, Request>(
                    "SELECT * FROM requests WHERE company_id = $1 AND employee_id = $2 AND idempotency_key = $3",
                )
                .bind(company_id)
                .bind(payload.employee_id)
                .bind(key)
                .fetch_optional(pool)
                .await?
                {
                    return Ok(existing);
                }
            }
            return Err(ServiceError::Conflict("duplicate request".to_string()));
        }
        Err(err) => return Err(err.into()),
    };

    post_ledger_entry(
        &mut tx,
        LedgerPost {
            id: Uuid::new_v4(),
            company_id,
            employee_id: payload.employee_id,
            policy_id: payload.policy_id,
            policy_version_id: version.id,
            entry_type: LedgerEntryType::Hold,
            amount_minutes: -requested_minutes,
            effective_at: now,
            source_type: LedgerSourceType::Request,
            source_id: request_id.to_string(),
            metadata: None,
        },
    )
    .await?;

    snapshot.held_minutes += requested_minutes;
    snapshot.recompute_available();
    persist_snapshot(&mut tx, &snapshot).await?;

    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "request",
        request.id,
        AuditAction::Submit,
        None,
        Some(serde_json::to_value(&request)?),
    )
    .await?;

    tx.commit().await?;
    Ok(request)
}

/// Approves a SUBMITTED request: HOLD_RELEASE + USAGE (spec.md §4.7, I4).
pub async fn approve_request(
    pool: &PgPool,
    company_id: Uuid,
    actor_id: Uuid,
    request_id: Uuid,
    note: Option<String>,
) -> Result<Request, ServiceError> {
    let mut tx = pool.begin().await?;

    let request = sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = $1 AND company_id = $2")
        .bind(request_id)
        .bind(company_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound)?;

    if request.status != RequestStatus::Submitted {
        return Err(ServiceError::BusinessRule("only submitted requests can be approved".to_string()));
    }

    let version = current_version(&mut tx, request.policy_id)
        .await?
        .ok_or_else(|| ServiceError::BusinessRule("policy has no active version".to_string()))?;
    let policy_version_id = version.id;

    let mut snapshot =
        get_or_create_snapshot_for_update(&mut tx, company_id, request.employee_id, request.policy_id).await?;

    let before = serde_json::to_value(&request)?;
    let now = Utc::now();

    post_ledger_entry(
        &mut tx,
        LedgerPost {
            id: Uuid::new_v4(),
            company_id,
            employee_id: request.employee_id,
            policy_id: request.policy_id,
            policy_version_id,
            entry_type: LedgerEntryType::HoldRelease,
            amount_minutes: request.requested_minutes,
            effective_at: now,
            source_type: LedgerSourceType::Request,
            source_id: request.id.to_string(),
            metadata: None,
        },
    )
    .await?;

    post_ledger_entry(
        &mut tx,
        LedgerPost {
            id: Uuid::new_v4(),
            company_id,
            employee_id: request.employee_id,
            policy_id: request.policy_id,
            policy_version_id,
            entry_type: LedgerEntryType::Usage,
            amount_minutes: -request.requested_minutes,
            effective_at: now,
            source_type: LedgerSourceType::Request,
            source_id: request.id.to_string(),
            metadata: None,
        },
    )
    .await?;

    snapshot.held_minutes -= request.requested_minutes;
    snapshot.used_minutes += request.requested_minutes;
    snapshot.recompute_available();
    persist_snapshot(&mut tx, &snapshot).await?;

    let updated = sqlx::query_as::<_, Request>(
        "UPDATE requests SET status = 'APPROVED', decided_at = $1, decided_by = $2, decision_note = $3 \
         WHERE id = $4 RETURNING *",
    )
    .bind(now)
    .bind(actor_id)
    .bind(&note)
    .bind(request.id)
    .fetch_one(&mut *tx)
    .await?;

    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "request",
        updated.id,
        AuditAction::Approve,
        Some(before),
        Some(serde_json::to_value(&updated)?),
    )
    .await?;

    tx.commit().await?;
    Ok(updated)
}

async fn release_hold(
    pool: &PgPool,
    company_id: Uuid,
    actor_id: Uuid,
    request_id: Uuid,
    new_status: RequestStatus,
    audit_action: AuditAction,
    note: Option<String>,
) -> Result<Request, ServiceError> {
    let mut tx = pool.begin().await?;

    let request = sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = $1 AND company_id = $2")
        .bind(request_id)
        .bind(company_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound)?;

    let version = current_version(&mut tx, request.policy_id)
        .await?
        .ok_or_else(|| ServiceError::BusinessRule("policy has no active version".to_string()))?;
    let policy_version_id = version.id;

    let mut snapshot =
        get_or_create_snapshot_for_update(&mut tx, company_id, request.employee_id, request.policy_id).await?;

    let before = serde_json::to_value(&request)?;
    let now = Utc::now();

    post_ledger_entry(
        &mut tx,
        LedgerPost {
            id: Uuid::new_v4(),
            company_id,
            employee_id: request.employee_id,
            policy_id: request.policy_id,
            policy_version_id,
            entry_type: LedgerEntryType::HoldRelease,
            amount_minutes: request.requested_minutes,
            effective_at: now,
            source_type: LedgerSourceType::Request,
            source_id: request.id.to_string(),
            metadata: None,
        },
    )
    .await?;

    snapshot.held_minutes -= request.requested_minutes;
    snapshot.recompute_available();
    persist_snapshot(&mut tx, &snapshot).await?;

    let status_str = new_status.as_str_upper();
    let updated = sqlx::query_as::<_, Request>(
        "UPDATE requests SET status = $1, decided_at = $2, decided_by = $3, decision_note = $4 \
         WHERE id = $5 RETURNING *",
    )
    .bind(status_str)
    .bind(now)
    .bind(actor_id)
    .bind(&note)
    .bind(request.id)
    .fetch_one(&mut *tx)
    .await?;

    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "request",
        updated.id,
        audit_action,
        Some(before),
        Some(serde_json::to_value(&updated)?),
    )
    .await?;

    tx.commit().await?;
    Ok(updated)
}

pub async fn deny_request(
    pool: &PgPool,
    company_id: Uuid,
    actor_id: Uuid,
    request_id: Uuid,
    note: Option<String>,
) -> Result<Request, ServiceError> {
    let request = get_request_or_404(pool, company_id, request_id).await?;
    if request.status != RequestStatus::Submitted {
        return Err(ServiceError::BusinessRule("only submitted requests can be denied".to_string()));
    }

    release_hold(pool, company_id, actor_id, request_id, RequestStatus::Denied, AuditAction::Deny, note).await
}

/// The employee who submitted the request or an admin can cancel.
pub async fn cancel_request(
    pool: &PgPool,
    company_id: Uuid,
    actor_id: Uuid,
    actor_is_admin: bool,
    request_id: Uuid,
) -> Result<Request, ServiceError> {
    let request = get_request_or_404(pool, company_id, request_id).await?;
    if request.status != RequestStatus::Submitted {
        return Err(ServiceError::BusinessRule("only submitted requests can be cancelled".to_string()));
    }
    if actor_id != request.employee_id && !actor_is_admin {
        return Err(ServiceError::Forbidden);
    }

    release_hold(pool, company_id, actor_id, request_id, RequestStatus::Cancelled, AuditAction::Cancel, None).await
}

pub async fn get_request(pool: &PgPool, company_id: Uuid, request_id: Uuid) -> Result<Request, ServiceError> {
    get_request_or_404(pool, company_id, request_id).await
}

pub struct ListRequestsFilter {
    pub status: Option<RequestStatus>,
    pub policy_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
    pub offset: i64,
    pub limit: i64,
}

pub async fn list_requests(
    pool: &PgPool,
    company_id: Uuid,
    filter: ListRequestsFilter,
) -> Result<(Vec<Request>, i64), ServiceError> {
    let status_str = filter.status.map(|s| s.as_str_upper());

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM requests WHERE company_id = $1 \
            AND ($2::text IS NULL OR status = $2) \
            AND ($3::uuid IS NULL OR policy_id = $3) \
            AND ($4::uuid IS NULL OR employee_id = $4)",
    )
    .bind(company_id)
    .bind(&status_str)
    .bind(filter.policy_id)
    .bind(filter.employee_id)
    .fetch_one(pool)
    .await?;

    let requests = sqlx::query_as::<_, Request>(
        "SELECT * FROM requests WHERE company_id = $1 \
            AND ($2::text IS NULL OR status = $2) \
            AND ($3::uuid IS NULL OR policy_id = $3) \
            AND ($4::uuid IS NULL OR employee_id = $4) \
         ORDER BY created_at DESC OFFSET $5 LIMIT $6",
    )
    .bind(company_id)
    .bind(&status_str)
    .bind(filter.policy_id)
    .bind(filter.employee_id)
    .bind(filter.offset)
    .bind(filter.limit)
    .fetch_all(pool)
    .await?;

    Ok((requests, total))
}
