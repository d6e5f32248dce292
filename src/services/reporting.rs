use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::models::{AuditAction, AuditLog, LedgerEntry};
use crate::services::errors::ServiceError;

/// Paginated, filtered audit-log read (spec.md §4.14). Every tenant-scoped
/// query pins `company_id` — no cross-tenant leakage (spec.md §4.15).
#[derive(Debug, Default)]
pub struct AuditLogFilter {
    pub entity_type: Option<String>,
    pub action: Option<AuditAction>,
    pub actor_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub offset: i64,
    pub limit: i64,
}

pub async fn query_audit_log(
    pool: &PgPool,
    company_id: Uuid,
    filter: AuditLogFilter,
) -> Result<(Vec<AuditLog>, i64), ServiceError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_log WHERE company_id = $1 \
            AND ($2::text IS NULL OR entity_type = $2) \
            AND ($3::text IS NULL OR action = $3) \
            AND ($4::uuid IS NULL OR actor_id = $4) \
            AND ($5::timestamptz IS NULL OR created_at >= $5) \
            AND ($6::timestamptz IS NULL OR created_at <= $6)",
    )
    .bind(company_id)
    .bind(&filter.entity_type)
    .bind(filter.action)
    .bind(filter.actor_id)
    .bind(filter.start_date)
    .bind(filter.end_date)
    .fetch_one(pool)
    .await?;

    let entries = sqlx::query_as::<_, AuditLog>(
        "SELECT * FROM audit_log WHERE company_id = $1 \
            AND ($2::text IS NULL OR entity_type = $2) \
            AND ($3::text IS NULL OR action = $3) \
            AND ($4::uuid IS NULL OR actor_id = $4) \
            AND ($5::timestamptz IS NULL OR created_at >= $5) \
            AND ($6::timestamptz IS NULL OR created_at <= $6) \
         ORDER BY created_at DESC OFFSET $7 LIMIT $8",
    )
    .bind(company_id)
    .bind(&filter.entity_type)
    .bind(filter.action)
    .bind(filter.actor_id)
    .bind(filter.start_date)
    .bind(filter.end_date)
    .bind(filter.offset)
    .bind(filter.limit)
    .fetch_all(pool)
    .await?;

    Ok((entries, total))
}

pub struct CompanyBalanceSummaryRow {
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub policy_key: String,
    pub policy_category: String,
    pub accrued_minutes: i64,
    pub used_minutes: i64,
    pub held_minutes: i64,
    pub available_minutes: Option<i64>,
    pub is_unlimited: bool,
}

/// Company-wide balance summary: every active assignment joined with its
/// current policy version and balance snapshot (spec.md §4.14). Assignments
/// with no materialized snapshot yet default to zeros, matching the
/// lazy-materialization semantics of §4.5 without forcing a snapshot write
/// on a read path.
pub async fn get_company_balance_summary(
    pool: &PgPool,
    company_id: Uuid,
) -> Result<Vec<CompanyBalanceSummaryRow>, ServiceError> {
    let today = Utc::now().date_naive();

    let rows = sqlx::query(
        "SELECT a.employee_id, a.policy_id, p.key AS policy_key, p.category AS policy_category, \
            pv.type AS policy_type, \
            s.accrued_minutes, s.used_minutes, s.held_minutes \
         FROM assignments a \
         JOIN policies p ON p.id = a.policy_id \
         LEFT JOIN policy_versions pv \
            ON pv.policy_id = a.policy_id AND pv.effective_from <= $2 \
            AND (pv.effective_to IS NULL OR pv.effective_to > $2) \
         LEFT JOIN balance_snapshots s \
            ON s.company_id = a.company_id AND s.employee_id = a.employee_id AND s.policy_id = a.policy_id \
         WHERE a.company_id = $1 AND a.effective_from <= $2 \
            AND (a.effective_to IS NULL OR a.effective_to > $2) \
         ORDER BY a.employee_id, a.policy_id",
    )
    .bind(company_id)
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let policy_type: Option<crate::domain::models::PolicyType> = row.try_get("policy_type")?;
        let is_unlimited = matches!(policy_type, Some(crate::domain::models::PolicyType::Unlimited));

        let accrued: i64 = row.try_get::<Option<i64>, _>("accrued_minutes")?.unwrap_or(0);
        let used: i64 = row.try_get::<Option<i64>, _>("used_minutes")?.unwrap_or(0);
        let held: i64 = row.try_get::<Option<i64>, _>("held_minutes")?.unwrap_or(0);
        let available = accrued - used - held;

        items.push(CompanyBalanceSummaryRow {
            employee_id: row.try_get("employee_id")?,
            policy_id: row.try_get("policy_id")?,
            policy_key: row.try_get("policy_key")?,
            policy_category: row.try_get("policy_category")?,
            accrued_minutes: accrued,
            used_minutes: used,
            held_minutes: held,
            available_minutes: if is_unlimited { None } else { Some(available) },
            is_unlimited,
        });
    }

    Ok(items)
}

/// Filtered, paginated ledger export across an entire company (spec.md
/// §4.14), as distinct from [`crate::services::balance::get_employee_ledger`]
/// which is scoped to one employee+policy pair for the balances endpoint.
#[derive(Debug, Default)]
pub struct LedgerExportFilter {
    pub policy_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub offset: i64,
    pub limit: i64,
}

pub async fn export_ledger(
    pool: &PgPool,
    company_id: Uuid,
    filter: LedgerExportFilter,
) -> Result<(Vec<LedgerEntry>, i64), ServiceError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ledger_entries WHERE company_id = $1 \
            AND ($2::uuid IS NULL OR policy_id = $2) \
            AND ($3::uuid IS NULL OR employee_id = $3) \
            AND ($4::timestamptz IS NULL OR effective_at >= $4) \
            AND ($5::timestamptz IS NULL OR effective_at <= $5)",
    )
    .bind(company_id)
    .bind(filter.policy_id)
    .bind(filter.employee_id)
    .bind(filter.start_date)
    .bind(filter.end_date)
    .fetch_one(pool)
    .await?;

    let entries = sqlx::query_as::<_, LedgerEntry>(
        "SELECT * FROM ledger_entries WHERE company_id = $1 \
            AND ($2::uuid IS NULL OR policy_id = $2) \
            AND ($3::uuid IS NULL OR employee_id = $3) \
            AND ($4::timestamptz IS NULL OR effective_at >= $4) \
            AND ($5::timestamptz IS NULL OR effective_at <= $5) \
         ORDER BY effective_at DESC, created_at DESC OFFSET $6 LIMIT $7",
    )
    .bind(company_id)
    .bind(filter.policy_id)
    .bind(filter.employee_id)
    .bind(filter.start_date)
    .bind(filter.end_date)
    .bind(filter.offset)
    .bind(filter.limit)
    .fetch_all(pool)
    .await?;

    Ok((entries, total))
}
