use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::models::{
    AuditAction, BalanceSnapshot, LedgerEntry, LedgerEntryType, LedgerSourceType, PolicyType,
};
use crate::services::audit::write_audit_log;
use crate::services::errors::ServiceError;
use crate::services::policy::current_version;

/// Recomputes (accrued, used, held) from ledger history (spec.md I2). Used
/// the first time a snapshot is materialized for a company/employee/policy.
pub async fn compute_balance_from_ledger(
    tx: &mut Transaction<'_, Postgres>,
    company_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
) -> Result<(i64, i64, i64), ServiceError> {
    let row = sqlx::query(
        "SELECT \
            COALESCE(SUM(CASE WHEN entry_type IN ('ACCRUAL','ADJUSTMENT','CARRYOVER','EXPIRATION') \
                THEN amount_minutes ELSE 0 END), 0) AS accrued, \
            COALESCE(SUM(CASE WHEN entry_type = 'USAGE' THEN ABS(amount_minutes) ELSE 0 END), 0) AS used, \
            COALESCE(SUM(CASE WHEN entry_type = 'HOLD' THEN ABS(amount_minutes) \
                WHEN entry_type = 'HOLD_RELEASE' THEN -ABS(amount_minutes) ELSE 0 END), 0) AS held \
         FROM ledger_entries WHERE company_id = $1 AND employee_id = $2 AND policy_id = $3",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(policy_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok((row.try_get("accrued")?, row.try_get("used")?, row.try_get("held")?))
}

/// Locks the snapshot row for the duration of the caller's transaction,
/// lazily materializing it from ledger history on first touch (spec.md §4.6).
pub async fn get_or_create_snapshot_for_update(
    tx: &mut Transaction<'_, Postgres>,
    company_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
) -> Result<BalanceSnapshot, ServiceError> {
    let existing = sqlx::query_as::<_, BalanceSnapshot>(
        "SELECT * FROM balance_snapshots WHERE company_id = $1 AND employee_id = $2 AND policy_id = $3 \
         FOR UPDATE",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(policy_id)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(snapshot) = existing {
        return Ok(snapshot);
    }

    let (accrued, used, held) =
        compute_balance_from_ledger(tx, company_id, employee_id, policy_id).await?;

    let snapshot = sqlx::query_as::<_, BalanceSnapshot>(
        "INSERT INTO balance_snapshots \
            (company_id, employee_id, policy_id, accrued_minutes, used_minutes, held_minutes, available_minutes, version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 1) \
         RETURNING *",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(policy_id)
    .bind(accrued)
    .bind(used)
    .bind(held)
    .bind(accrued - used - held)
    .fetch_one(&mut **tx)
    .await?;

    Ok(snapshot)
}

/// Writes the new snapshot values and bumps the optimistic version counter.
/// Callers mutate the in-memory snapshot's fields, call
/// [`BalanceSnapshot::recompute_available`], then persist with this.
pub async fn persist_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    snapshot: &BalanceSnapshot,
) -> Result<(), ServiceError> {
    sqlx::query(
        "UPDATE balance_snapshots SET accrued_minutes = $1, used_minutes = $2, held_minutes = $3, \
            available_minutes = $4, updated_at = now(), version = version + 1 \
         WHERE company_id = $5 AND employee_id = $6 AND policy_id = $7",
    )
    .bind(snapshot.accrued_minutes)
    .bind(snapshot.used_minutes)
    .bind(snapshot.held_minutes)
    .bind(snapshot.available_minutes)
    .bind(snapshot.company_id)
    .bind(snapshot.employee_id)
    .bind(snapshot.policy_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub struct LedgerPost {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub policy_version_id: Uuid,
    pub entry_type: LedgerEntryType,
    pub amount_minutes: i64,
    pub effective_at: DateTime<Utc>,
    pub source_type: LedgerSourceType,
    pub source_id: String,
    pub metadata: Option<serde_json::Value>,
}

/// Inserts a ledger entry guarded by the `(source_type, source_id,
/// entry_type)` unique constraint, under a nested savepoint so a duplicate
/// only rolls back this insert, not the whole transaction (spec.md §5, I3).
/// Returns `Ok(None)` when the entry already exists — the idempotent-replay
/// case, not an error.
pub async fn post_ledger_entry(
    tx: &mut Transaction<'_, Postgres>,
    post: LedgerPost,
) -> Result<Option<LedgerEntry>, ServiceError> {
    let mut savepoint = tx.begin().await?;

    let result = sqlx::query_as::<_, LedgerEntry>(
        "INSERT INTO ledger_entries \
            (id, company_id, employee_id, policy_id, policy_version_id, entry_type, amount_minutes, \
             effective_at, source_type, source_id, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(post.id)
    .bind(post.company_id)
    .bind(post.employee_id)
    .bind(post.policy_id)
    .bind(post.policy_version_id)
    .bind(post.entry_type)
    .bind(post.amount_minutes)
    .bind(post.effective_at)
    .bind(post.source_type)
    .bind(&post.source_id)
    .bind(&post.metadata)
    .fetch_one(&mut *savepoint)
    .await;

    match result {
        Ok(entry) => {
            savepoint.commit().await?;
            Ok(Some(entry))
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            savepoint.rollback().await?;
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

pub struct BalanceView {
    pub policy_id: Uuid,
    pub policy_key: String,
    pub policy_category: String,
    pub accrued_minutes: i64,
    pub used_minutes: i64,
    pub held_minutes: i64,
    pub available_minutes: Option<i64>,
    pub is_unlimited: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Reads every active-assignment policy balance for an employee today,
/// preferring the materialized snapshot and falling back to a ledger
/// recomputation when a snapshot has never been created (spec.md §4.14).
pub async fn get_employee_balances(
    pool: &PgPool,
    company_id: Uuid,
    employee_id: Uuid,
) -> Result<Vec<BalanceView>, ServiceError> {
    let today = Utc::now().date_naive();

    let rows = sqlx::query(
        "SELECT a.policy_id, p.key AS policy_key, p.category AS policy_category, \
            pv.type AS policy_type, \
            s.accrued_minutes, s.used_minutes, s.held_minutes, s.available_minutes, s.updated_at \
         FROM assignments a \
         JOIN policies p ON p.id = a.policy_id \
         LEFT JOIN policy_versions pv ON pv.policy_id = a.policy_id AND pv.effective_to IS NULL \
         LEFT JOIN balance_snapshots s \
            ON s.company_id = a.company_id AND s.employee_id = a.employee_id AND s.policy_id = a.policy_id \
         WHERE a.company_id = $1 AND a.employee_id = $2 \
            AND a.effective_from <= $3 AND (a.effective_to IS NULL OR a.effective_to > $3) \
         ORDER BY a.effective_from",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut views = Vec::with_capacity(rows.len());
    for row in rows {
        let policy_id: Uuid = row.try_get("policy_id")?;
        let policy_type: Option<PolicyType> = row.try_get("policy_type")?;
        let is_unlimited = matches!(policy_type, Some(PolicyType::Unlimited));

        let accrued: Option<i64> = row.try_get("accrued_minutes")?;
        let (accrued, used, held, available, updated_at) = match accrued {
            Some(accrued) => (
                accrued,
                row.try_get::<i64, _>("used_minutes")?,
                row.try_get::<i64, _>("held_minutes")?,
                row.try_get::<i64, _>("available_minutes")?,
                row.try_get::<Option<DateTime<Utc>>, _>("updated_at")?,
            ),
            None => {
                let mut tx = pool.begin().await?;
                let (accrued, used, held) =
                    compute_balance_from_ledger(&mut tx, company_id, employee_id, policy_id).await?;
                tx.commit().await?;
                (accrued, used, held, accrued - used - held, None)
            }
        };

        views.push(BalanceView {
            policy_id,
            policy_key: row.try_get("policy_key")?,
            policy_category: row.try_get("policy_category")?,
            accrued_minutes: accrued,
            used_minutes: used,
            held_minutes: held,
            available_minutes: if is_unlimited { None } else { Some(available) },
            is_unlimited,
            updated_at,
        });
    }

    Ok(views)
}

/// Paginated, most-recent-first ledger read for an employee+policy.
pub async fn get_employee_ledger(
    pool: &PgPool,
    company_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
    offset: i64,
    limit: i64,
) -> Result<(Vec<LedgerEntry>, i64), ServiceError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ledger_entries WHERE company_id = $1 AND employee_id = $2 AND policy_id = $3",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(policy_id)
    .fetch_one(pool)
    .await?;

    let entries = sqlx::query_as::<_, LedgerEntry>(
        "SELECT * FROM ledger_entries WHERE company_id = $1 AND employee_id = $2 AND policy_id = $3 \
         ORDER BY effective_at DESC, created_at DESC OFFSET $4 LIMIT $5",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(policy_id)
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok((entries, total))
}

pub struct CreateAdjustment {
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub amount_minutes: i64,
    pub reason: String,
}

/// Admin-authored balance correction (spec.md §4.8). Locks the snapshot,
/// enforces the negative-balance rules of the policy's current version
/// unless it is unlimited, posts a self-referential-id ADJUSTMENT entry, and
/// audits the mutation — all inside the caller-managed transaction.
pub async fn create_adjustment(
    tx: &mut Transaction<'_, Postgres>,
    company_id: Uuid,
    actor_id: Uuid,
    payload: CreateAdjustment,
) -> Result<LedgerEntry, ServiceError> {
    let version = current_version(tx, payload.policy_id)
        .await?
        .ok_or_else(|| ServiceError::BusinessRule("policy has no active version".to_string()))?;
    let settings = version.parsed_settings()?;
    let is_unlimited = settings.is_unlimited();

    let mut snapshot =
        get_or_create_snapshot_for_update(tx, company_id, payload.employee_id, payload.policy_id).await?;

    if !is_unlimited && payload.amount_minutes < 0 {
        let new_available = snapshot.available_minutes + payload.amount_minutes;
        let allow_negative = settings.allow_negative();
        let negative_limit = settings.negative_limit_minutes();

        if !allow_negative && new_available < 0 {
            return Err(ServiceError::BusinessRule(
                "insufficient balance for this adjustment".to_string(),
            ));
        }
        if let Some(limit) = negative_limit {
            if allow_negative && new_available < -limit {
                return Err(ServiceError::BusinessRule(format!(
                    "adjustment would exceed negative balance limit of {limit} minutes"
                )));
            }
        }
    }

    let entry_id = Uuid::new_v4();
    let metadata = serde_json::json!({ "reason": payload.reason, "adjusted_by": actor_id.to_string() });

    let entry = post_ledger_entry(
        tx,
        LedgerPost {
            id: entry_id,
            company_id,
            employee_id: payload.employee_id,
            policy_id: payload.policy_id,
            policy_version_id: version.id,
            entry_type: LedgerEntryType::Adjustment,
            amount_minutes: payload.amount_minutes,
            effective_at: Utc::now(),
            source_type: LedgerSourceType::Admin,
            source_id: entry_id.to_string(),
            metadata: Some(metadata),
        },
    )
    .await?
    .ok_or_else(|| ServiceError::Internal("adjustment id collision".to_string()))?;

    snapshot.accrued_minutes += payload.amount_minutes;
    snapshot.recompute_available();
    persist_snapshot(tx, &snapshot).await?;

    write_audit_log(
        tx,
        company_id,
        actor_id,
        "adjustment",
        entry.id,
        AuditAction::Create,
        None,
        Some(serde_json::to_value(&entry)?),
    )
    .await?;

    Ok(entry)
}
