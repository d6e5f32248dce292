use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::models::{AccrualMethod, AuditAction, Policy, PolicySettings, PolicyType, PolicyVersion};
use crate::services::audit::write_audit_log;
use crate::services::errors::ServiceError;

pub struct CreatePolicy {
    pub key: String,
    pub category: String,
    pub effective_from: NaiveDate,
    pub settings: PolicySettings,
    pub change_reason: Option<String>,
}

/// Creates a policy with its initial version (version 1, spec.md §4.2).
pub async fn create_policy(
    pool: &PgPool,
    company_id: Uuid,
    actor_id: Uuid,
    payload: CreatePolicy,
) -> Result<(Policy, PolicyVersion), ServiceError> {
    let mut tx = pool.begin().await?;

    let existing: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM policies WHERE company_id = $1 AND key = $2")
            .bind(company_id)
            .bind(&payload.key)
            .fetch_optional(&mut *tx)
            .await?;
    if existing.is_some() {
        return Err(ServiceError::Conflict(
            "policy with this key already exists for this company".to_string(),
        ));
    }

    let policy = sqlx::query_as::<_, Policy>(
        "INSERT INTO policies (id, company_id, key, category) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(company_id)
    .bind(&payload.key)
    .bind(&payload.category)
    .fetch_one(&mut *tx)
    .await?;

    let type_tag = payload.settings.type_tag();
    let accrual_method = payload.settings.accrual_method();
    let settings_json = serde_json::to_value(&payload.settings)?;

    let version = insert_version(
        &mut tx,
        policy.id,
        1,
        payload.effective_from,
        None,
        type_tag,
        accrual_method,
        settings_json,
        actor_id,
        payload.change_reason,
    )
    .await?;

    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "policy",
        policy.id,
        AuditAction::Create,
        None,
        Some(serde_json::to_value(&policy)?),
    )
    .await?;
    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "policy_version",
        version.id,
        AuditAction::Create,
        None,
        Some(serde_json::to_value(&version)?),
    )
    .await?;

    tx.commit().await?;
    Ok((policy, version))
}

pub struct UpdatePolicy {
    pub settings: PolicySettings,
    pub effective_from: NaiveDate,
    pub change_reason: Option<String>,
}

/// Supersedes the current version with a new one (spec.md §4.2): end-dates
/// the current version at `new.effective_from` and inserts `version+1` with
/// `effective_to=NULL`. `effective_from == current.effective_from` is
/// rejected; same-day supersession (`effective_from == current.effective_to`
/// relationship satisfied by equality to the old `effective_from`) is
/// permitted — see DESIGN.md Open Question #3.
pub async fn update_policy(
    pool: &PgPool,
    company_id: Uuid,
    actor_id: Uuid,
    policy_id: Uuid,
    payload: UpdatePolicy,
) -> Result<PolicyVersion, ServiceError> {
    let mut tx = pool.begin().await?;

    let policy_exists: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM policies WHERE id = $1 AND company_id = $2")
            .bind(policy_id)
            .bind(company_id)
            .fetch_optional(&mut *tx)
            .await?;
    if policy_exists.is_none() {
        return Err(ServiceError::NotFound);
    }

    let current = current_version(&mut tx, policy_id)
        .await?
        .ok_or(ServiceError::NotFound)?;

    if payload.effective_from < current.effective_from {
        return Err(ServiceError::BusinessRule(
            "effective_from must be >= current version's effective_from".to_string(),
        ));
    }

    let before = serde_json::to_value(&current)?;

    sqlx::query("UPDATE policy_versions SET effective_to = $1 WHERE id = $2")
        .bind(payload.effective_from)
        .bind(current.id)
        .execute(&mut *tx)
        .await?;

    let type_tag = payload.settings.type_tag();
    let accrual_method = payload.settings.accrual_method();
    let settings_json = serde_json::to_value(&payload.settings)?;

    let new_version = insert_version(
        &mut tx,
        policy_id,
        current.version + 1,
        payload.effective_from,
        None,
        type_tag,
        accrual_method,
        settings_json,
        actor_id,
        payload.change_reason,
    )
    .await?;

    let mut after = current.clone();
    after.effective_to = Some(payload.effective_from);

    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "policy_version",
        current.id,
        AuditAction::Update,
        Some(before),
        Some(serde_json::to_value(&after)?),
    )
    .await?;
    write_audit_log(
        &mut tx,
        company_id,
        actor_id,
        "policy_version",
        new_version.id,
        AuditAction::Create,
        None,
        Some(serde_json::to_value(&new_version)?),
    )
    .await?;

    tx.commit().await?;
    Ok(new_version)
}

#[allow(clippy::too_many_arguments)]
async fn insert_version(
    tx: &mut Transaction<'_, Postgres>,
    policy_id: Uuid,
    version: i32,
    effective_from: NaiveDate,
    effective_to: Option<NaiveDate>,
    type_tag: PolicyType,
    accrual_method: Option<AccrualMethod>,
    settings: serde_json::Value,
    created_by: Uuid,
    change_reason: Option<String>,
) -> Result<PolicyVersion, ServiceError> {
    let row = sqlx::query_as::<_, PolicyVersion>(
        "INSERT INTO policy_versions \
            (id, policy_id, version, effective_from, effective_to, type, accrual_method, settings, created_by, change_reason) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(policy_id)
    .bind(version)
    .bind(effective_from)
    .bind(effective_to)
    .bind(type_tag)
    .bind(accrual_method)
    .bind(settings)
    .bind(created_by)
    .bind(change_reason)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}

/// The version with `effective_to=NULL` (spec.md §4.2 `current_version`).
pub async fn current_version(
    tx: &mut Transaction<'_, Postgres>,
    policy_id: Uuid,
) -> Result<Option<PolicyVersion>, ServiceError> {
    let version = sqlx::query_as::<_, PolicyVersion>(
        "SELECT * FROM policy_versions WHERE policy_id = $1 AND effective_to IS NULL \
         ORDER BY version DESC LIMIT 1",
    )
    .bind(policy_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(version)
}

/// The unique version effective on date `d` (spec.md §4.2
/// `version_effective_on`): `effective_from <= d < COALESCE(effective_to, +inf)`.
pub async fn version_effective_on(
    pool: &PgPool,
    policy_id: Uuid,
    d: NaiveDate,
) -> Result<Option<PolicyVersion>, ServiceError> {
    let version = sqlx::query_as::<_, PolicyVersion>(
        "SELECT * FROM policy_versions WHERE policy_id = $1 AND effective_from <= $2 \
            AND (effective_to IS NULL OR effective_to > $2)",
    )
    .bind(policy_id)
    .bind(d)
    .fetch_optional(pool)
    .await?;

    Ok(version)
}

pub async fn get_policy(
    pool: &PgPool,
    company_id: Uuid,
    policy_id: Uuid,
) -> Result<(Policy, Option<PolicyVersion>), ServiceError> {
    let policy = sqlx::query_as::<_, Policy>("SELECT * FROM policies WHERE id = $1 AND company_id = $2")
        .bind(policy_id)
        .bind(company_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound)?;

    let version = sqlx::query_as::<_, PolicyVersion>(
        "SELECT * FROM policy_versions WHERE policy_id = $1 AND effective_to IS NULL ORDER BY version DESC LIMIT 1",
    )
    .bind(policy_id)
    .fetch_optional(pool)
    .await?;

    Ok((policy, version))
}

pub async fn list_policies(
    pool: &PgPool,
    company_id: Uuid,
    offset: i64,
    limit: i64,
) -> Result<(Vec<(Policy, Option<PolicyVersion>)>, i64), ServiceError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM policies WHERE company_id = $1")
        .bind(company_id)
        .fetch_one(pool)
        .await?;

    let policies = sqlx::query_as::<_, Policy>(
        "SELECT * FROM policies WHERE company_id = $1 ORDER BY created_at OFFSET $2 LIMIT $3",
    )
    .bind(company_id)
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(policies.len());
    for policy in policies {
        let version = sqlx::query_as::<_, PolicyVersion>(
            "SELECT * FROM policy_versions WHERE policy_id = $1 AND effective_to IS NULL ORDER BY version DESC LIMIT 1",
        )
        .bind(policy.id)
        .fetch_optional(pool)
        .await?;
        items.push((policy, version));
    }

    Ok((items, total))
}

/// The full version chain for a policy, oldest first (spec.md §6
/// `GET .../policies/{pid}/versions`).
pub async fn list_versions(
    pool: &PgPool,
    company_id: Uuid,
    policy_id: Uuid,
) -> Result<Vec<PolicyVersion>, ServiceError> {
    verify_policy_exists(pool, company_id, policy_id).await?;

    let versions = sqlx::query_as::<_, PolicyVersion>(
        "SELECT * FROM policy_versions WHERE policy_id = $1 ORDER BY version ASC",
    )
    .bind(policy_id)
    .fetch_all(pool)
    .await?;

    Ok(versions)
}

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_type_tag_has_no_accrual_method() {
        let settings = PolicySettings::Unlimited { unit: "days".into() };
        assert_eq!(settings.type_tag(), PolicyType::Unlimited);
        assert_eq!(settings.accrual_method(), None);
    }
}
