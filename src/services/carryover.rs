use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::models::{
    AuditAction, LedgerEntryType, LedgerSourceType, PolicySettings, PolicyType, SYSTEM_ACTOR,
};
use crate::services::audit::write_audit_log;
use crate::services::balance::{get_or_create_snapshot_for_update, persist_snapshot, LedgerPost};
use crate::services::errors::ServiceError;
use crate::services::policy::version_effective_on;

/// Summary of a carryover or expiration run (spec.md §4.11/§4.12).
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct CarryoverRunResult {
    pub target_date: NaiveDate,
    pub processed: u32,
    pub skipped: u32,
    pub errors: u32,
}

impl CarryoverRunResult {
    fn new(target_date: NaiveDate) -> Self {
        Self {
            target_date,
            ..Default::default()
        }
    }
}

struct AccrualAssignment {
    company_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
}

/// Every active assignment whose current policy version is an ACCRUAL
/// policy (TIME or HOURS_WORKED) — both carryover and expiration only
/// apply to accrual policies.
async fn find_active_accrual_assignments(
    pool: &PgPool,
    target_date: NaiveDate,
    company_id: Option<Uuid>,
) -> Result<Vec<AccrualAssignment>, ServiceError> {
    let rows = sqlx::query(
        "SELECT DISTINCT a.company_id, a.employee_id, a.policy_id \
         FROM assignments a \
         JOIN policy_versions pv ON pv.policy_id = a.policy_id \
         WHERE a.effective_from <= $1 AND (a.effective_to IS NULL OR a.effective_to > $1) \
            AND pv.effective_from <= $1 AND (pv.effective_to IS NULL OR pv.effective_to > $1) \
            AND pv.type = $2 AND pv.accrual_method IS NOT NULL \
            AND ($3::uuid IS NULL OR a.company_id = $3)",
    )
    .bind(target_date)
    .bind(PolicyType::Accrual)
    .bind(company_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(AccrualAssignment {
                company_id: row.try_get("company_id")?,
                employee_id: row.try_get("employee_id")?,
                policy_id: row.try_get("policy_id")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(ServiceError::from)
}

fn midnight_utc(d: NaiveDate) -> Result<chrono::DateTime<Utc>, ServiceError> {
    Utc.with_ymd_and_hms(d.year(), d.month(), d.day(), 0, 0, 0)
        .single()
        .ok_or_else(|| ServiceError::Internal("invalid target date".to_string()))
}

fn carryover_marker_source_id(policy_id: Uuid, employee_id: Uuid, year_processed: i32) -> String {
    format!("carryover_marker:{policy_id}:{employee_id}:{year_processed}")
}

fn carryover_expiration_source_id(policy_id: Uuid, employee_id: Uuid, year_processed: i32) -> String {
    format!("carryover:{policy_id}:{employee_id}:{year_processed}")
}

fn calendar_expiration_source_id(policy_id: Uuid, employee_id: Uuid, target_date: NaiveDate) -> String {
    format!(
        "expiration:{policy_id}:{employee_id}:{}:{:02}-{:02}",
        target_date.year(),
        target_date.month(),
        target_date.day()
    )
}

fn carryover_expiry_source_id(policy_id: Uuid, employee_id: Uuid, carryover_year: i32) -> String {
    format!("carryover_expiry:{policy_id}:{employee_id}:{carryover_year}")
}

/// Runs year-end carryover (spec.md §4.11). A no-op on any date other than
/// Jan 1. For every active accrual assignment with `carryover.enabled`,
/// caps `available` at `cap_minutes` (or carries it whole when uncapped),
/// posts an EXPIRATION for any excess, and always posts a zero-amount
/// CARRYOVER marker that the expiration engine later reads back.
pub async fn run_carryover(
    pool: &PgPool,
    target_date: NaiveDate,
    company_id: Option<Uuid>,
) -> Result<CarryoverRunResult, ServiceError> {
    let mut result = CarryoverRunResult::new(target_date);

    if target_date.month() != 1 || target_date.day() != 1 {
        return Ok(result);
    }

    let year_processed = target_date.year() - 1;
    let assignments = find_active_accrual_assignments(pool, target_date, company_id).await?;

    for assignment in assignments {
        result.processed += 1;
        match process_one_carryover(pool, &assignment, target_date, year_processed).await {
            Ok(true) => {}
            Ok(false) => result.skipped += 1,
            Err(_) => result.errors += 1,
        }
    }

    Ok(result)
}

async fn process_one_carryover(
    pool: &PgPool,
    assignment: &AccrualAssignment,
    target_date: NaiveDate,
    year_processed: i32,
) -> Result<bool, ServiceError> {
    let Some(version) = version_effective_on(pool, assignment.policy_id, target_date).await? else {
        return Ok(false);
    };
    let settings = version.parsed_settings()?;
    let Some(carryover) = settings.carryover().cloned() else {
        return Ok(false);
    };
    if !carryover.enabled {
        return Ok(false);
    }

    let mut tx = pool.begin().await?;
    let mut snapshot = get_or_create_snapshot_for_update(
        &mut tx,
        assignment.company_id,
        assignment.employee_id,
        assignment.policy_id,
    )
    .await?;

    let available = snapshot.accrued_minutes - snapshot.used_minutes - snapshot.held_minutes;
    if available <= 0 {
        tx.commit().await?;
        return Ok(false);
    }

    let carry_amount = match carryover.cap_minutes {
        Some(cap) => available.min(cap),
        None => available,
    };
    let expire_amount = available - carry_amount;
    let effective_at = midnight_utc(target_date)?;

    if expire_amount > 0 {
        post_expiration(
            &mut tx,
            assignment,
            version.id,
            expire_amount,
            effective_at,
            carryover_expiration_source_id(assignment.policy_id, assignment.employee_id, year_processed),
            serde_json::json!({
                "reason": "year_end_carryover_excess",
                "year": year_processed,
                "expired_minutes": expire_amount,
                "cap_minutes": carryover.cap_minutes,
            }),
            &mut snapshot,
        )
        .await?;
    }

    let marker_source_id = carryover_marker_source_id(assignment.policy_id, assignment.employee_id, year_processed);
    let marker = crate::services::balance::post_ledger_entry(
        &mut tx,
        LedgerPost {
            id: Uuid::new_v4(),
            company_id: assignment.company_id,
            employee_id: assignment.employee_id,
            policy_id: assignment.policy_id,
            policy_version_id: version.id,
            entry_type: LedgerEntryType::Carryover,
            amount_minutes: 0,
            effective_at,
            source_type: LedgerSourceType::System,
            source_id: marker_source_id,
            metadata: Some(serde_json::json!({
                "year": year_processed,
                "carried_minutes": carry_amount,
                "expired_minutes": expire_amount,
                "cap_minutes": carryover.cap_minutes,
                "expires_after_days": carryover.expires_after_days,
            })),
        },
    )
    .await?;

    let Some(marker) = marker else {
        // Marker already exists: this assignment's year-end was already
        // processed by an earlier run or a racing worker.
        tx.commit().await?;
        return Ok(false);
    };

    write_audit_log(
        &mut tx,
        assignment.company_id,
        SYSTEM_ACTOR,
        "carryover",
        marker.id,
        AuditAction::Create,
        None,
        Some(serde_json::to_value(&marker)?),
    )
    .await?;

    tx.commit().await?;
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
async fn post_expiration(
    tx: &mut Transaction<'_, Postgres>,
    assignment: &AccrualAssignment,
    policy_version_id: Uuid,
    expire_amount: i64,
    effective_at: chrono::DateTime<Utc>,
    source_id: String,
    metadata: serde_json::Value,
    snapshot: &mut crate::domain::models::BalanceSnapshot,
) -> Result<bool, ServiceError> {
    let entry = crate::services::balance::post_ledger_entry(
        tx,
        LedgerPost {
            id: Uuid::new_v4(),
            company_id: assignment.company_id,
            employee_id: assignment.employee_id,
            policy_id: assignment.policy_id,
            policy_version_id,
            entry_type: LedgerEntryType::Expiration,
            amount_minutes: -expire_amount,
            effective_at,
            source_type: LedgerSourceType::System,
            source_id,
            metadata: Some(metadata),
        },
    )
    .await?;

    let Some(entry) = entry else {
        return Ok(false);
    };

    snapshot.accrued_minutes -= expire_amount;
    snapshot.recompute_available();
    persist_snapshot(tx, snapshot).await?;

    write_audit_log(
        tx,
        assignment.company_id,
        SYSTEM_ACTOR,
        "expiration",
        entry.id,
        AuditAction::Create,
        None,
        Some(serde_json::to_value(&entry)?),
    )
    .await?;

    Ok(true)
}

/// Runs the daily expiration engine (spec.md §4.12): calendar-date
/// expiration and post-carryover expiration are independent clauses that
/// both may fire for the same assignment on the same day.
pub async fn run_expiration(
    pool: &PgPool,
    target_date: NaiveDate,
    company_id: Option<Uuid>,
) -> Result<CarryoverRunResult, ServiceError> {
    let mut result = CarryoverRunResult::new(target_date);
    let assignments = find_active_accrual_assignments(pool, target_date, company_id).await?;

    for assignment in assignments {
        result.processed += 1;
        match process_one_expiration(pool, &assignment, target_date).await {
            Ok(true) => {}
            Ok(false) => result.skipped += 1,
            Err(_) => result.errors += 1,
        }
    }

    Ok(result)
}

async fn process_one_expiration(
    pool: &PgPool,
    assignment: &AccrualAssignment,
    target_date: NaiveDate,
) -> Result<bool, ServiceError> {
    let Some(version) = version_effective_on(pool, assignment.policy_id, target_date).await? else {
        return Ok(false);
    };
    let settings = version.parsed_settings()?;

    let mut any_posted = false;

    if calendar_expiration_applies(&settings, target_date) {
        if process_calendar_expiration(pool, assignment, version.id, target_date).await? {
            any_posted = true;
        }
    }

    if let Some(carryover) = settings.carryover() {
        if carryover.enabled {
            if let Some(expires_after_days) = carryover.expires_after_days {
                let jan_first = NaiveDate::from_ymd_opt(target_date.year(), 1, 1)
                    .ok_or_else(|| ServiceError::Internal("invalid year".to_string()))?;
                let expiry_date = jan_first + chrono::Duration::days(expires_after_days);
                if target_date == expiry_date {
                    let carryover_year = target_date.year() - 1;
                    if process_carryover_expiration(pool, assignment, version.id, target_date, carryover_year).await? {
                        any_posted = true;
                    }
                }
            }
        }
    }

    Ok(any_posted)
}

fn calendar_expiration_applies(settings: &PolicySettings, target_date: NaiveDate) -> bool {
    let Some(expiration) = settings.expiration() else {
        return false;
    };
    expiration.enabled
        && expiration.expires_on_month == Some(target_date.month())
        && expiration.expires_on_day == Some(target_date.day())
}

async fn process_calendar_expiration(
    pool: &PgPool,
    assignment: &AccrualAssignment,
    policy_version_id: Uuid,
    target_date: NaiveDate,
) -> Result<bool, ServiceError> {
    let mut tx = pool.begin().await?;
    let mut snapshot = get_or_create_snapshot_for_update(
        &mut tx,
        assignment.company_id,
        assignment.employee_id,
        assignment.policy_id,
    )
    .await?;

    let available = snapshot.accrued_minutes - snapshot.used_minutes - snapshot.held_minutes;
    if available <= 0 {
        tx.commit().await?;
        return Ok(false);
    }

    let effective_at = midnight_utc(target_date)?;
    let posted = post_expiration(
        &mut tx,
        assignment,
        policy_version_id,
        available,
        effective_at,
        calendar_expiration_source_id(assignment.policy_id, assignment.employee_id, target_date),
        serde_json::json!({
            "reason": "calendar_date_expiration",
            "expired_minutes": available,
            "expires_on": format!("{:02}-{:02}", target_date.month(), target_date.day()),
        }),
        &mut snapshot,
    )
    .await?;

    tx.commit().await?;
    Ok(posted)
}

async fn process_carryover_expiration(
    pool: &PgPool,
    assignment: &AccrualAssignment,
    policy_version_id: Uuid,
    target_date: NaiveDate,
    carryover_year: i32,
) -> Result<bool, ServiceError> {
    let marker_source_id = carryover_marker_source_id(assignment.policy_id, assignment.employee_id, carryover_year);

    let marker_metadata: Option<serde_json::Value> = sqlx::query_scalar(
        "SELECT metadata FROM ledger_entries WHERE source_type = 'SYSTEM' AND source_id = $1 AND entry_type = 'CARRYOVER'",
    )
    .bind(&marker_source_id)
    .fetch_optional(pool)
    .await?;

    let Some(metadata) = marker_metadata else {
        return Ok(false);
    };

    let carried_minutes = metadata
        .get("carried_minutes")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if carried_minutes <= 0 {
        return Ok(false);
    }

    let mut tx = pool.begin().await?;
    let mut snapshot = get_or_create_snapshot_for_update(
        &mut tx,
        assignment.company_id,
        assignment.employee_id,
        assignment.policy_id,
    )
    .await?;

    let available = snapshot.accrued_minutes - snapshot.used_minutes - snapshot.held_minutes;
    let expire_amount = carried_minutes.min(available.max(0));
    if expire_amount <= 0 {
        tx.commit().await?;
        return Ok(false);
    }

    let effective_at = midnight_utc(target_date)?;
    let posted = post_expiration(
        &mut tx,
        assignment,
        policy_version_id,
        expire_amount,
        effective_at,
        carryover_expiry_source_id(assignment.policy_id, assignment.employee_id, carryover_year),
        serde_json::json!({
            "reason": "carryover_expiration",
            "carryover_year": carryover_year,
            "carried_minutes": carried_minutes,
            "expired_minutes": expire_amount,
        }),
        &mut snapshot,
    )
    .await?;

    tx.commit().await?;
    Ok(posted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AccrualFrequency, AccrualSettings, AccrualTiming, CarryoverSettings, ExpirationSettings,
        Proration, TimeAccrualSettings,
    };

    fn time_settings(carryover: CarryoverSettings, expiration: ExpirationSettings) -> PolicySettings {
        PolicySettings::Accrual(AccrualSettings::Time(TimeAccrualSettings {
            unit: "minutes".into(),
            accrual_frequency: AccrualFrequency::Daily,
            accrual_timing: AccrualTiming::StartOfPeriod,
            rate_minutes_per_day: Some(40),
            rate_minutes_per_month: None,
            rate_minutes_per_year: None,
            proration: Proration::None,
            allow_negative: false,
            negative_limit_minutes: None,
            bank_cap_minutes: None,
            tenure_tiers: vec![],
            carryover,
            expiration,
        }))
    }

    #[test]
    fn calendar_expiration_matches_only_configured_month_and_day() {
        let settings = time_settings(
            CarryoverSettings::default(),
            ExpirationSettings {
                enabled: true,
                expires_after_days: None,
                expires_on_month: Some(4),
                expires_on_day: Some(1),
            },
        );
        let matches = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let not_matches = NaiveDate::from_ymd_opt(2026, 4, 2).unwrap();
        assert!(calendar_expiration_applies(&settings, matches));
        assert!(!calendar_expiration_applies(&settings, not_matches));
    }

    #[test]
    fn calendar_expiration_disabled_never_applies() {
        let settings = time_settings(
            CarryoverSettings::default(),
            ExpirationSettings {
                enabled: false,
                expires_after_days: None,
                expires_on_month: Some(4),
                expires_on_day: Some(1),
            },
        );
        let d = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        assert!(!calendar_expiration_applies(&settings, d));
    }

    #[test]
    fn source_ids_are_deterministic() {
        let policy_id = Uuid::nil();
        let employee_id = Uuid::nil();
        assert_eq!(
            carryover_marker_source_id(policy_id, employee_id, 2025),
            format!("carryover_marker:{policy_id}:{employee_id}:2025")
        );
        assert_eq!(
            carryover_expiration_source_id(policy_id, employee_id, 2025),
            format!("carryover:{policy_id}:{employee_id}:2025")
        );
        let d = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        assert_eq!(
            calendar_expiration_source_id(policy_id, employee_id, d),
            format!("expiration:{policy_id}:{employee_id}:2026:04-01")
        );
        assert_eq!(
            carryover_expiry_source_id(policy_id, employee_id, 2025),
            format!("carryover_expiry:{policy_id}:{employee_id}:2025")
        );
    }
}
