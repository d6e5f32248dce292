use std::sync::Arc;

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::models::{
    AccrualFrequency, AccrualMethod, AccrualTiming, HoursWorkedAccrualSettings, LedgerEntry,
    LedgerEntryType, LedgerSourceType, PolicyType, Proration, TenureTier, TimeAccrualSettings,
    SYSTEM_ACTOR,
};
use crate::infrastructure::directories::EmployeeDirectory;
use crate::services::audit::write_audit_log;
use crate::services::balance::{get_or_create_snapshot_for_update, persist_snapshot, LedgerPost};
use crate::services::errors::ServiceError;
use crate::services::policy::version_effective_on;

/// Summary of a time-based accrual run (spec.md §4.9).
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct AccrualRunResult {
    pub target_date: NaiveDate,
    pub processed: u32,
    pub accrued: u32,
    pub skipped: u32,
    pub errors: u32,
}

impl AccrualRunResult {
    fn new(target_date: NaiveDate) -> Self {
        Self {
            target_date,
            ..Default::default()
        }
    }
}

/// Summary of a payroll webhook processing (spec.md §4.10).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PayrollProcessingResult {
    pub payroll_run_id: String,
    pub processed: u32,
    pub accrued: u32,
    pub skipped: u32,
    pub errors: u32,
}

impl PayrollProcessingResult {
    fn new(payroll_run_id: String) -> Self {
        Self {
            payroll_run_id,
            processed: 0,
            accrued: 0,
            skipped: 0,
            errors: 0,
        }
    }
}

/// [period_start, period_end) for the frequency containing `target_date`.
fn period_boundaries(frequency: AccrualFrequency, target_date: NaiveDate) -> (NaiveDate, NaiveDate) {
    match frequency {
        AccrualFrequency::Daily => (target_date, target_date + chrono::Duration::days(1)),
        AccrualFrequency::Monthly => {
            let start = target_date.with_day(1).expect("day 1 is always valid");
            let next_month = if start.month() == 12 {
                NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
            }
            .expect("valid month boundary");
            (start, next_month)
        }
        AccrualFrequency::Yearly => {
            let start = NaiveDate::from_ymd_opt(target_date.year(), 1, 1).expect("valid date");
            let end = NaiveDate::from_ymd_opt(target_date.year() + 1, 1, 1).expect("valid date");
            (start, end)
        }
    }
}

fn is_accrual_date(frequency: AccrualFrequency, timing: AccrualTiming, target_date: NaiveDate) -> bool {
    match frequency {
        AccrualFrequency::Daily => true,
        AccrualFrequency::Monthly => match timing {
            AccrualTiming::StartOfPeriod => target_date.day() == 1,
            AccrualTiming::EndOfPeriod => {
                let (_, period_end) = period_boundaries(frequency, target_date);
                target_date + chrono::Duration::days(1) == period_end
            }
        },
        AccrualFrequency::Yearly => match timing {
            AccrualTiming::StartOfPeriod => target_date.month() == 1 && target_date.day() == 1,
            AccrualTiming::EndOfPeriod => target_date.month() == 12 && target_date.day() == 31,
        },
    }
}

/// Resolves the accrual rate for a period, applying the highest matching
/// tenure tier (sorted by `min_months` descending, first match wins) over
/// the policy's base rate.
fn resolve_accrual_rate(
    settings: &TimeAccrualSettings,
    hire_date: Option<NaiveDate>,
    assignment_from: NaiveDate,
    target_date: NaiveDate,
) -> i64 {
    let base_rate = match settings.accrual_frequency {
        AccrualFrequency::Daily => settings.rate_minutes_per_day,
        AccrualFrequency::Monthly => settings.rate_minutes_per_month,
        AccrualFrequency::Yearly => settings.rate_minutes_per_year,
    };
    let Some(base_rate) = base_rate else {
        return 0;
    };

    if settings.tenure_tiers.is_empty() {
        return base_rate;
    }

    let start = hire_date.unwrap_or(assignment_from);
    let months = (target_date.year() - start.year()) * 12 + (target_date.month() as i32 - start.month() as i32);

    let mut tiers: Vec<&TenureTier> = settings.tenure_tiers.iter().collect();
    tiers.sort_by(|a, b| b.min_months.cmp(&a.min_months));
    for tier in tiers {
        if months >= tier.min_months {
            return tier.accrual_rate_minutes;
        }
    }

    base_rate
}

/// Computes the accrual amount for a single period, applying `DAYS_ACTIVE`
/// proration for assignments that start mid-period (spec.md §4.9, I9).
fn compute_accrual_amount(
    settings: &TimeAccrualSettings,
    target_date: NaiveDate,
    assignment_effective_from: NaiveDate,
    hire_date: Option<NaiveDate>,
) -> i64 {
    let rate = resolve_accrual_rate(settings, hire_date, assignment_effective_from, target_date);
    if rate <= 0 {
        return 0;
    }

    if settings.proration == Proration::None {
        return rate;
    }

    let (period_start, period_end) = period_boundaries(settings.accrual_frequency, target_date);
    let total_days = (period_end - period_start).num_days();
    if total_days <= 0 {
        return 0;
    }

    let active_start = assignment_effective_from.max(period_start);
    let active_days = (period_end - active_start).num_days();

    if active_days >= total_days {
        return rate;
    }
    if active_days <= 0 {
        return 0;
    }

    (rate * active_days) / total_days
}

/// Clamps `accrual_amount` so `current_accrued + amount` never exceeds
/// `bank_cap_minutes`. Returns 0 when already at or above the cap.
fn apply_bank_cap(current_accrued: i64, accrual_amount: i64, bank_cap_minutes: Option<i64>) -> i64 {
    let Some(cap) = bank_cap_minutes else {
        return accrual_amount;
    };
    let headroom = cap - current_accrued;
    if headroom <= 0 {
        return 0;
    }
    accrual_amount.min(headroom)
}

fn compute_hours_worked_accrual(settings: &HoursWorkedAccrualSettings, worked_minutes: i64) -> i64 {
    (worked_minutes * settings.accrual_ratio.accrue_minutes) / settings.accrual_ratio.per_worked_minutes
}

fn build_time_accrual_source_id(policy_id: Uuid, employee_id: Uuid, target_date: NaiveDate) -> String {
    format!("accrual:{policy_id}:{employee_id}:{target_date}")
}

fn build_payroll_source_id(payroll_run_id: &str, employee_id: Uuid, policy_id: Uuid) -> String {
    format!("payroll:{payroll_run_id}:{employee_id}:{policy_id}")
}

struct AssignmentInfo {
    company_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
    effective_from: NaiveDate,
}

/// Finds every assignment active on `target_date` whose current policy
/// version is a TIME accrual policy, optionally scoped to one company.
async fn find_active_time_assignments(
    pool: &PgPool,
    target_date: NaiveDate,
    company_id: Option<Uuid>,
) -> Result<Vec<AssignmentInfo>, ServiceError> {
    let rows = sqlx::query(
        "SELECT a.company_id, a.employee_id, a.policy_id, a.effective_from \
         FROM assignments a \
         JOIN policy_versions pv ON pv.policy_id = a.policy_id \
         WHERE a.effective_from <= $1 AND (a.effective_to IS NULL OR a.effective_to > $1) \
            AND pv.effective_from <= $1 AND (pv.effective_to IS NULL OR pv.effective_to > $1) \
            AND pv.type = $2 AND pv.accrual_method = $3 \
            AND ($4::uuid IS NULL OR a.company_id = $4)",
    )
    .bind(target_date)
    .bind(PolicyType::Accrual)
    .bind(AccrualMethod::Time)
    .bind(company_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(AssignmentInfo {
                company_id: row.try_get("company_id")?,
                employee_id: row.try_get("employee_id")?,
                policy_id: row.try_get("policy_id")?,
                effective_from: row.try_get("effective_from")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(ServiceError::from)
}

/// Finds active HOURS_WORKED assignments for one employee on `target_date`.
async fn find_hours_worked_assignments(
    pool: &PgPool,
    company_id: Uuid,
    employee_id: Uuid,
    target_date: NaiveDate,
) -> Result<Vec<AssignmentInfo>, ServiceError> {
    let rows = sqlx::query(
        "SELECT a.company_id, a.employee_id, a.policy_id, a.effective_from \
         FROM assignments a \
         JOIN policy_versions pv ON pv.policy_id = a.policy_id \
         WHERE a.company_id = $1 AND a.employee_id = $2 \
            AND a.effective_from <= $3 AND (a.effective_to IS NULL OR a.effective_to > $3) \
            AND pv.effective_from <= $3 AND (pv.effective_to IS NULL OR pv.effective_to > $3) \
            AND pv.type = $4 AND pv.accrual_method = $5",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(target_date)
    .bind(PolicyType::Accrual)
    .bind(AccrualMethod::HoursWorked)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(AssignmentInfo {
                company_id: row.try_get("company_id")?,
                employee_id: row.try_get("employee_id")?,
                policy_id: row.try_get("policy_id")?,
                effective_from: row.try_get("effective_from")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(ServiceError::from)
}

#[allow(clippy::too_many_arguments)]
async fn post_accrual_entry(
    tx: &mut Transaction<'_, Postgres>,
    company_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
    policy_version_id: Uuid,
    amount_minutes: i64,
    bank_cap_minutes: Option<i64>,
    effective_at: chrono::DateTime<Utc>,
    source_type: LedgerSourceType,
    source_id: String,
    metadata: serde_json::Value,
) -> Result<Option<LedgerEntry>, ServiceError> {
    let mut snapshot = get_or_create_snapshot_for_update(tx, company_id, employee_id, policy_id).await?;

    let capped_amount = apply_bank_cap(snapshot.accrued_minutes, amount_minutes, bank_cap_minutes);
    if capped_amount <= 0 {
        return Ok(None);
    }

    let entry_id = Uuid::new_v4();
    let entry = crate::services::balance::post_ledger_entry(
        tx,
        LedgerPost {
            id: entry_id,
            company_id,
            employee_id,
            policy_id,
            policy_version_id,
            entry_type: LedgerEntryType::Accrual,
            amount_minutes: capped_amount,
            effective_at,
            source_type,
            source_id,
            metadata: Some(metadata),
        },
    )
    .await?;

    let Some(entry) = entry else {
        return Ok(None);
    };

    snapshot.accrued_minutes += capped_amount;
    snapshot.recompute_available();
    persist_snapshot(tx, &snapshot).await?;

    write_audit_log(
        tx,
        company_id,
        SYSTEM_ACTOR,
        "accrual",
        entry.id,
        crate::domain::models::AuditAction::Create,
        None,
        Some(serde_json::to_value(&entry)?),
    )
    .await?;

    Ok(Some(entry))
}

/// Runs time-based accruals for every active TIME assignment on
/// `target_date` (spec.md §4.9). Idempotent: a repeated run for the same
/// date posts no duplicate ledger entries. Per-assignment failures are
/// counted and do not abort the run.
pub async fn run_time_based_accruals(
    pool: &PgPool,
    employees: &Arc<dyn EmployeeDirectory>,
    target_date: NaiveDate,
    company_id: Option<Uuid>,
) -> Result<AccrualRunResult, ServiceError> {
    let mut result = AccrualRunResult::new(target_date);
    let assignments = find_active_time_assignments(pool, target_date, company_id).await?;

    for info in assignments {
        result.processed += 1;

        let outcome = process_one_time_accrual(pool, employees, &info, target_date).await;
        match outcome {
            Ok(true) => result.accrued += 1,
            Ok(false) => result.skipped += 1,
            Err(_) => result.errors += 1,
        }
    }

    Ok(result)
}

async fn process_one_time_accrual(
    pool: &PgPool,
    employees: &Arc<dyn EmployeeDirectory>,
    info: &AssignmentInfo,
    target_date: NaiveDate,
) -> Result<bool, ServiceError> {
    let Some(version) = version_effective_on(pool, info.policy_id, target_date).await? else {
        return Ok(false);
    };
    let settings = version.parsed_settings()?;
    let time_settings = match settings.accrual_method() {
        Some(AccrualMethod::Time) => match &settings {
            crate::domain::models::PolicySettings::Accrual(crate::domain::models::AccrualSettings::Time(s)) => {
                s.clone()
            }
            _ => return Ok(false),
        },
        _ => return Ok(false),
    };

    if !is_accrual_date(time_settings.accrual_frequency, time_settings.accrual_timing, target_date) {
        return Ok(false);
    }

    let hire_date = employees
        .get(info.company_id, info.employee_id)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?
        .and_then(|profile| profile.hire_date);

    let amount = compute_accrual_amount(&time_settings, target_date, info.effective_from, hire_date);
    if amount <= 0 {
        return Ok(false);
    }

    let source_id = build_time_accrual_source_id(info.policy_id, info.employee_id, target_date);
    let effective_at = Utc
        .with_ymd_and_hms(target_date.year(), target_date.month(), target_date.day(), 0, 0, 0)
        .single()
        .ok_or_else(|| ServiceError::Internal("invalid target date".to_string()))?;

    let mut tx = pool.begin().await?;
    let entry = post_accrual_entry(
        &mut tx,
        info.company_id,
        info.employee_id,
        info.policy_id,
        version.id,
        amount,
        time_settings.bank_cap_minutes,
        effective_at,
        LedgerSourceType::System,
        source_id,
        serde_json::json!({
            "accrual_frequency": time_settings.accrual_frequency,
            "accrual_timing": time_settings.accrual_timing,
            "computed_amount": amount,
        }),
    )
    .await?;
    tx.commit().await?;

    Ok(entry.is_some())
}

/// One employee's worked-minutes entry within a payroll webhook payload
/// (spec.md §4.10).
pub struct PayrollEmployeeEntry {
    pub employee_id: Uuid,
    pub worked_minutes: i64,
}

pub struct PayrollProcessedPayload {
    pub payroll_run_id: String,
    pub company_id: Uuid,
    pub period_end: NaiveDate,
    pub entries: Vec<PayrollEmployeeEntry>,
}

/// Processes an entire payroll webhook event: for each employee, finds
/// active HOURS_WORKED assignments and posts proportional ACCRUAL entries.
/// Idempotent per `payroll_run_id` (spec.md §4.10, I10).
pub async fn process_payroll_event(
    pool: &PgPool,
    payload: PayrollProcessedPayload,
) -> Result<PayrollProcessingResult, ServiceError> {
    let mut result = PayrollProcessingResult::new(payload.payroll_run_id.clone());

    for employee_entry in &payload.entries {
        let assignments = find_hours_worked_assignments(
            pool,
            payload.company_id,
            employee_entry.employee_id,
            payload.period_end,
        )
        .await?;

        for info in assignments {
            result.processed += 1;

            let outcome = process_one_payroll_accrual(pool, &payload, employee_entry, &info).await;
            match outcome {
                Ok(true) => result.accrued += 1,
                Ok(false) => result.skipped += 1,
                Err(_) => result.errors += 1,
            }
        }
    }

    Ok(result)
}

async fn process_one_payroll_accrual(
    pool: &PgPool,
    payload: &PayrollProcessedPayload,
    employee_entry: &PayrollEmployeeEntry,
    info: &AssignmentInfo,
) -> Result<bool, ServiceError> {
    let Some(version) = version_effective_on(pool, info.policy_id, payload.period_end).await? else {
        return Ok(false);
    };
    let settings = version.parsed_settings()?;
    let hours_settings = match &settings {
        crate::domain::models::PolicySettings::Accrual(crate::domain::models::AccrualSettings::HoursWorked(s)) => {
            s.clone()
        }
        _ => return Ok(false),
    };

    let amount = compute_hours_worked_accrual(&hours_settings, employee_entry.worked_minutes);
    if amount <= 0 {
        return Ok(false);
    }

    let source_id = build_payroll_source_id(&payload.payroll_run_id, employee_entry.employee_id, info.policy_id);
    let effective_at = Utc
        .with_ymd_and_hms(
            payload.period_end.year(),
            payload.period_end.month(),
            payload.period_end.day(),
            0,
            0,
            0,
        )
        .single()
        .ok_or_else(|| ServiceError::Internal("invalid period end date".to_string()))?;

    let mut tx = pool.begin().await?;
    let entry = post_accrual_entry(
        &mut tx,
        payload.company_id,
        employee_entry.employee_id,
        info.policy_id,
        version.id,
        amount,
        hours_settings.bank_cap_minutes,
        effective_at,
        LedgerSourceType::Payroll,
        source_id,
        serde_json::json!({
            "payroll_run_id": payload.payroll_run_id,
            "worked_minutes": employee_entry.worked_minutes,
            "computed_amount": amount,
        }),
    )
    .await?;
    tx.commit().await?;

    Ok(entry.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CarryoverSettings;
    use crate::domain::models::ExpirationSettings;

    fn time_settings(frequency: AccrualFrequency, rate_per_day: Option<i64>) -> TimeAccrualSettings {
        TimeAccrualSettings {
            unit: "minutes".into(),
            accrual_frequency: frequency,
            accrual_timing: AccrualTiming::StartOfPeriod,
            rate_minutes_per_day: rate_per_day,
            rate_minutes_per_month: Some(960),
            rate_minutes_per_year: Some(11_520),
            proration: Proration::DaysActive,
            allow_negative: false,
            negative_limit_minutes: None,
            bank_cap_minutes: None,
            tenure_tiers: vec![],
            carryover: CarryoverSettings::default(),
            expiration: ExpirationSettings::default(),
        }
    }

    #[test]
    fn daily_accrual_date_is_always_true() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert!(is_accrual_date(AccrualFrequency::Daily, AccrualTiming::StartOfPeriod, d));
    }

    #[test]
    fn monthly_start_of_period_only_matches_first_of_month() {
        let first = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let mid = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert!(is_accrual_date(AccrualFrequency::Monthly, AccrualTiming::StartOfPeriod, first));
        assert!(!is_accrual_date(AccrualFrequency::Monthly, AccrualTiming::StartOfPeriod, mid));
    }

    #[test]
    fn monthly_end_of_period_matches_last_day_of_month() {
        let last_day_feb = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        assert!(is_accrual_date(AccrualFrequency::Monthly, AccrualTiming::EndOfPeriod, last_day_feb));
    }

    #[test]
    fn tenure_tier_resolves_highest_matching_tier() {
        let mut settings = time_settings(AccrualFrequency::Monthly, None);
        settings.tenure_tiers = vec![
            TenureTier { min_months: 0, accrual_rate_minutes: 480 },
            TenureTier { min_months: 12, accrual_rate_minutes: 960 },
            TenureTier { min_months: 60, accrual_rate_minutes: 1440 },
        ];
        let hire_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let target = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let rate = resolve_accrual_rate(&settings, Some(hire_date), hire_date, target);
        assert_eq!(rate, 960);
    }

    #[test]
    fn days_active_proration_clips_to_assignment_start() {
        let settings = time_settings(AccrualFrequency::Monthly, None);
        let target = NaiveDate::from_ymd_opt(2026, 4, 15).unwrap();
        let assignment_from = NaiveDate::from_ymd_opt(2026, 4, 21).unwrap();
        let amount = compute_accrual_amount(&settings, target, assignment_from, None);
        assert_eq!(amount, 0);
    }

    #[test]
    fn days_active_proration_full_period_when_assignment_predates_period() {
        let settings = time_settings(AccrualFrequency::Monthly, None);
        let target = NaiveDate::from_ymd_opt(2026, 4, 15).unwrap();
        let assignment_from = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let amount = compute_accrual_amount(&settings, target, assignment_from, None);
        assert_eq!(amount, 960);
    }

    #[test]
    fn bank_cap_clamps_to_remaining_headroom() {
        assert_eq!(apply_bank_cap(9_500, 960, Some(10_000)), 500);
        assert_eq!(apply_bank_cap(10_000, 960, Some(10_000)), 0);
        assert_eq!(apply_bank_cap(9_500, 960, None), 960);
    }

    #[test]
    fn hours_worked_accrual_uses_integer_ratio() {
        let settings = HoursWorkedAccrualSettings {
            unit: "minutes".into(),
            accrual_ratio: crate::domain::models::AccrualRatio {
                accrue_minutes: 1,
                per_worked_minutes: 40,
            },
            allow_negative: false,
            negative_limit_minutes: None,
            bank_cap_minutes: None,
            tenure_tiers: vec![],
            carryover: CarryoverSettings::default(),
            expiration: ExpirationSettings::default(),
        };
        assert_eq!(compute_hours_worked_accrual(&settings, 2_399), 59);
        assert_eq!(compute_hours_worked_accrual(&settings, 2_400), 60);
    }

    #[test]
    fn source_ids_are_deterministic() {
        let policy_id = Uuid::nil();
        let employee_id = Uuid::nil();
        let d = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert_eq!(
            build_time_accrual_source_id(policy_id, employee_id, d),
            format!("accrual:{policy_id}:{employee_id}:2026-03-15")
        );
        assert_eq!(
            build_payroll_source_id("run-7", employee_id, policy_id),
            format!("payroll:run-7:{employee_id}:{policy_id}")
        );
    }
}
