use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

pub const SYSTEM_ACTOR: Uuid = Uuid::nil();

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Role {
    Admin,
    Employee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Employee => "employee",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "employee" => Ok(Role::Employee),
            other => Err(format!("unknown role {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum PolicyType {
    Unlimited,
    Accrual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum AccrualMethod {
    Time,
    HoursWorked,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum AccrualFrequency {
    Daily,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum AccrualTiming {
    StartOfPeriod,
    EndOfPeriod,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum Proration {
    DaysActive,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenureTier {
    pub min_months: i32,
    pub accrual_rate_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CarryoverSettings {
    pub enabled: bool,
    #[serde(default)]
    pub cap_minutes: Option<i64>,
    #[serde(default)]
    pub expires_after_days: Option<i64>,
}

impl Default for CarryoverSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cap_minutes: None,
            expires_after_days: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpirationSettings {
    pub enabled: bool,
    #[serde(default)]
    pub expires_after_days: Option<i64>,
    #[serde(default)]
    pub expires_on_month: Option<u32>,
    #[serde(default)]
    pub expires_on_day: Option<u32>,
}

impl Default for ExpirationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            expires_after_days: None,
            expires_on_month: None,
            expires_on_day: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccrualRatio {
    pub accrue_minutes: i64,
    pub per_worked_minutes: i64,
}

/// Policy settings is a tagged union discriminated by `(type, accrual_method)`.
/// Stored as a structured JSON document so schema evolution needs no migration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PolicySettings {
    #[serde(rename = "UNLIMITED")]
    Unlimited { unit: String },
    #[serde(rename = "ACCRUAL")]
    Accrual(AccrualSettings),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "accrual_method")]
pub enum AccrualSettings {
    #[serde(rename = "TIME")]
    Time(TimeAccrualSettings),
    #[serde(rename = "HOURS_WORKED")]
    HoursWorked(HoursWorkedAccrualSettings),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeAccrualSettings {
    pub unit: String,
    pub accrual_frequency: AccrualFrequency,
    pub accrual_timing: AccrualTiming,
    #[serde(default)]
    pub rate_minutes_per_day: Option<i64>,
    #[serde(default)]
    pub rate_minutes_per_month: Option<i64>,
    #[serde(default)]
    pub rate_minutes_per_year: Option<i64>,
    pub proration: Proration,
    #[serde(default)]
    pub allow_negative: bool,
    #[serde(default)]
    pub negative_limit_minutes: Option<i64>,
    #[serde(default)]
    pub bank_cap_minutes: Option<i64>,
    #[serde(default)]
    pub tenure_tiers: Vec<TenureTier>,
    #[serde(default)]
    pub carryover: CarryoverSettings,
    #[serde(default)]
    pub expiration: ExpirationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoursWorkedAccrualSettings {
    pub unit: String,
    pub accrual_ratio: AccrualRatio,
    #[serde(default)]
    pub allow_negative: bool,
    #[serde(default)]
    pub negative_limit_minutes: Option<i64>,
    #[serde(default)]
    pub bank_cap_minutes: Option<i64>,
    #[serde(default)]
    pub tenure_tiers: Vec<TenureTier>,
    #[serde(default)]
    pub carryover: CarryoverSettings,
    #[serde(default)]
    pub expiration: ExpirationSettings,
}

impl PolicySettings {
    pub fn type_tag(&self) -> PolicyType {
        match self {
            PolicySettings::Unlimited { .. } => PolicyType::Unlimited,
            PolicySettings::Accrual(_) => PolicyType::Accrual,
        }
    }

    pub fn accrual_method(&self) -> Option<AccrualMethod> {
        match self {
            PolicySettings::Unlimited { .. } => None,
            PolicySettings::Accrual(AccrualSettings::Time(_)) => Some(AccrualMethod::Time),
            PolicySettings::Accrual(AccrualSettings::HoursWorked(_)) => {
                Some(AccrualMethod::HoursWorked)
            }
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, PolicySettings::Unlimited { .. })
    }

    pub fn allow_negative(&self) -> bool {
        match self {
            PolicySettings::Unlimited { .. } => true,
            PolicySettings::Accrual(AccrualSettings::Time(s)) => s.allow_negative,
            PolicySettings::Accrual(AccrualSettings::HoursWorked(s)) => s.allow_negative,
        }
    }

    pub fn negative_limit_minutes(&self) -> Option<i64> {
        match self {
            PolicySettings::Unlimited { .. } => None,
            PolicySettings::Accrual(AccrualSettings::Time(s)) => s.negative_limit_minutes,
            PolicySettings::Accrual(AccrualSettings::HoursWorked(s)) => s.negative_limit_minutes,
        }
    }

    pub fn bank_cap_minutes(&self) -> Option<i64> {
        match self {
            PolicySettings::Unlimited { .. } => None,
            PolicySettings::Accrual(AccrualSettings::Time(s)) => s.bank_cap_minutes,
            PolicySettings::Accrual(AccrualSettings::HoursWorked(s)) => s.bank_cap_minutes,
        }
    }

    pub fn carryover(&self) -> Option<&CarryoverSettings> {
        match self {
            PolicySettings::Unlimited { .. } => None,
            PolicySettings::Accrual(AccrualSettings::Time(s)) => Some(&s.carryover),
            PolicySettings::Accrual(AccrualSettings::HoursWorked(s)) => Some(&s.carryover),
        }
    }

    pub fn expiration(&self) -> Option<&ExpirationSettings> {
        match self {
            PolicySettings::Unlimited { .. } => None,
            PolicySettings::Accrual(AccrualSettings::Time(s)) => Some(&s.expiration),
            PolicySettings::Accrual(AccrualSettings::HoursWorked(s)) => Some(&s.expiration),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Policy {
    pub id: Uuid,
    pub company_id: Uuid,
    pub key: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PolicyVersion {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub version: i32,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    #[sqlx(rename = "type")]
    pub type_: PolicyType,
    pub accrual_method: Option<AccrualMethod>,
    pub settings: serde_json::Value,
    pub created_by: Uuid,
    pub change_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PolicyVersion {
    pub fn parsed_settings(&self) -> Result<PolicySettings, serde_json::Error> {
        serde_json::from_value(self.settings.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assignment {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn active_on(&self, d: NaiveDate) -> bool {
        self.effective_from <= d && self.effective_to.map(|to| to > d).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Draft,
    Submitted,
    Approved,
    Denied,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str_upper(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "DRAFT",
            RequestStatus::Submitted => "SUBMITTED",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Denied => "DENIED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Ok(RequestStatus::Draft),
            "SUBMITTED" => Ok(RequestStatus::Submitted),
            "APPROVED" => Ok(RequestStatus::Approved),
            "DENIED" => Ok(RequestStatus::Denied),
            "CANCELLED" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Request {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub requested_minutes: i64,
    pub reason: Option<String>,
    pub status: RequestStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<Uuid>,
    pub decision_note: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum LedgerEntryType {
    Accrual,
    Hold,
    HoldRelease,
    Usage,
    Adjustment,
    Expiration,
    Carryover,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum LedgerSourceType {
    Request,
    Payroll,
    Admin,
    System,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
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
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BalanceSnapshot {
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub policy_id: Uuid,
    pub accrued_minutes: i64,
    pub used_minutes: i64,
    pub held_minutes: i64,
    pub available_minutes: i64,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl BalanceSnapshot {
    pub fn recompute_available(&mut self) {
        self.available_minutes = self.accrued_minutes - self.used_minutes - self.held_minutes;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CompanyHoliday {
    pub id: Uuid,
    pub company_id: Uuid,
    pub date: NaiveDate,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Submit,
    Approve,
    Deny,
    Cancel,
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREATE" => Ok(AuditAction::Create),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            "SUBMIT" => Ok(AuditAction::Submit),
            "APPROVE" => Ok(AuditAction::Approve),
            "DENY" => Ok(AuditAction::Deny),
            "CANCEL" => Ok(AuditAction::Cancel),
            other => Err(format!("unknown audit action {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub company_id: Uuid,
    pub actor_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Employee schedule as returned by the external Employee directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeProfile {
    pub id: Uuid,
    pub company_id: Uuid,
    pub workday_minutes: i32,
    pub timezone: String,
    pub hire_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub id: Uuid,
    pub name: String,
    pub timezone: String,
    pub default_workday_minutes: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip_time_accrual() {
        let settings = PolicySettings::Accrual(AccrualSettings::Time(TimeAccrualSettings {
            unit: "minutes".into(),
            accrual_frequency: AccrualFrequency::Monthly,
            accrual_timing: AccrualTiming::StartOfPeriod,
            rate_minutes_per_day: None,
            rate_minutes_per_month: Some(480),
            rate_minutes_per_year: None,
            proration: Proration::DaysActive,
            allow_negative: false,
            negative_limit_minutes: None,
            bank_cap_minutes: Some(14_400),
            tenure_tiers: Vec::new(),
            carryover: CarryoverSettings::default(),
            expiration: ExpirationSettings::default(),
        }));

        let value = serde_json::to_value(&settings).unwrap();
        let round_tripped: PolicySettings = serde_json::from_value(value).unwrap();
        assert_eq!(settings, round_tripped);
        assert_eq!(round_tripped.type_tag(), PolicyType::Accrual);
        assert_eq!(round_tripped.accrual_method(), Some(AccrualMethod::Time));
    }

    #[test]
    fn unlimited_settings_allow_negative_unconditionally() {
        let settings = PolicySettings::Unlimited {
            unit: "days".into(),
        };
        assert!(settings.is_unlimited());
        assert!(settings.allow_negative());
        assert_eq!(settings.bank_cap_minutes(), None);
    }

    #[test]
    fn assignment_active_on_uses_half_open_interval() {
        let assignment = Assignment {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            employee_id: Uuid::new_v4(),
            policy_id: Uuid::new_v4(),
            effective_from: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            effective_to: Some(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()),
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
        };

        assert!(assignment.active_on(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(assignment.active_on(NaiveDate::from_ymd_opt(2025, 5, 31).unwrap()));
        assert!(!assignment.active_on(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()));
    }
}
