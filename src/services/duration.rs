use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::infrastructure::directories::{CompanyDirectory, EmployeeDirectory};
use crate::services::errors::ServiceError;

const DEFAULT_WORKDAY_MINUTES: i64 = 480;
const DEFAULT_TIMEZONE: &str = "UTC";
const WORK_START_HOUR: u32 = 9;
const WORK_START_MINUTE: u32 = 0;

/// A request boundary as received over the wire: either a timezone-aware
/// instant, or a bare local datetime string with no offset. Frontends send
/// the latter for time-off requests (spec.md §4.4 step 2) — the string is
/// interpreted as wall-clock time in the employee's own timezone, not UTC.
#[derive(Debug, Clone, Copy)]
pub enum RequestTimestamp {
    Aware(DateTime<Utc>),
    Naive(NaiveDateTime),
}

impl<'de> Deserialize<'de> for RequestTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TimestampVisitor;

        impl Visitor<'_> for TimestampVisitor {
            type Value = RequestTimestamp;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an RFC3339 datetime or a naive local datetime string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if let Ok(aware) = DateTime::parse_from_rfc3339(value) {
                    return Ok(RequestTimestamp::Aware(aware.with_timezone(&Utc)));
                }
                for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
                    if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
                        return Ok(RequestTimestamp::Naive(naive));
                    }
                }
                Err(de::Error::custom(format!("unrecognized datetime: {value}")))
            }
        }

        deserializer.deserialize_str(TimestampVisitor)
    }
}

/// Resolved duration result: the working-minute total plus the canonical
/// UTC instants the request row and overlap checks should persist/compare.
pub struct RequestedDuration {
    pub minutes: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

/// Maps `[start_at, end_at)` to working minutes using the employee's
/// schedule, timezone, and company holidays (spec.md §4.4).
pub async fn calculate_requested_minutes(
    employees: &Arc<dyn EmployeeDirectory>,
    companies: &Arc<dyn CompanyDirectory>,
    company_id: Uuid,
    employee_id: Uuid,
    start_at: RequestTimestamp,
    end_at: RequestTimestamp,
) -> Result<RequestedDuration, ServiceError> {
    let employee = employees
        .get(company_id, employee_id)
        .await
        .map_err(|err| ServiceError::Internal(err.to_string()))?;

    let workday_minutes = employee
        .as_ref()
        .map(|e| e.workday_minutes as i64)
        .unwrap_or(DEFAULT_WORKDAY_MINUTES);
    let tz_name = employee
        .as_ref()
        .map(|e| e.timezone.clone())
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
    let tz: Tz = tz_name
        .parse()
        .map_err(|_| ServiceError::Validation(format!("unknown timezone: {tz_name}")))?;

    let local_start = localize(start_at, &tz)?;
    let local_end = localize(end_at, &tz)?;

    if local_end <= local_start {
        return Err(ServiceError::Validation("end_at must be after start_at".to_string()));
    }

    let start_date = local_start.date_naive();
    let end_date = local_end.date_naive();

    let holiday_dates: Vec<NaiveDate> = if let Ok(first_year_holidays) = companies
        .holidays(company_id, start_date.year())
        .await
    {
        let mut holidays = first_year_holidays;
        if end_date.year() != start_date.year() {
            if let Ok(more) = companies.holidays(company_id, end_date.year()).await {
                holidays.extend(more);
            }
        }
        holidays
    } else {
        Vec::new()
    };

    let mut total_minutes: i64 = 0;
    let mut current_date = start_date;
    let one_day = Duration::days(1);

    while current_date <= end_date {
        if current_date.weekday() == Weekday::Sat || current_date.weekday() == Weekday::Sun {
            current_date += one_day;
            continue;
        }

        if holiday_dates.contains(&current_date) {
            current_date += one_day;
            continue;
        }

        total_minutes += compute_day_minutes(current_date, local_start, local_end, workday_minutes, &tz);
        current_date += one_day;
    }

    if total_minutes <= 0 {
        return Err(ServiceError::BusinessRule(
            "request covers no working time after excluding weekends and holidays".to_string(),
        ));
    }

    Ok(RequestedDuration {
        minutes: total_minutes,
        start_at: local_start.with_timezone(&Utc),
        end_at: local_end.with_timezone(&Utc),
    })
}

/// Resolves a wire timestamp to an instant in the employee's timezone.
/// An aware instant is simply re-expressed in that zone; a naive one is
/// interpreted as wall-clock time already in that zone (spec.md §4.4 step 2).
fn localize(ts: RequestTimestamp, tz: &Tz) -> Result<DateTime<Tz>, ServiceError> {
    match ts {
        RequestTimestamp::Aware(dt) => Ok(dt.with_timezone(tz)),
        RequestTimestamp::Naive(naive) => tz
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| ServiceError::Validation("ambiguous or nonexistent local datetime".to_string())),
    }
}

fn compute_day_minutes(
    current_date: NaiveDate,
    local_start: DateTime<Tz>,
    local_end: DateTime<Tz>,
    workday_minutes: i64,
    tz: &Tz,
) -> i64 {
    let work_start_time = NaiveTime::from_hms_opt(WORK_START_HOUR, WORK_START_MINUTE, 0)
        .expect("valid constant time");
    let naive_work_start = current_date.and_time(work_start_time);
    let day_work_start = match tz.from_local_datetime(&naive_work_start).single() {
        Some(dt) => dt,
        None => return 0,
    };
    let day_work_end = day_work_start + Duration::minutes(workday_minutes);

    let overlap_start = local_start.max(day_work_start);
    let overlap_end = local_end.min(day_work_end);

    if overlap_start >= overlap_end {
        return 0;
    }

    (overlap_end - overlap_start).num_seconds() / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::EmployeeProfile;
    use crate::infrastructure::directories::{MemoryCompanyDirectory, MemoryEmployeeDirectory};
    use chrono::TimeZone as _;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
    }

    #[tokio::test]
    async fn full_workday_with_defaults_yields_480_minutes() {
        let employees: Arc<dyn EmployeeDirectory> = Arc::new(MemoryEmployeeDirectory::default());
        let companies: Arc<dyn CompanyDirectory> = Arc::new(MemoryCompanyDirectory::default());
        let company_id = Uuid::new_v4();
        let employee_id = Uuid::new_v4();

        // Monday 09:00 to Monday 17:00 UTC: a full default workday.
        let start = utc(2025, 6, 2, 9, 0);
        let end = utc(2025, 6, 2, 17, 0);

        let duration = calculate_requested_minutes(
            &employees, &companies, company_id, employee_id,
            RequestTimestamp::Aware(start), RequestTimestamp::Aware(end),
        )
        .await
        .unwrap();

        assert_eq!(duration.minutes, 480);
    }

    #[tokio::test]
    async fn weekend_is_excluded() {
        let employees: Arc<dyn EmployeeDirectory> = Arc::new(MemoryEmployeeDirectory::default());
        let companies: Arc<dyn CompanyDirectory> = Arc::new(MemoryCompanyDirectory::default());
        let company_id = Uuid::new_v4();
        let employee_id = Uuid::new_v4();

        // Saturday full day.
        let start = utc(2025, 6, 7, 0, 0);
        let end = utc(2025, 6, 7, 23, 59);

        let result = calculate_requested_minutes(
            &employees, &companies, company_id, employee_id,
            RequestTimestamp::Aware(start), RequestTimestamp::Aware(end),
        )
        .await;

        assert!(matches!(result, Err(ServiceError::BusinessRule(_))));
    }

    #[tokio::test]
    async fn holiday_is_excluded() {
        let employees: Arc<dyn EmployeeDirectory> = Arc::new(MemoryEmployeeDirectory::default());
        let companies = Arc::new(MemoryCompanyDirectory::default());
        let company_id = Uuid::new_v4();
        let employee_id = Uuid::new_v4();

        companies
            .add_holiday(company_id, NaiveDate::from_ymd_opt(2025, 7, 4).unwrap())
            .await;
        let companies: Arc<dyn CompanyDirectory> = companies;

        let start = utc(2025, 7, 4, 0, 0);
        let end = utc(2025, 7, 4, 23, 59);

        let result = calculate_requested_minutes(
            &employees, &companies, company_id, employee_id,
            RequestTimestamp::Aware(start), RequestTimestamp::Aware(end),
        )
        .await;

        assert!(matches!(result, Err(ServiceError::BusinessRule(_))));
    }

    #[tokio::test]
    async fn partial_overlap_is_clipped_to_workday_window() {
        let employees = Arc::new(MemoryEmployeeDirectory::default());
        employees
            .insert(EmployeeProfile {
                id: Uuid::nil(),
                company_id: Uuid::nil(),
                workday_minutes: 480,
                timezone: "UTC".to_string(),
                hire_date: None,
            })
            .await;
        let employees: Arc<dyn EmployeeDirectory> = employees;
        let companies: Arc<dyn CompanyDirectory> = Arc::new(MemoryCompanyDirectory::default());

        // Starts at 07:00, two hours before the 09:00 workday window opens.
        let start = utc(2025, 6, 2, 7, 0);
        let end = utc(2025, 6, 2, 11, 0);

        let duration = calculate_requested_minutes(
            &employees, &companies, Uuid::nil(), Uuid::nil(),
            RequestTimestamp::Aware(start), RequestTimestamp::Aware(end),
        )
        .await
        .unwrap();

        assert_eq!(duration.minutes, 120);
    }

    #[tokio::test]
    async fn multi_day_span_excludes_weekend_and_holiday() {
        let employees = Arc::new(MemoryEmployeeDirectory::default());
        let employee_id = Uuid::new_v4();
        employees
            .insert(EmployeeProfile {
                id: employee_id,
                company_id: Uuid::nil(),
                workday_minutes: 480,
                timezone: "America/New_York".to_string(),
                hire_date: None,
            })
            .await;
        let employees: Arc<dyn EmployeeDirectory> = employees;
        let companies = Arc::new(MemoryCompanyDirectory::default());
        companies
            .add_holiday(Uuid::nil(), NaiveDate::from_ymd_opt(2025, 1, 8).unwrap())
            .await;
        let companies: Arc<dyn CompanyDirectory> = companies;

        // Mon Jan 6 through Fri Jan 10, with Wed Jan 8 a holiday and no
        // weekend day in range: 4 working days of 480 minutes each.
        let start = utc(2025, 1, 6, 14, 0); // 09:00 America/New_York (EST, UTC-5)
        let end = utc(2025, 1, 10, 22, 0); // 17:00 America/New_York

        let duration = calculate_requested_minutes(
            &employees,
            &companies,
            Uuid::nil(),
            employee_id,
            RequestTimestamp::Aware(start),
            RequestTimestamp::Aware(end),
        )
        .await
        .unwrap();

        assert_eq!(duration.minutes, 4 * 480);
    }

    #[test]
    fn naive_local_string_deserializes_without_offset() {
        let parsed: RequestTimestamp = serde_json::from_str("\"2025-01-06T09:00:00\"").unwrap();
        assert!(matches!(parsed, RequestTimestamp::Naive(_)));
    }

    #[test]
    fn offset_string_deserializes_as_aware() {
        let parsed: RequestTimestamp = serde_json::from_str("\"2025-01-06T09:00:00-05:00\"").unwrap();
        assert!(matches!(parsed, RequestTimestamp::Aware(_)));
    }

    #[tokio::test]
    async fn naive_local_time_interpreted_in_employee_timezone() {
        let employees = Arc::new(MemoryEmployeeDirectory::default());
        let employee_id = Uuid::new_v4();
        employees
            .insert(EmployeeProfile {
                id: employee_id,
                company_id: Uuid::nil(),
                workday_minutes: 480,
                timezone: "America/New_York".to_string(),
                hire_date: None,
            })
            .await;
        let employees: Arc<dyn EmployeeDirectory> = employees;
        let companies: Arc<dyn CompanyDirectory> = Arc::new(MemoryCompanyDirectory::default());

        // 2025-01-06 is a Monday; 09:00-17:00 naive local time in NY is a
        // full workday regardless of the UTC offset that would apply.
        let start = NaiveDateTime::parse_from_str("2025-01-06T09:00:00", "%Y-%m-%dT%H:%M:%S").unwrap();
        let end = NaiveDateTime::parse_from_str("2025-01-06T17:00:00", "%Y-%m-%dT%H:%M:%S").unwrap();

        let duration = calculate_requested_minutes(
            &employees,
            &companies,
            Uuid::nil(),
            employee_id,
            RequestTimestamp::Naive(start),
            RequestTimestamp::Naive(end),
        )
        .await
        .unwrap();

        assert_eq!(duration.minutes, 480);
    }
}
