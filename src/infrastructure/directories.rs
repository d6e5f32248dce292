use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{CompanyProfile, EmployeeProfile};

/// External read interface for employee schedule/timezone/hire-date (spec.md §2).
/// Injected as a trait object rather than looked up through a global, per
/// REDESIGN FLAGS "Global mutable directories".
#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn get(&self, company_id: Uuid, employee_id: Uuid) -> anyhow::Result<Option<EmployeeProfile>>;
}

#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    async fn get(&self, company_id: Uuid) -> anyhow::Result<Option<CompanyProfile>>;
    async fn holidays(&self, company_id: Uuid, year: i32) -> anyhow::Result<Vec<NaiveDate>>;
}

pub fn build_directories(
    pool: sqlx::PgPool,
) -> (Arc<dyn EmployeeDirectory>, Arc<dyn CompanyDirectory>) {
    (
        Arc::new(DbEmployeeDirectory { pool: pool.clone() }),
        Arc::new(DbCompanyDirectory { pool }),
    )
}

pub struct DbEmployeeDirectory {
    pool: sqlx::PgPool,
}

#[async_trait]
impl EmployeeDirectory for DbEmployeeDirectory {
    async fn get(&self, company_id: Uuid, employee_id: Uuid) -> anyhow::Result<Option<EmployeeProfile>> {
        let row = sqlx::query(
            "SELECT id, company_id, workday_minutes, timezone, hire_date \
             FROM employees WHERE id = $1 AND company_id = $2",
        )
        .bind(employee_id)
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        use sqlx::Row;
        Ok(Some(EmployeeProfile {
            id: row.try_get("id")?,
            company_id: row.try_get("company_id")?,
            workday_minutes: row.try_get::<Option<i32>, _>("workday_minutes")?.unwrap_or(480),
            timezone: row
                .try_get::<Option<String>, _>("timezone")?
                .unwrap_or_else(|| "UTC".to_string()),
            hire_date: row.try_get("hire_date")?,
        }))
    }
}

pub struct DbCompanyDirectory {
    pool: sqlx::PgPool,
}

#[async_trait]
impl CompanyDirectory for DbCompanyDirectory {
    async fn get(&self, company_id: Uuid) -> anyhow::Result<Option<CompanyProfile>> {
        let row = sqlx::query(
            "SELECT id, name, timezone, default_workday_minutes FROM companies WHERE id = $1",
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        use sqlx::Row;
        Ok(Some(CompanyProfile {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            timezone: row.try_get("timezone")?,
            default_workday_minutes: row.try_get("default_workday_minutes")?,
        }))
    }

    async fn holidays(&self, company_id: Uuid, year: i32) -> anyhow::Result<Vec<NaiveDate>> {
        let rows = sqlx::query("SELECT date FROM company_holidays WHERE company_id = $1 AND date >= $2 AND date < $3")
            .bind(company_id)
            .bind(NaiveDate::from_ymd_opt(year, 1, 1).expect("valid date"))
            .bind(NaiveDate::from_ymd_opt(year + 1, 1, 1).expect("valid date"))
            .fetch_all(&self.pool)
            .await?;

        use sqlx::Row;
        rows.into_iter()
            .map(|row| row.try_get::<NaiveDate, _>("date").map_err(Into::into))
            .collect()
    }
}

/// In-memory double for tests, mirroring the teacher's `MemoryStorage`.
#[derive(Default)]
pub struct MemoryEmployeeDirectory {
    employees: RwLock<HashMap<(Uuid, Uuid), EmployeeProfile>>,
}

impl MemoryEmployeeDirectory {
    pub async fn insert(&self, profile: EmployeeProfile) {
        self.employees
            .write()
            .await
            .insert((profile.company_id, profile.id), profile);
    }
}

#[async_trait]
impl EmployeeDirectory for MemoryEmployeeDirectory {
    async fn get(&self, company_id: Uuid, employee_id: Uuid) -> anyhow::Result<Option<EmployeeProfile>> {
        Ok(self
            .employees
            .read()
            .await
            .get(&(company_id, employee_id))
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryCompanyDirectory {
    companies: RwLock<HashMap<Uuid, CompanyProfile>>,
    holidays: RwLock<HashMap<Uuid, Vec<NaiveDate>>>,
}

impl MemoryCompanyDirectory {
    pub async fn insert(&self, profile: CompanyProfile) {
        self.companies.write().await.insert(profile.id, profile);
    }

    pub async fn add_holiday(&self, company_id: Uuid, date: NaiveDate) {
        self.holidays.write().await.entry(company_id).or_default().push(date);
    }
}

#[async_trait]
impl CompanyDirectory for MemoryCompanyDirectory {
    async fn get(&self, company_id: Uuid) -> anyhow::Result<Option<CompanyProfile>> {
        Ok(self.companies.read().await.get(&company_id).cloned())
    }

    async fn holidays(&self, company_id: Uuid, year: i32) -> anyhow::Result<Vec<NaiveDate>> {
        Ok(self
            .holidays
            .read()
            .await
            .get(&company_id)
            .map(|dates| dates.iter().filter(|d| d.year() == year).cloned().collect())
            .unwrap_or_default())
    }
}
