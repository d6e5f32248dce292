use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Extension,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

#[path = "test_harness.rs"]
mod test_harness;

use test_harness::build_app;

#[tokio::test]
async fn submit_then_approve_moves_hold_to_used() -> Result<()> {
    test_harness::run_test(run_full_cycle).await
}

/// Submitting, then approving a time-off request walks the balance through
/// the HOLD and USAGE legs (S1): an admin grant, a submission that reserves
/// the requested minutes as held, and an approval that converts the hold
/// into usage without moving `available`.
async fn run_full_cycle(pool: PgPool) -> Result<()> {
    let app = build_app(pool.clone());
    let company_id = insert_company(&pool).await?;
    let employee_id = Uuid::new_v4();
    let admin_id = Uuid::new_v4();

    upsert_employee(&app, company_id, admin_id, employee_id, 480, "America/New_York").await?;

    let policy_id = create_time_accrual_policy(
        &app,
        company_id,
        admin_id,
        "pto",
        14_400,
        false,
    )
    .await?;

    create_assignment(&app, company_id, admin_id, policy_id, employee_id, "2025-01-01").await?;

    create_adjustment(&app, company_id, admin_id, employee_id, policy_id, 4_800, "initial grant").await?;

    let balances = fetch_balances(&app, company_id, admin_id, employee_id).await?;
    assert_balance(&balances, policy_id, 4_800, 0, 0);

    let request_id = submit_request(
        &app,
        company_id,
        employee_id,
        employee_id,
        policy_id,
        "2025-01-06T09:00:00",
        "2025-01-06T17:00:00",
    )
    .await?;

    let balances = fetch_balances(&app, company_id, admin_id, employee_id).await?;
    assert_balance(&balances, policy_id, 4_800, 0, 480);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/companies/{company_id}/requests/{request_id}/approve"))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-company-id", company_id.to_string())
                .header("x-user-id", admin_id.to_string())
                .header("x-role", "admin")
                .body(Body::from(json!({}).to_string()))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let balances = fetch_balances(&app, company_id, admin_id, employee_id).await?;
    assert_balance(&balances, policy_id, 4_800, 480, 0);

    cleanup(&pool, company_id).await?;
    Ok(())
}

async fn insert_company(pool: &PgPool) -> Result<Uuid> {
    let company_id = Uuid::new_v4();
    sqlx::query("INSERT INTO companies (id, name, timezone, default_workday_minutes) VALUES ($1, $2, $3, $4)")
        .bind(company_id)
        .bind("Acme Corp")
        .bind("America/New_York")
        .bind(480)
        .execute(pool)
        .await?;
    Ok(company_id)
}

async fn upsert_employee(
    app: &axum::Router,
    company_id: Uuid,
    admin_id: Uuid,
    employee_id: Uuid,
    workday_minutes: i32,
    timezone: &str,
) -> Result<()> {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/companies/{company_id}/employees/{employee_id}"))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-company-id", company_id.to_string())
                .header("x-user-id", admin_id.to_string())
                .header("x-role", "admin")
                .body(Body::from(
                    json!({ "workday_minutes": workday_minutes, "timezone": timezone, "hire_date": null })
                        .to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn create_time_accrual_policy(
    app: &axum::Router,
    company_id: Uuid,
    admin_id: Uuid,
    key: &str,
    bank_cap_minutes: i64,
    allow_negative: bool,
) -> Result<Uuid> {
    let settings = json!({
        "type": "ACCRUAL",
        "accrual_method": "TIME",
        "unit": "minutes",
        "accrual_frequency": "MONTHLY",
        "accrual_timing": "START_OF_PERIOD",
        "rate_minutes_per_month": 480,
        "proration": "DAYS_ACTIVE",
        "allow_negative": allow_negative,
        "bank_cap_minutes": bank_cap_minutes,
        "tenure_tiers": [],
        "carryover": { "enabled": false },
        "expiration": { "enabled": false },
    });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/companies/{company_id}/policies"))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-company-id", company_id.to_string())
                .header("x-user-id", admin_id.to_string())
                .header("x-role", "admin")
                .body(Body::from(
                    json!({
                        "key": key,
                        "category": "pto",
                        "effective_from": "2025-01-01",
                        "settings": settings,
                        "change_reason": "initial",
                    })
                    .to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = to_bytes(response.into_body(), 1024 * 1024).await?;
    let payload: Value = serde_json::from_slice(&body)?;
    let policy_id: Uuid = payload["policy"]["id"].as_str().unwrap().parse()?;
    Ok(policy_id)
}

async fn create_assignment(
    app: &axum::Router,
    company_id: Uuid,
    admin_id: Uuid,
    policy_id: Uuid,
    employee_id: Uuid,
    effective_from: &str,
) -> Result<()> {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/companies/{company_id}/policies/{policy_id}/assignments"))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-company-id", company_id.to_string())
                .header("x-user-id", admin_id.to_string())
                .header("x-role", "admin")
                .body(Body::from(
                    json!({
                        "employee_id": employee_id,
                        "policy_id": policy_id,
                        "effective_from": effective_from,
                        "effective_to": null,
                    })
                    .to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    Ok(())
}

async fn create_adjustment(
    app: &axum::Router,
    company_id: Uuid,
    admin_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
    amount_minutes: i64,
    reason: &str,
) -> Result<()> {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/companies/{company_id}/adjustments"))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-company-id", company_id.to_string())
                .header("x-user-id", admin_id.to_string())
                .header("x-role", "admin")
                .body(Body::from(
                    json!({
                        "employee_id": employee_id,
                        "policy_id": policy_id,
                        "amount_minutes": amount_minutes,
                        "reason": reason,
                    })
                    .to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn submit_request(
    app: &axum::Router,
    company_id: Uuid,
    actor_id: Uuid,
    employee_id: Uuid,
    policy_id: Uuid,
    start_at: &str,
    end_at: &str,
) -> Result<Uuid> {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/companies/{company_id}/requests"))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-company-id", company_id.to_string())
                .header("x-user-id", actor_id.to_string())
                .header("x-role", "employee")
                .body(Body::from(
                    json!({
                        "employee_id": employee_id,
                        "policy_id": policy_id,
                        "start_at": start_at,
                        "end_at": end_at,
                        "reason": null,
                        "idempotency_key": null,
                    })
                    .to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = to_bytes(response.into_body(), 1024 * 1024).await?;
    let payload: Value = serde_json::from_slice(&body)?;
    let request_id: Uuid = payload["id"].as_str().unwrap().parse()?;
    Ok(request_id)
}

async fn fetch_balances(
    app: &axum::Router,
    company_id: Uuid,
    actor_id: Uuid,
    employee_id: Uuid,
) -> Result<Value> {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/api/companies/{company_id}/employees/{employee_id}/balances"))
                .header("x-company-id", company_id.to_string())
                .header("x-user-id", actor_id.to_string())
                .header("x-role", "admin")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), 1024 * 1024).await?;
    Ok(serde_json::from_slice(&body)?)
}

fn assert_balance(balances: &Value, policy_id: Uuid, accrued: i64, used: i64, held: i64) {
    let items = balances["balances"].as_array().expect("balances array");
    let row = items
        .iter()
        .find(|row| row["policy_id"].as_str() == Some(policy_id.to_string().as_str()))
        .expect("balance row for policy");

    assert_eq!(row["accrued_minutes"].as_i64(), Some(accrued));
    assert_eq!(row["used_minutes"].as_i64(), Some(used));
    assert_eq!(row["held_minutes"].as_i64(), Some(held));
    assert_eq!(row["available_minutes"].as_i64(), Some(accrued - used - held));
}

async fn cleanup(pool: &PgPool, company_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM audit_log WHERE company_id = $1").bind(company_id).execute(pool).await?;
    sqlx::query("DELETE FROM ledger_entries WHERE company_id = $1").bind(company_id).execute(pool).await?;
    sqlx::query("DELETE FROM balance_snapshots WHERE company_id = $1").bind(company_id).execute(pool).await?;
    sqlx::query("DELETE FROM requests WHERE company_id = $1").bind(company_id).execute(pool).await?;
    sqlx::query("DELETE FROM assignments WHERE company_id = $1").bind(company_id).execute(pool).await?;
    sqlx::query(
        "DELETE FROM policy_versions WHERE policy_id IN (SELECT id FROM policies WHERE company_id = $1)",
    )
    .bind(company_id)
    .execute(pool)
    .await?;
    sqlx::query("DELETE FROM policies WHERE company_id = $1").bind(company_id).execute(pool).await?;
    sqlx::query("DELETE FROM employees WHERE company_id = $1").bind(company_id).execute(pool).await?;
    sqlx::query("DELETE FROM companies WHERE id = $1").bind(company_id).execute(pool).await?;
    Ok(())
}
