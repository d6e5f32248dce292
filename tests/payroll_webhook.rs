use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

#[path = "test_harness.rs"]
mod test_harness;

use test_harness::build_app;

#[tokio::test]
async fn replaying_a_payroll_run_posts_no_duplicate_accrual() -> Result<()> {
    test_harness::run_test(run_replay).await
}

/// A payroll-processed webhook credits worked-minute proportional accrual
/// (S4: `accrue_minutes=60, per_worked_minutes=1440, worked_minutes=4800`
/// yields 200 minutes); replaying the identical `payroll_run_id` must not
/// add a second accrual to the snapshot.
async fn run_replay(pool: PgPool) -> Result<()> {
    let app = build_app(pool.clone());
    let company_id = Uuid::new_v4();
    let employee_id = Uuid::new_v4();
    let admin_id = Uuid::new_v4();
    let payroll_run_id = format!("run-{}", Uuid::new_v4());

    sqlx::query("INSERT INTO companies (id, name, timezone, default_workday_minutes) VALUES ($1, $2, $3, $4)")
        .bind(company_id)
        .bind("Acme Corp")
        .bind("UTC")
        .bind(480)
        .execute(&pool)
        .await?;
    sqlx::query("INSERT INTO employees (id, company_id, workday_minutes, timezone) VALUES ($1, $2, $3, $4)")
        .bind(employee_id)
        .bind(company_id)
        .bind(480)
        .bind("UTC")
        .execute(&pool)
        .await?;

    let settings = json!({
        "type": "ACCRUAL",
        "accrual_method": "HOURS_WORKED",
        "unit": "minutes",
        "accrual_ratio": { "accrue_minutes": 60, "per_worked_minutes": 1440 },
        "allow_negative": false,
        "bank_cap_minutes": null,
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
                        "key": "hours-worked-pto",
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
                        "effective_from": "2025-01-01",
                        "effective_to": null,
                    })
                    .to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let webhook_body = json!({
        "payroll_run_id": payroll_run_id,
        "company_id": company_id,
        "period_end": "2025-01-31",
        "entries": [{ "employee_id": employee_id, "worked_minutes": 4_800 }],
    });

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/payroll_processed")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(webhook_body.to_string()))?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let snapshot: (i64, i64, i64) = sqlx::query_as(
        "SELECT accrued_minutes, used_minutes, held_minutes FROM balance_snapshots \
         WHERE company_id = $1 AND employee_id = $2 AND policy_id = $3",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(policy_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(snapshot, (200, 0, 0));

    let ledger_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ledger_entries WHERE company_id = $1 AND employee_id = $2 AND policy_id = $3",
    )
    .bind(company_id)
    .bind(employee_id)
    .bind(policy_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(ledger_count, 1);

    cleanup(&pool, company_id).await?;
    Ok(())
}

async fn cleanup(pool: &PgPool, company_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM audit_log WHERE company_id = $1").bind(company_id).execute(pool).await?;
    sqlx::query("DELETE FROM ledger_entries WHERE company_id = $1").bind(company_id).execute(pool).await?;
    sqlx::query("DELETE FROM balance_snapshots WHERE company_id = $1").bind(company_id).execute(pool).await?;
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
