use axum::{
    routing::{delete, get, post, put},
    Router,
};

pub mod accruals;
pub mod adjustments;
pub mod assignments;
pub mod audit;
pub mod balances;
pub mod employees;
pub mod health;
pub mod holidays;
pub mod policies;
pub mod reports;
pub mod requests;
pub mod webhooks;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::healthcheck))
        .nest("/companies/{company_id}", company_router())
        .route("/webhooks/payroll_processed", post(webhooks::payroll_processed))
}

fn company_router() -> Router {
    Router::new()
        .route("/policies", get(policies::list_policies).post(policies::create_policy))
        .route(
            "/policies/{policy_id}",
            get(policies::get_policy).put(policies::update_policy),
        )
        .route("/policies/{policy_id}/versions", get(policies::list_versions))
        .route(
            "/policies/{policy_id}/assignments",
            get(assignments::list_by_policy).post(assignments::create_assignment),
        )
        .route(
            "/employees/{employee_id}/assignments",
            get(assignments::list_by_employee),
        )
        .route("/assignments/{assignment_id}", delete(assignments::end_date_assignment))
        .route("/employees/{employee_id}/balances", get(balances::get_balances))
        .route("/employees/{employee_id}/ledger", get(balances::get_ledger))
        .route(
            "/employees/{employee_id}",
            put(employees::upsert_employee).get(employees::get_employee),
        )
        .route("/adjustments", post(adjustments::create_adjustment))
        .route("/requests", get(requests::list_requests).post(requests::submit_request))
        .route("/requests/{request_id}", get(requests::get_request))
        .route("/requests/{request_id}/approve", post(requests::approve_request))
        .route("/requests/{request_id}/deny", post(requests::deny_request))
        .route("/requests/{request_id}/cancel", post(requests::cancel_request))
        .route("/accruals/trigger", post(accruals::trigger))
        .route("/holidays", get(holidays::list_holidays).post(holidays::create_holiday))
        .route("/holidays/{holiday_id}", delete(holidays::delete_holiday))
        .route("/audit-log", get(audit::query_audit_log))
        .route("/reports/balances", get(reports::balances_summary))
        .route("/reports/ledger", get(reports::ledger_export))
}
