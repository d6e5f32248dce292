use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::infrastructure::state::AppState;
use crate::services::{accrual, carryover};

/// Spawns the daily worker loop (spec.md §4.13): once every
/// `worker.interval_secs`, resolves "today" and runs the time-based accrual
/// engine, the carryover engine, and the expiration engine in that order,
/// each in its own database transaction. Unrecoverable errors are logged
/// and the loop continues rather than exiting (spec.md §5, "Failure policy").
pub fn spawn_worker(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !state.config.worker.enabled {
            info!("worker loop disabled by configuration");
            return;
        }

        let interval = state.config.worker_interval();
        loop {
            run_once(&state).await;
            tokio::time::sleep(interval).await;
        }
    })
}

async fn run_once(state: &Arc<AppState>) {
    let today = Utc::now().date_naive();

    match accrual::run_time_based_accruals(&state.pool, &state.employees, today, None).await {
        Ok(result) => info!(?result, "time-based accrual run completed"),
        Err(err) => error!(error = %err, "time-based accrual run failed"),
    }

    match carryover::run_carryover(&state.pool, today, None).await {
        Ok(result) => info!(?result, "carryover run completed"),
        Err(err) => error!(error = %err, "carryover run failed"),
    }

    match carryover::run_expiration(&state.pool, today, None).await {
        Ok(result) => info!(?result, "expiration run completed"),
        Err(err) => error!(error = %err, "expiration run failed"),
    }
}
