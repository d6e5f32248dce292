use std::net::SocketAddr;
use std::sync::Arc;

use axum::{serve, Extension};
use dotenvy::dotenv;
use timeoff_ledger::{
    api,
    infrastructure::{config::Config, db, directories, state::AppState},
    jobs, telemetry,
};
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    telemetry::init();

    let config = Arc::new(Config::from_env()?);
    let pool = db::connect(&config.database.url, config.database.max_connections).await?;
    db::run_migrations(&pool).await?;
    info!("database migrations completed successfully");

    let (employees, companies) = directories::build_directories(pool.clone());
    let state = Arc::new(AppState::new(Arc::clone(&config), pool, employees, companies));

    let cors = build_cors_layer(&config.app.cors_origins);
    let router = api::build_router()
        .layer(Extension(Arc::clone(&state)))
        .layer(cors);

    let addr: SocketAddr = config.bind_address().parse()?;
    info!(%addr, "starting timeoff ledger api");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let _worker_handle = jobs::spawn_worker(Arc::clone(&state));

    let server = serve(listener, router.into_make_service());

    tokio::select! {
        res = server => {
            if let Err(err) = res {
                warn!(error = ?err, "server exited with error");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let parsed: Vec<_> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
