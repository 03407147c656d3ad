//! Task queue API server (producer side).

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use taskqueue::database;
use taskqueue::logging::init_logging;
use taskqueue::storage::PgStore;
use taskqueue::web::{self, AppState};
use taskqueue::ServerConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_logging();

    if let Err(e) = run().await {
        error!(error = %e, "server exiting on startup failure");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run() -> taskqueue::Result<()> {
    let config = ServerConfig::from_env()?;

    info!(port = config.port, "starting task queue API server");

    let pool = database::connect(&config.database).await?;
    database::run_migrations(&pool, "migrations").await?;
    info!("migrations applied");

    let store = Arc::new(PgStore::new(pool.clone()));
    let state = AppState::new(store, Some(pool));
    let app = web::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(|e| {
            taskqueue::QueueError::ConfigurationError(format!(
                "failed to bind port {}: {e}",
                config.port
            ))
        })?;

    info!(port = config.port, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| taskqueue::QueueError::ConfigurationError(format!("server error: {e}")))?;

    info!("API server exited gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
