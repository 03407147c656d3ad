//! Task queue worker (consumer side).

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use taskqueue::database;
use taskqueue::logging::init_logging;
use taskqueue::registry::HandlerRegistry;
use taskqueue::storage::PgStore;
use taskqueue::worker::handlers::{RunQueryHandler, SendEmailHandler};
use taskqueue::worker::{Worker, WorkerOptions};
use taskqueue::WorkerConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_logging();

    if let Err(e) = run().await {
        error!(error = %e, "worker exiting on startup failure");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run() -> taskqueue::Result<()> {
    let config = WorkerConfig::from_env()?;

    info!("starting task queue worker");

    let pool = database::connect(&config.database).await?;
    let store = Arc::new(PgStore::new(pool));

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Arc::new(SendEmailHandler::new()))?;
    registry.register(Arc::new(RunQueryHandler::new()))?;
    info!(handlers = ?registry.registered_types(), "registered task handlers");

    let worker = Arc::new(Worker::new(store, registry, WorkerOptions::from(&config)));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    worker.run(shutdown).await;

    info!("worker stopped gracefully");
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
