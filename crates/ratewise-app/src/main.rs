//! Ratewise binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open SQLite and warm the persisted semantic index
//! 4. Spawn the structured-write retry worker
//! 5. Serve the axum API until Ctrl-C, then stop the worker

mod cli;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;

use ratewise_api::state::AppState;
use ratewise_core::config::RatewiseConfig;
use ratewise_storage::{Database, SemanticRecordRepository};
use ratewise_vector::{HashingEmbedder, SqliteSemanticIndex};

use cli::{expand_home, CliArgs};

async fn shutdown_signal(worker_shutdown: Arc<Notify>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
    tracing::info!("Shutdown requested");
    worker_shutdown.notify_one();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = RatewiseConfig::load_or_default(&config_file);
    args.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Ratewise v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");
    config.validate()?;

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    let db_path = data_dir.join("ratewise.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    // Semantic index, warmed from the persisted records.
    let dimensions = config.embedding.dimensions;
    let index = Arc::new(SqliteSemanticIndex::open(
        Arc::new(SemanticRecordRepository::new(Arc::clone(&db))),
        dimensions,
    )?);
    let embedder = Arc::new(HashingEmbedder::new(dimensions));

    let port = config.general.port;
    let state = AppState::new(config, db, index, embedder);

    // Retry worker.
    let worker = state.retry_worker();
    let worker_shutdown = worker.shutdown_handle();
    let worker_handle = tokio::spawn(worker.run());

    // API server.
    let served = ratewise_api::serve(state, port, shutdown_signal(Arc::clone(&worker_shutdown))).await;
    if let Err(ref e) = served {
        tracing::error!(port, error = %e, "API server failed");
        worker_shutdown.notify_one();
    }

    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Retry worker task failed");
    }
    tracing::info!("Ratewise stopped");
    served.map_err(Into::into)
}
