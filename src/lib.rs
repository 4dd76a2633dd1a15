//! finrisk - Financial Data Ingestion and Risk Assessment Service
//!
//! Accepts batches of company financial records, persists them through a
//! durable background queue, and serves paginated risk assessments with
//! derived ratios from a TTL cache.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod queue;
pub mod services;
pub mod state;
pub mod worker;

use api::ApiServer;
use cache::{spawn_sweeper, MemoryCache};
use config::AppConfig;
use db::sqlite::SqliteDb;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use worker::WorkerPool;

/// Run the service until Ctrl-C
pub async fn run() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _log_guard = logging::init_logging(config.log_dir.as_deref())?;
    for warning in &config.warnings {
        tracing::warn!("{}", warning);
    }

    tracing::info!(
        role = ?config.role,
        database = ?config.database_path,
        "Starting finrisk..."
    );

    let sqlite = Arc::new(SqliteDb::new(&config.database_path, config.db_pool_size)?);
    let cache = Arc::new(MemoryCache::new());
    let state = AppState::new(config.clone(), sqlite, cache.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = config.role.runs_workers().then(|| {
        WorkerPool::start(
            state.queue.clone(),
            state.store.clone(),
            &config.worker,
            shutdown_rx.clone(),
        )
    });

    let mut server = ApiServer::new();
    let sweeper = if config.role.runs_api() {
        server.start(&config.server, state.clone()).await?;
        let every = config.cache.ttl.max(Duration::from_secs(1));
        Some(spawn_sweeper(cache, every, shutdown_rx.clone()))
    } else {
        None
    };

    tracing::info!("Application state initialized");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    server.stop().await;
    let _ = shutdown_tx.send(true);

    if let Some(pool) = pool {
        pool.join().await;
    }
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }

    tracing::info!("finrisk stopped");
    Ok(())
}
