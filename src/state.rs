//! Application state management

use crate::cache::ResultCache;
use crate::config::AppConfig;
use crate::db::sqlite::SqliteDb;
use crate::db::RecordStore;
use crate::queue::{IngestionQueue, JobMetrics, ListenerSet, LoggingListener};
use std::sync::Arc;

/// State shared by handlers, services and workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// SQLite database holding records and the job queue
    pub sqlite: Arc<SqliteDb>,

    /// Record storage used for reads and direct inserts
    pub store: Arc<dyn RecordStore>,

    pub queue: Arc<IngestionQueue>,

    /// Result cache for risk assessments
    pub cache: Arc<dyn ResultCache>,

    /// Job lifecycle counters
    pub metrics: Arc<JobMetrics>,
}

impl AppState {
    /// Wire the queue with logging and metrics listeners
    pub fn new(config: AppConfig, sqlite: Arc<SqliteDb>, cache: Arc<dyn ResultCache>) -> Self {
        let metrics = Arc::new(JobMetrics::new());
        let listeners = ListenerSet::new()
            .with(Arc::new(LoggingListener))
            .with(metrics.clone());
        let queue = Arc::new(IngestionQueue::new(
            sqlite.clone(),
            config.queue.clone(),
            Arc::new(listeners),
        ));

        Self {
            config: Arc::new(config),
            store: sqlite.clone(),
            sqlite,
            queue,
            cache,
            metrics,
        }
    }
}
