//! SQLite database module
//!
//! One file holds both the financial records and the durable upload queue.
//! Connections come from an r2d2 pool and are held only for the duration of
//! a single operation, so API handlers, workers and the stall monitor share
//! the pool without holding connections across awaits.

pub mod models;
pub mod financial;
pub mod jobs;
mod migrations;

use crate::error::Result;
pub use jobs::{NewJob, StalledJob};
use models::*;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

type SqlitePool = Pool<SqliteConnectionManager>;

/// SQLite database wrapper
pub struct SqliteDb {
    pool: SqlitePool,
}

impl SqliteDb {
    /// Open (or create) the database at `path` with a pool of `pool_size` connections
    pub fn new(path: &Path, pool_size: u32) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            // WAL lets readers proceed while a worker holds the write lock
            conn.execute_batch(
                "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
            )
        });

        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(Duration::from_secs(10))
            .build(manager)?;

        let db = Self { pool };

        // Run migrations
        db.run_migrations()?;

        tracing::info!("SQLite database ready at {:?} (pool size {})", path, pool_size);
        Ok(db)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        migrations::run_migrations(&conn)
    }

    // ========== Financial Record Methods ==========

    /// Insert one record; `AppError::Conflict` if its identity exists
    pub fn insert_record(&self, record: &NewFinancialRecord) -> Result<FinancialRecord> {
        let conn = self.conn()?;
        financial::insert_record(&conn, record)
    }

    /// Insert a batch in one transaction
    pub fn insert_records(&self, records: &[NewFinancialRecord]) -> Result<Vec<FinancialRecord>> {
        let mut conn = self.conn()?;
        financial::insert_records(&mut conn, records)
    }

    /// Get a record by identity
    pub fn get_record(
        &self,
        company_id: &str,
        reporting_period: &str,
    ) -> Result<Option<FinancialRecord>> {
        let conn = self.conn()?;
        financial::get_record(&conn, company_id, reporting_period)
    }

    /// Find records matching a filter
    pub fn find_records(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FinancialRecord>> {
        let conn = self.conn()?;
        financial::find_records(&conn, filter, limit, offset)
    }

    /// Count records matching a filter
    pub fn count_records(&self, filter: &RecordFilter) -> Result<i64> {
        let conn = self.conn()?;
        financial::count_records(&conn, filter)
    }

    // ========== Upload Job Methods ==========

    /// Enqueue jobs atomically
    pub fn enqueue_jobs(&self, jobs: &[NewJob], max_attempts: u32, now_ms: i64) -> Result<Vec<i64>> {
        let mut conn = self.conn()?;
        jobs::enqueue_jobs(&mut conn, jobs, max_attempts, now_ms)
    }

    /// Claim the next ready job
    pub fn claim_next_job(&self, now_ms: i64, lock_token: &str) -> Result<Option<UploadJob>> {
        let mut conn = self.conn()?;
        jobs::claim_next(&mut conn, now_ms, lock_token)
    }

    /// Complete an active job
    pub fn complete_job(&self, id: i64, lock_token: &str, result: &str, now_ms: i64) -> Result<bool> {
        let conn = self.conn()?;
        jobs::complete_job(&conn, id, lock_token, result, now_ms)
    }

    /// Reschedule an active job for another attempt
    pub fn reschedule_job(
        &self,
        id: i64,
        lock_token: &str,
        error: &str,
        available_at_ms: i64,
    ) -> Result<bool> {
        let conn = self.conn()?;
        jobs::reschedule_job(&conn, id, lock_token, error, available_at_ms)
    }

    /// Terminally fail an active job
    pub fn fail_job(&self, id: i64, lock_token: &str, error: &str, now_ms: i64) -> Result<bool> {
        let conn = self.conn()?;
        jobs::fail_job(&conn, id, lock_token, error, now_ms)
    }

    /// Recover jobs whose lock is older than `cutoff_ms`
    pub fn recover_stalled_jobs(&self, cutoff_ms: i64, now_ms: i64) -> Result<Vec<StalledJob>> {
        let mut conn = self.conn()?;
        jobs::recover_stalled(&mut conn, cutoff_ms, now_ms)
    }

    /// Get a job by id
    pub fn get_job(&self, id: i64) -> Result<Option<UploadJob>> {
        let conn = self.conn()?;
        jobs::get_job(&conn, id)
    }

    /// Count jobs per state
    pub fn job_counts(&self) -> Result<QueueCounts> {
        let conn = self.conn()?;
        jobs::count_by_state(&conn)
    }
}
