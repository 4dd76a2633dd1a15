//! Ingestion queue
//!
//! Durable FIFO of upload jobs stored next to the financial records. Job
//! state machine:
//!
//! ```text
//! waiting ──dequeue──> active ──┬──> completed
//!    ^                          ├──> waiting (attempt + 1, after backoff)
//!    └──── stalled ─────────────┤
//!                               └──> failed
//! ```
//!
//! Every transition is reported to the configured `JobListener`.

mod events;
mod payload;

pub use events::{
    FailureKind, JobListener, JobMetrics, JobMetricsSnapshot, JobOutcome, ListenerSet,
    LoggingListener,
};
pub use payload::{JobPayload, UploadRecord};

use crate::config::QueueConfig;
use crate::db::sqlite::models::{QueueCounts, UploadJob};
use crate::db::sqlite::{NewJob, SqliteDb, StalledJob};
use crate::error::{AppError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// What happened to a job after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Requeued; becomes available again after `delay`
    Retrying { delay: Duration },
    /// Terminal
    Failed(FailureKind),
    /// The job was re-claimed elsewhere after a stall; nothing was written
    LockLost,
}

/// Durable upload job queue
pub struct IngestionQueue {
    db: Arc<SqliteDb>,
    config: QueueConfig,
    listener: Arc<dyn JobListener>,
}

impl IngestionQueue {
    pub fn new(db: Arc<SqliteDb>, config: QueueConfig, listener: Arc<dyn JobListener>) -> Self {
        Self {
            db,
            config,
            listener,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Check a batch size against `1..=max_batch_size`
    pub fn validate_batch_size(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(AppError::Validation(
                "At least one record is required.".to_string(),
            ));
        }
        if len > self.config.max_batch_size {
            return Err(AppError::Validation(format!(
                "Max {} records allowed per request.",
                self.config.max_batch_size
            )));
        }
        Ok(())
    }

    /// Enqueue one job per record, all or nothing
    pub fn enqueue_bulk(&self, records: Vec<UploadRecord>, owner_id: &str) -> Result<Vec<i64>> {
        self.validate_batch_size(records.len())?;

        let jobs = records
            .into_iter()
            .map(|record| -> Result<NewJob> {
                let job_key = record.job_key();
                let payload = serde_json::to_string(&JobPayload::new(record, owner_id))?;
                Ok(NewJob { job_key, payload })
            })
            .collect::<Result<Vec<_>>>()?;

        let ids = self
            .db
            .enqueue_jobs(&jobs, self.config.max_attempts, now_ms())
            .map_err(|e| AppError::Queue(format!("Failed to enqueue jobs: {}", e)))?;

        for (id, job) in ids.iter().zip(&jobs) {
            self.listener.on_accepted(*id, &job.job_key);
        }

        Ok(ids)
    }

    /// Claim the next ready job under a fresh lock token
    pub fn dequeue(&self) -> Result<Option<UploadJob>> {
        let token = uuid::Uuid::new_v4().to_string();
        let job = self.db.claim_next_job(now_ms(), &token)?;
        if let Some(job) = &job {
            self.listener.on_started(job);
        }
        Ok(job)
    }

    /// Mark a claimed job completed
    pub fn complete(&self, job: &UploadJob, outcome: &JobOutcome) -> Result<bool> {
        let result = serde_json::to_string(outcome)?;
        let applied = self
            .db
            .complete_job(job.id, lock_token(job)?, &result, now_ms())?;

        if applied {
            self.listener.on_completed(job, outcome);
        } else {
            tracing::warn!(job_id = job.id, "Completion ignored, job lock was lost");
        }
        Ok(applied)
    }

    /// Retry a transiently failed job, or fail it once the attempt budget is spent
    pub fn retry_or_fail(&self, job: &UploadJob, error: &AppError) -> Result<FailureDisposition> {
        let message = error.to_string();

        if job.attempt_count >= job.max_attempts {
            return self.fail(job, FailureKind::Exhausted, &message);
        }

        let delay = self.backoff_delay(job.attempt_count);
        let available_at = now_ms() + delay.as_millis() as i64;
        if !self
            .db
            .reschedule_job(job.id, lock_token(job)?, &message, available_at)?
        {
            tracing::warn!(job_id = job.id, "Retry ignored, job lock was lost");
            return Ok(FailureDisposition::LockLost);
        }

        self.listener.on_retry_scheduled(job, delay, &message);
        Ok(FailureDisposition::Retrying { delay })
    }

    /// Terminally fail a claimed job
    pub fn fail(&self, job: &UploadJob, kind: FailureKind, message: &str) -> Result<FailureDisposition> {
        let stored = format!("{}: {}", kind.as_str(), message);
        if !self.db.fail_job(job.id, lock_token(job)?, &stored, now_ms())? {
            tracing::warn!(job_id = job.id, "Failure ignored, job lock was lost");
            return Ok(FailureDisposition::LockLost);
        }

        self.listener.on_failed(job, kind, message);
        Ok(FailureDisposition::Failed(kind))
    }

    /// Requeue or fail active jobs whose lock outlived the stall timeout
    pub fn recover_stalled(&self) -> Result<Vec<StalledJob>> {
        let now = now_ms();
        let cutoff = now - self.config.stall_timeout.as_millis() as i64;
        let recovered = self.db.recover_stalled_jobs(cutoff, now)?;

        for stalled in &recovered {
            self.listener.on_stalled(&stalled.job, stalled.requeued);
            if !stalled.requeued {
                self.listener.on_failed(
                    &stalled.job,
                    FailureKind::Stalled,
                    "job stalled more than allowable limit",
                );
            }
        }
        Ok(recovered)
    }

    /// Delay before the retry following attempt `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.config.backoff_base.saturating_mul(1u32 << exponent)
    }

    pub fn get_job(&self, id: i64) -> Result<Option<UploadJob>> {
        self.db.get_job(id)
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        self.db.job_counts()
    }
}

fn lock_token(job: &UploadJob) -> Result<&str> {
    job.lock_token
        .as_deref()
        .ok_or_else(|| AppError::Queue(format!("Job {} has no lock token", job.id)))
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
