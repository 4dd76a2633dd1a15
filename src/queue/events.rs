//! Job lifecycle notifications
//!
//! The queue calls a `JobListener` synchronously on every state transition.
//! Listeners must be cheap and must not call back into the queue.

use crate::db::sqlite::models::UploadJob;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Result of a successfully handled job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Record written by this attempt
    Persisted { record_id: i64 },
    /// An earlier attempt already wrote the record
    Duplicate,
}

/// Why a job ended in the failed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient errors on every allowed attempt
    Exhausted,
    /// Payload can never be persisted
    Fatal,
    /// Identity already stored by a different upload
    Conflict,
    /// Stalled with no attempts left
    Stalled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Exhausted => "exhausted",
            FailureKind::Fatal => "fatal",
            FailureKind::Conflict => "conflict",
            FailureKind::Stalled => "stalled",
        }
    }
}

/// Observer of job lifecycle events
pub trait JobListener: Send + Sync {
    fn on_accepted(&self, _job_id: i64, _job_key: &str) {}

    fn on_started(&self, _job: &UploadJob) {}

    fn on_completed(&self, _job: &UploadJob, _outcome: &JobOutcome) {}

    fn on_failed(&self, _job: &UploadJob, _kind: FailureKind, _error: &str) {}

    fn on_stalled(&self, _job: &UploadJob, _requeued: bool) {}

    fn on_retry_scheduled(&self, _job: &UploadJob, _delay: Duration, _error: &str) {}
}

/// Writes every event to the tracing log
#[derive(Debug, Default)]
pub struct LoggingListener;

impl JobListener for LoggingListener {
    fn on_accepted(&self, job_id: i64, job_key: &str) {
        tracing::debug!(job_id, job_key, "Job accepted");
    }

    fn on_started(&self, job: &UploadJob) {
        info!(
            job_id = job.id,
            job_key = %job.job_key,
            attempt = job.attempt_count,
            max_attempts = job.max_attempts,
            "Processing job"
        );
    }

    fn on_completed(&self, job: &UploadJob, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Persisted { record_id } => {
                info!(job_id = job.id, job_key = %job.job_key, record_id, "Job completed");
            }
            JobOutcome::Duplicate => {
                info!(
                    job_id = job.id,
                    job_key = %job.job_key,
                    attempt = job.attempt_count,
                    "Job completed, record already stored by an earlier attempt"
                );
            }
        }
    }

    fn on_failed(&self, job: &UploadJob, kind: FailureKind, err: &str) {
        match kind {
            FailureKind::Fatal => error!(
                job_id = job.id,
                job_key = %job.job_key,
                error = err,
                "Job rejected: payload can never be persisted"
            ),
            FailureKind::Conflict => warn!(
                job_id = job.id,
                job_key = %job.job_key,
                error = err,
                "Job rejected: record already exists"
            ),
            FailureKind::Exhausted | FailureKind::Stalled => error!(
                job_id = job.id,
                job_key = %job.job_key,
                attempts = job.attempt_count,
                reason = kind.as_str(),
                error = err,
                "Job failed permanently"
            ),
        }
    }

    fn on_stalled(&self, job: &UploadJob, requeued: bool) {
        warn!(
            job_id = job.id,
            job_key = %job.job_key,
            attempt = job.attempt_count,
            requeued,
            "Job stalled"
        );
    }

    fn on_retry_scheduled(&self, job: &UploadJob, delay: Duration, err: &str) {
        warn!(
            job_id = job.id,
            job_key = %job.job_key,
            attempt = job.attempt_count,
            delay_ms = delay.as_millis() as u64,
            error = err,
            "Job attempt failed, retry scheduled"
        );
    }
}

/// Event counters since startup
#[derive(Debug, Default)]
pub struct JobMetrics {
    accepted: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
    stalled: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of `JobMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobMetricsSnapshot {
    pub accepted: u64,
    pub started: u64,
    pub completed: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub stalled: u64,
    pub retries: u64,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> JobMetricsSnapshot {
        JobMetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            stalled: self.stalled.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

impl JobListener for JobMetrics {
    fn on_accepted(&self, _job_id: i64, _job_key: &str) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn on_started(&self, _job: &UploadJob) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_completed(&self, _job: &UploadJob, outcome: &JobOutcome) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if *outcome == JobOutcome::Duplicate {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_failed(&self, _job: &UploadJob, _kind: FailureKind, _error: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_stalled(&self, _job: &UploadJob, _requeued: bool) {
        self.stalled.fetch_add(1, Ordering::Relaxed);
    }

    fn on_retry_scheduled(&self, _job: &UploadJob, _delay: Duration, _error: &str) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Fans every event out to several listeners, in order
#[derive(Default, Clone)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn JobListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn JobListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl JobListener for ListenerSet {
    fn on_accepted(&self, job_id: i64, job_key: &str) {
        self.listeners.iter().for_each(|l| l.on_accepted(job_id, job_key));
    }

    fn on_started(&self, job: &UploadJob) {
        self.listeners.iter().for_each(|l| l.on_started(job));
    }

    fn on_completed(&self, job: &UploadJob, outcome: &JobOutcome) {
        self.listeners.iter().for_each(|l| l.on_completed(job, outcome));
    }

    fn on_failed(&self, job: &UploadJob, kind: FailureKind, error: &str) {
        self.listeners.iter().for_each(|l| l.on_failed(job, kind, error));
    }

    fn on_stalled(&self, job: &UploadJob, requeued: bool) {
        self.listeners.iter().for_each(|l| l.on_stalled(job, requeued));
    }

    fn on_retry_scheduled(&self, job: &UploadJob, delay: Duration, error: &str) {
        self.listeners
            .iter()
            .for_each(|l| l.on_retry_scheduled(job, delay, error));
    }
}
