//! Worker pool
//!
//! Each worker claims one job at a time, persists its record and settles the
//! job according to the error class:
//!
//! - fatal payload errors fail immediately
//! - a uniqueness conflict on the first attempt fails the job; on a later
//!   attempt it means an earlier attempt already wrote the row, so the job
//!   completes as a duplicate
//! - anything transient is retried with backoff until attempts run out
//!
//! Database calls are blocking and run on the blocking thread pool.

use crate::config::WorkerConfig;
use crate::db::RecordStore;
use crate::db::sqlite::models::UploadJob;
use crate::error::{AppError, Result};
use crate::queue::{FailureDisposition, FailureKind, IngestionQueue, JobOutcome, JobPayload};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// How a processed job was left
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Completed(JobOutcome),
    Retrying { delay: Duration },
    Failed(FailureKind),
    /// The stall monitor took the job away mid-attempt
    LockLost,
}

impl From<FailureDisposition> for Settlement {
    fn from(disposition: FailureDisposition) -> Self {
        match disposition {
            FailureDisposition::Retrying { delay } => Settlement::Retrying { delay },
            FailureDisposition::Failed(kind) => Settlement::Failed(kind),
            FailureDisposition::LockLost => Settlement::LockLost,
        }
    }
}

/// One processed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedJob {
    pub job_id: i64,
    pub attempt: u32,
    pub settlement: Settlement,
}

/// Single queue consumer
#[derive(Clone)]
pub struct Worker {
    id: usize,
    queue: Arc<IngestionQueue>,
    store: Arc<dyn RecordStore>,
}

impl Worker {
    pub fn new(id: usize, queue: Arc<IngestionQueue>, store: Arc<dyn RecordStore>) -> Self {
        Self { id, queue, store }
    }

    /// Claim and settle the next ready job, if any
    pub fn process_next(&self) -> Result<Option<ProcessedJob>> {
        let job = match self.queue.dequeue()? {
            Some(job) => job,
            None => return Ok(None),
        };

        let result = self.execute(&job);
        let settlement = self.settle(&job, result)?;

        Ok(Some(ProcessedJob {
            job_id: job.id,
            attempt: job.attempt_count,
            settlement,
        }))
    }

    /// Process jobs until none is ready
    pub fn drain(&self) -> Result<Vec<ProcessedJob>> {
        let mut processed = Vec::new();
        while let Some(job) = self.process_next()? {
            processed.push(job);
        }
        Ok(processed)
    }

    fn execute(&self, job: &UploadJob) -> Result<JobOutcome> {
        let record = JobPayload::parse(&job.payload)?.into_new_record()?;

        match self.store.insert_record(&record) {
            Ok(stored) => Ok(JobOutcome::Persisted {
                record_id: stored.id,
            }),
            Err(AppError::Conflict(_)) if job.attempt_count > 1 => Ok(JobOutcome::Duplicate),
            Err(e) => Err(e),
        }
    }

    fn settle(&self, job: &UploadJob, result: Result<JobOutcome>) -> Result<Settlement> {
        let err = match result {
            Ok(outcome) => {
                return Ok(if self.queue.complete(job, &outcome)? {
                    Settlement::Completed(outcome)
                } else {
                    Settlement::LockLost
                });
            }
            Err(err) => err,
        };

        let disposition = match &err {
            AppError::Conflict(msg) => self.queue.fail(job, FailureKind::Conflict, msg)?,
            e if e.is_transient() => self.queue.retry_or_fail(job, e)?,
            AppError::Fatal(msg) => self.queue.fail(job, FailureKind::Fatal, msg)?,
            e => self.queue.fail(job, FailureKind::Fatal, &e.to_string())?,
        };
        Ok(disposition.into())
    }

    /// Poll the queue until shutdown is signalled
    pub async fn run(self, poll_interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        info!(worker = self.id, "Worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let worker = self.clone();
            match tokio::task::spawn_blocking(move || worker.process_next()).await {
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) => {}
                Ok(Err(e)) => error!(worker = self.id, "Failed to process job: {}", e),
                Err(e) => error!(worker = self.id, "Worker task panicked: {}", e),
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!(worker = self.id, "Worker stopped");
    }
}

/// Periodically recover stalled jobs until shutdown is signalled
pub async fn stall_monitor(
    queue: Arc<IngestionQueue>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        check_interval_secs = every.as_secs(),
        stall_timeout_secs = queue.config().stall_timeout.as_secs(),
        "Stall monitor started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let queue = queue.clone();
                match tokio::task::spawn_blocking(move || queue.recover_stalled()).await {
                    Ok(Ok(recovered)) if !recovered.is_empty() => {
                        warn!(count = recovered.len(), "Recovered stalled jobs");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Stall check failed: {}", e),
                    Err(e) => error!("Stall check panicked: {}", e),
                }
            }
        }
    }

    info!("Stall monitor stopped");
}

/// Running workers plus the stall monitor
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.concurrency` workers and one stall monitor
    pub fn start(
        queue: Arc<IngestionQueue>,
        store: Arc<dyn RecordStore>,
        config: &WorkerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let mut handles: Vec<JoinHandle<()>> = (0..config.concurrency)
            .map(|id| {
                let worker = Worker::new(id, queue.clone(), store.clone());
                tokio::spawn(worker.run(config.poll_interval, shutdown_rx.clone()))
            })
            .collect();

        handles.push(tokio::spawn(stall_monitor(
            queue,
            config.stall_check_interval,
            shutdown_rx,
        )));

        info!(workers = config.concurrency, "Worker pool started");
        Self { handles }
    }

    /// Wait for every task to exit after shutdown was signalled
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!("Worker task ended abnormally: {}", e);
            }
        }
    }
}
