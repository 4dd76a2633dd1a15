//! Ingestion Service
//!
//! Accepts uploaded batches. The normal path only enqueues jobs and returns;
//! records are written later by the workers. The debug path writes the batch
//! directly in one transaction.

use crate::db::sqlite::models::FinancialRecord;
use crate::error::Result;
use crate::queue::UploadRecord;
use crate::state::AppState;
use serde::Serialize;
use tracing::info;

/// Result of accepting a batch for background processing
#[derive(Debug, Clone, Serialize)]
pub struct UploadAccepted {
    pub message: String,
    pub job_ids: Vec<i64>,
}

/// Ingestion service for business logic
pub struct IngestionService;

impl IngestionService {
    /// Enqueue one job per record, all or nothing
    pub async fn upload(
        state: &AppState,
        records: Vec<UploadRecord>,
        owner_id: &str,
    ) -> Result<UploadAccepted> {
        let count = records.len();
        info!(owner_id, records = count, "Financial data upload initiated");

        let job_ids = state.queue.enqueue_bulk(records, owner_id)?;

        info!(owner_id, records = count, "Financial data queued for processing");
        Ok(UploadAccepted {
            message: "Data processing started.".to_string(),
            job_ids,
        })
    }

    /// Persist a batch synchronously, bypassing the queue
    ///
    /// Any identity conflict rolls back the whole batch.
    pub async fn test_upload(
        state: &AppState,
        records: Vec<UploadRecord>,
        owner_id: &str,
    ) -> Result<Vec<FinancialRecord>> {
        state.queue.validate_batch_size(records.len())?;

        let new_records = records
            .into_iter()
            .map(|r| r.into_new_record(owner_id))
            .collect::<Result<Vec<_>>>()?;

        let stored = state.store.insert_records(&new_records)?;
        info!(owner_id, records = stored.len(), "Financial data inserted directly");
        Ok(stored)
    }
}
