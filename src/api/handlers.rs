//! REST API endpoint handlers

use crate::api::identity::CallerId;
use crate::api::types::*;
use crate::db::sqlite::models::RecordFilter;
use crate::error::{AppError, Result};
use crate::services::{AssessmentService, IngestionService};
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Query, State as AxumState},
    Json,
};
use std::sync::Arc;

/// Turn a body rejection into our error envelope
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e.body_text())))
}

// ============================================================================
// Health Check
// ============================================================================

/// GET /health
pub async fn health_check(
    AxumState(state): AxumState<Arc<AppState>>,
) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        success: true,
        status: "ok".to_string(),
        queue: state.queue.counts()?,
        jobs: state.metrics.snapshot(),
        cache: state.cache.stats(),
        records: state.store.count_records(&RecordFilter::default())?,
    }))
}

// ============================================================================
// Financial Data
// ============================================================================

/// POST /upload
///
/// Enqueues one job per record and returns without waiting for them.
pub async fn upload_financial_data(
    AxumState(state): AxumState<Arc<AppState>>,
    CallerId(owner_id): CallerId,
    payload: std::result::Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<UploadResponse>> {
    let req = body(payload)?;
    let accepted = IngestionService::upload(&state, req.data, &owner_id).await?;

    Ok(Json(UploadResponse {
        success: true,
        message: accepted.message,
        jobs: accepted.job_ids.len(),
    }))
}

/// GET /risk-assessment
pub async fn get_risk_assessment(
    AxumState(state): AxumState<Arc<AppState>>,
    _caller: CallerId,
    Query(query): Query<RiskQuery>,
) -> Result<Json<RiskAssessmentResponse>> {
    let page = query.page()?;
    let assessment =
        AssessmentService::get_risk_assessment(&state, &query.filter(), page).await?;

    Ok(Json(assessment.into()))
}

/// POST /api/v1/financial/testUpload
///
/// Debug path: writes the batch directly, bypassing the queue.
pub async fn test_upload(
    AxumState(state): AxumState<Arc<AppState>>,
    CallerId(owner_id): CallerId,
    payload: std::result::Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<TestUploadResponse>> {
    let req = body(payload)?;
    let data = IngestionService::test_upload(&state, req.data, &owner_id).await?;

    Ok(Json(TestUploadResponse {
        success: true,
        message: "Data uploaded successfully".to_string(),
        data,
    }))
}
