//! REST API request and response types

use crate::db::sqlite::models::{FinancialRecord, QueueCounts, RecordFilter};
use crate::error::{AppError, Result};
use crate::queue::{JobMetricsSnapshot, UploadRecord};
use crate::cache::CacheStats;
use crate::services::RiskAssessment;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Body of both upload endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub data: Vec<UploadRecord>,
}

/// Query string of the risk assessment endpoint
///
/// Everything arrives as text so a bad `page` becomes our own 400 rather
/// than an extractor rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RiskQuery {
    pub company_id: Option<String>,
    pub reporting_period: Option<String>,
    pub industry_sector: Option<String>,
    pub page: Option<String>,
}

impl RiskQuery {
    /// Filters with empty values dropped
    pub fn filter(&self) -> RecordFilter {
        fn present(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        RecordFilter {
            company_id: present(&self.company_id),
            reporting_period: present(&self.reporting_period),
            industry_sector: present(&self.industry_sector),
        }
    }

    /// 1-based page, defaulting to 1
    pub fn page(&self) -> Result<u32> {
        match self.page.as_deref().map(str::trim) {
            None | Some("") => Ok(1),
            Some(raw) => match raw.parse::<u32>() {
                Ok(page) if page >= 1 => Ok(page),
                _ => Err(AppError::Validation(format!(
                    "page must be a positive integer, got {:?}",
                    raw
                ))),
            },
        }
    }
}

/// Response to an accepted upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub jobs: usize,
}

/// Response of the risk assessment endpoint
///
/// `data` is written out as raw JSON so a cached page reaches the client
/// unchanged.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessmentResponse {
    pub success: bool,
    pub cached: bool,
    pub page: u32,
    pub limit: usize,
    pub total_records: usize,
    pub data: Box<RawValue>,
}

impl From<RiskAssessment> for RiskAssessmentResponse {
    fn from(assessment: RiskAssessment) -> Self {
        Self {
            success: true,
            cached: assessment.cached,
            page: assessment.page,
            limit: assessment.limit,
            total_records: assessment.total_records,
            data: assessment.data,
        }
    }
}

/// Response of the direct insert endpoint
#[derive(Debug, Clone, Serialize)]
pub struct TestUploadResponse {
    pub success: bool,
    pub message: String,
    pub data: Vec<FinancialRecord>,
}

/// Service status with queue depth and job counters
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub status: String,
    pub queue: QueueCounts,
    pub jobs: JobMetricsSnapshot,
    pub cache: CacheStats,
    /// Stored financial records
    pub records: i64,
}
