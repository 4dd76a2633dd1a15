//! SQLite database models

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Stored financial record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub id: i64,
    pub company_id: String,
    pub company_name: Option<String>,
    pub reporting_period: String,
    pub industry_sector: Option<String>,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub revenue: Option<f64>,
    pub net_profit: Option<f64>,
    pub cash_flow: Option<f64>,
    pub interest_coverage_ratio: Option<f64>,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Record about to be inserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFinancialRecord {
    pub company_id: String,
    pub company_name: Option<String>,
    pub reporting_period: String,
    pub industry_sector: Option<String>,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub revenue: Option<f64>,
    pub net_profit: Option<f64>,
    pub cash_flow: Option<f64>,
    pub interest_coverage_ratio: Option<f64>,
    pub owner_id: String,
}

/// Exact-match filter over stored records; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub company_id: Option<String>,
    pub reporting_period: Option<String>,
    pub industry_sector: Option<String>,
}

/// Upload job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }
}

/// Queued upload job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: i64,
    /// Observability label, the uploaded company_id
    pub job_key: String,
    /// Raw record fields plus owner_id, as JSON
    pub payload: String,
    pub state: JobState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_token: Option<String>,
    pub last_error: Option<String>,
    pub result: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadJob {
    pub fn attempts_left(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }
}

/// Job counts per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}
