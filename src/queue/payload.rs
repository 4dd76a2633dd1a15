//! Upload record and job payload types
//!
//! Clients send numbers either as JSON numbers or as numeric strings, so the
//! numeric fields use lenient deserializers. Empty strings count as absent.

use crate::db::sqlite::models::NewFinancialRecord;
use crate::error::{AppError, Result};
use serde::{Deserialize, Deserializer, Serialize};

fn deserialize_optional_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FlexibleOptFloat {
        Float(f64),
        Int(i64),
        Str(String),
    }

    match Option::<FlexibleOptFloat>::deserialize(deserializer)? {
        None => Ok(None),
        Some(FlexibleOptFloat::Float(f)) => Ok(Some(f)),
        Some(FlexibleOptFloat::Int(i)) => Ok(Some(i as f64)),
        Some(FlexibleOptFloat::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(FlexibleOptFloat::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn deserialize_optional_string<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FlexibleOptString {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Option::<FlexibleOptString>::deserialize(deserializer)? {
        None => None,
        Some(FlexibleOptString::Str(s)) if s.trim().is_empty() => None,
        Some(FlexibleOptString::Str(s)) => Some(s),
        Some(FlexibleOptString::Int(i)) => Some(i.to_string()),
        Some(FlexibleOptString::Float(f)) => Some(f.to_string()),
    })
}

/// One record as uploaded by a client, before owner tagging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub company_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub company_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub reporting_period: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub industry_sector: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_f64")]
    pub total_assets: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_f64")]
    pub total_liabilities: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_f64")]
    pub revenue: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_f64")]
    pub net_profit: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_f64")]
    pub cash_flow: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_f64")]
    pub interest_coverage_ratio: Option<f64>,
}

impl UploadRecord {
    /// Queue label for the job carrying this record
    pub fn job_key(&self) -> String {
        self.company_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Attach the owner and check identity fields
    pub fn into_new_record(self, owner_id: &str) -> Result<NewFinancialRecord> {
        let company_id = required(self.company_id, "company_id")?;
        let reporting_period = required(self.reporting_period, "reporting_period")?;
        let owner_id = required(Some(owner_id.to_string()), "owner_id")?;

        Ok(NewFinancialRecord {
            company_id,
            company_name: self.company_name,
            reporting_period,
            industry_sector: self.industry_sector,
            total_assets: self.total_assets,
            total_liabilities: self.total_liabilities,
            revenue: self.revenue,
            net_profit: self.net_profit,
            cash_flow: self.cash_flow,
            interest_coverage_ratio: self.interest_coverage_ratio,
            owner_id,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Validation(format!("Missing required field: {}", field))),
    }
}

/// Serialized body of an upload job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(flatten)]
    pub record: UploadRecord,
    pub owner_id: String,
}

impl JobPayload {
    pub fn new(record: UploadRecord, owner_id: &str) -> Self {
        Self {
            record,
            owner_id: owner_id.to_string(),
        }
    }

    /// Parse a stored payload; anything unreadable can never succeed
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::Fatal(format!("Malformed job payload: {}", e)))
    }

    /// Build the record to persist; missing identity fields are fatal
    pub fn into_new_record(self) -> Result<NewFinancialRecord> {
        self.record
            .into_new_record(&self.owner_id)
            .map_err(|e| match e {
                AppError::Validation(msg) => AppError::Fatal(msg),
                other => other,
            })
    }
}
