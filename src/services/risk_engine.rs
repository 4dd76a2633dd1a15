//! Risk Metric Engine
//!
//! Pure computation of derived ratios and a bounded risk score from a stored
//! record. Missing or zero `total_assets` and `revenue` count as 1, missing
//! liabilities, profit and interest coverage count as 0. When assets equal
//! liabilities the equity denominator is zero and the ratios become infinite
//! or NaN; they are returned as-is and serialize as JSON `null`.

use crate::db::sqlite::models::FinancialRecord;
use serde::{Deserialize, Deserializer, Serialize};

pub const MIN_RISK_SCORE: f64 = 0.0;
pub const MAX_RISK_SCORE: f64 = 100.0;

/// Record plus derived risk metrics, as served by the assessment API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: FinancialRecord,
    #[serde(flatten)]
    pub metrics: RiskMetrics,
}

/// Derived metrics for one record
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    #[serde(deserialize_with = "nullable_f64")]
    pub debt_to_equity_ratio: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub operating_margin: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub return_on_equity: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub z_score: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub risk_score: f64,
}

/// Non-finite metrics are written as `null`; read them back as NaN
fn nullable_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Absent or zero counts as `fallback`
fn or_nonzero(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        Some(v) if v != 0.0 && !v.is_nan() => v,
        _ => fallback,
    }
}

impl RiskMetrics {
    /// Compute metrics for a record
    pub fn compute(record: &FinancialRecord) -> Self {
        let total_assets = or_nonzero(record.total_assets, 1.0);
        let total_liabilities = or_nonzero(record.total_liabilities, 0.0);
        let revenue = or_nonzero(record.revenue, 1.0);
        let net_profit = or_nonzero(record.net_profit, 0.0);
        let interest_coverage_ratio = or_nonzero(record.interest_coverage_ratio, 0.0);

        let equity = total_assets - total_liabilities;

        let debt_to_equity_ratio = total_liabilities / equity;
        let operating_margin = (net_profit / revenue) * 100.0;
        let return_on_equity = (net_profit / equity) * 100.0;
        let z_score = (3.3 * (net_profit / total_assets))
            + (0.6 * (equity / total_liabilities))
            + (1.0 * (revenue / total_assets));

        let raw_score = 100.0
            - ((debt_to_equity_ratio * 10.0)
                + (operating_margin * 2.0)
                + (return_on_equity * 2.0)
                + (interest_coverage_ratio * 5.0)
                + (z_score * 5.0));

        // clamp keeps NaN as NaN
        let risk_score = raw_score.clamp(MIN_RISK_SCORE, MAX_RISK_SCORE);

        Self {
            debt_to_equity_ratio,
            operating_margin,
            return_on_equity,
            z_score,
            risk_score,
        }
    }
}

/// Stateless enrichment of stored records
pub struct RiskEngine;

impl RiskEngine {
    /// Enrich a single record
    pub fn enrich(record: &FinancialRecord) -> EnrichedRecord {
        EnrichedRecord {
            record: record.clone(),
            metrics: RiskMetrics::compute(record),
        }
    }

    /// Enrich a result set, preserving order
    pub fn enrich_all(records: &[FinancialRecord]) -> Vec<EnrichedRecord> {
        records.iter().map(Self::enrich).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        assets: Option<f64>,
        liabilities: Option<f64>,
        revenue: Option<f64>,
        profit: Option<f64>,
    ) -> FinancialRecord {
        FinancialRecord {
            id: 1,
            company_id: "C1".into(),
            company_name: None,
            reporting_period: "2024-Q1".into(),
            industry_sector: None,
            total_assets: assets,
            total_liabilities: liabilities,
            revenue,
            net_profit: profit,
            cash_flow: None,
            interest_coverage_ratio: None,
            owner_id: "user-1".into(),
            created_at: "2024-04-01 00:00:00".into(),
            updated_at: "2024-04-01 00:00:00".into(),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_reference_company() {
        let m = RiskMetrics::compute(&record(Some(5000.0), Some(2000.0), Some(10000.0), Some(500.0)));

        assert!(approx(m.operating_margin, 5.0));
        assert!(approx(m.debt_to_equity_ratio, 2000.0 / 3000.0));
        assert!(approx(m.return_on_equity, 500.0 / 3000.0 * 100.0));
        let z = 3.3 * (500.0 / 5000.0) + 0.6 * (3000.0 / 2000.0) + 10000.0 / 5000.0;
        assert!(approx(m.z_score, z));
        // 100 - (6.67 + 10 + 33.3 + 0 + 16.6) lands inside the band
        let raw = 100.0
            - (m.debt_to_equity_ratio * 10.0
                + m.operating_margin * 2.0
                + m.return_on_equity * 2.0
                + m.z_score * 5.0);
        assert!(approx(m.risk_score, raw.clamp(0.0, 100.0)));
        assert!((0.0..=100.0).contains(&m.risk_score));
    }

    #[test]
    fn test_missing_values_use_defaults() {
        // Assets and revenue default to 1, liabilities to 0
        let m = RiskMetrics::compute(&record(None, None, None, None));
        assert_eq!(m.debt_to_equity_ratio, 0.0);
        assert_eq!(m.operating_margin, 0.0);
        assert_eq!(m.return_on_equity, 0.0);
        // 0.6 * (1 / 0) is infinite, so the score floors at 0
        assert!(m.z_score.is_infinite());
        assert_eq!(m.risk_score, 0.0);
    }

    #[test]
    fn test_zero_assets_treated_as_one() {
        let zero = RiskMetrics::compute(&record(Some(0.0), Some(0.5), Some(0.0), Some(0.25)));
        let one = RiskMetrics::compute(&record(Some(1.0), Some(0.5), Some(1.0), Some(0.25)));
        assert_eq!(zero.debt_to_equity_ratio.to_bits(), one.debt_to_equity_ratio.to_bits());
        assert_eq!(zero.risk_score.to_bits(), one.risk_score.to_bits());
    }

    #[test]
    fn test_zero_equity_propagates_non_finite_ratios() {
        let m = RiskMetrics::compute(&record(Some(1000.0), Some(1000.0), Some(500.0), Some(50.0)));
        assert!(m.debt_to_equity_ratio.is_infinite());
        assert!(m.return_on_equity.is_infinite());
        assert_eq!(m.risk_score, 0.0);

        // 0 / 0 profit over zero equity is NaN and so is the score
        let m = RiskMetrics::compute(&record(Some(1000.0), Some(1000.0), Some(500.0), None));
        assert!(m.return_on_equity.is_nan());
        assert!(m.risk_score.is_nan());
    }

    #[test]
    fn test_score_is_clamped_to_band() {
        // Heavy losses push the raw score above 100
        let m = RiskMetrics::compute(&record(Some(1000.0), Some(100.0), Some(100.0), Some(-900.0)));
        assert_eq!(m.risk_score, MAX_RISK_SCORE);
    }

    #[test]
    fn test_enrich_is_deterministic() {
        let r = record(Some(7321.5), Some(2210.25), Some(15000.0), Some(-120.0));
        let a = RiskEngine::enrich(&r);
        let b = RiskEngine::enrich(&r);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        assert_eq!(a.metrics.z_score.to_bits(), b.metrics.z_score.to_bits());
        assert_eq!(a.metrics.risk_score.to_bits(), b.metrics.risk_score.to_bits());
    }

    #[test]
    fn test_serialized_shape() {
        let enriched = RiskEngine::enrich(&record(Some(1000.0), Some(1000.0), Some(500.0), None));
        let value = serde_json::to_value(&enriched).unwrap();

        assert_eq!(value["company_id"], "C1");
        assert_eq!(value["reporting_period"], "2024-Q1");
        assert!(value.get("operatingMargin").is_some());
        assert!(value["debtToEquityRatio"].is_null());
        assert!(value["riskScore"].is_null());

        let back: EnrichedRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.record.company_id, "C1");
        assert!(back.metrics.risk_score.is_nan());
    }
}
