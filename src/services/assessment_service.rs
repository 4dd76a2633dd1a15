//! Assessment Service
//!
//! Cache-aside read path: fingerprint the query, serve a cached page when
//! present, otherwise read one page from storage, enrich it and cache the
//! enriched set. A cached page is served byte for byte as it was stored.

use crate::cache::fingerprint;
use crate::db::sqlite::models::RecordFilter;
use crate::error::{AppError, Result};
use crate::services::risk_engine::RiskEngine;
use crate::state::AppState;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{debug, info, warn};

/// One page of enriched records
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub cached: bool,
    pub page: u32,
    pub limit: usize,
    /// Records on this page
    pub total_records: usize,
    /// JSON array of enriched records, exactly as cached
    pub data: Box<RawValue>,
}

/// Cached page body plus its element count
struct CachedPage {
    data: Box<RawValue>,
    len: usize,
}

/// Assessment service for business logic
pub struct AssessmentService;

impl AssessmentService {
    /// Get one page of risk-enriched records matching `filter`
    ///
    /// `page` is 1-based. An empty page is `AppError::NotFound` and is never
    /// cached.
    pub async fn get_risk_assessment(
        state: &AppState,
        filter: &RecordFilter,
        page: u32,
    ) -> Result<RiskAssessment> {
        if page < 1 {
            return Err(AppError::Validation("page must be at least 1".to_string()));
        }

        let limit = state.config.cache.page_size;
        let key = fingerprint(filter, page);
        info!(cache_key = %key, "AssessmentService::get_risk_assessment");

        if let Some(hit) = Self::cached_page(state, &key).await? {
            debug!(cache_key = %key, "Cache hit");
            return Ok(RiskAssessment {
                cached: true,
                page,
                limit,
                total_records: hit.len,
                data: hit.data,
            });
        }

        let offset = (page as usize - 1).saturating_mul(limit);
        let records = state.store.find_records(filter, limit, offset)?;
        if records.is_empty() {
            return Err(AppError::NotFound("No data found.".to_string()));
        }

        let enriched = RiskEngine::enrich_all(&records);
        let serialized = serde_json::to_string(&enriched)?;
        let data = RawValue::from_string(serialized.clone())?;
        if let Err(e) = state
            .cache
            .set(&key, serialized, state.config.cache.ttl)
            .await
        {
            if !state.config.cache.fail_open {
                return Err(e);
            }
            warn!(cache_key = %key, "Cache write failed, serving uncached: {}", e);
        }

        Ok(RiskAssessment {
            cached: false,
            page,
            limit,
            total_records: enriched.len(),
            data,
        })
    }

    // ========================================================================
    // Private Helper Methods
    // ========================================================================

    /// Read a cached page; in fail-open mode cache errors count as misses
    async fn cached_page(state: &AppState, key: &str) -> Result<Option<CachedPage>> {
        let raw = match state.cache.get(key).await {
            Ok(raw) => raw,
            Err(e) if state.config.cache.fail_open => {
                warn!(cache_key = %key, "Cache read failed, falling back to storage: {}", e);
                None
            }
            Err(e) => return Err(e),
        };

        let Some(raw) = raw else {
            return Ok(None);
        };

        // Only the array structure is checked; element values stay untouched
        let len = match serde_json::from_str::<Vec<&RawValue>>(&raw) {
            Ok(items) => items.len(),
            Err(e) => {
                warn!(cache_key = %key, "Discarding unreadable cache entry: {}", e);
                return Ok(None);
            }
        };

        Ok(Some(CachedPage {
            data: RawValue::from_string(raw)?,
            len,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, ResultCache};
    use crate::config::AppConfig;
    use crate::db::sqlite::models::NewFinancialRecord;
    use crate::db::sqlite::SqliteDb;
    use crate::services::risk_engine::EnrichedRecord;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FailingCache;

    #[async_trait]
    impl ResultCache for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(AppError::Cache("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            Err(AppError::Cache("connection refused".into()))
        }
    }

    fn new_record(company_id: &str, sector: &str) -> NewFinancialRecord {
        NewFinancialRecord {
            company_id: company_id.into(),
            company_name: Some(format!("{} Ltd", company_id)),
            reporting_period: "2024-Q1".into(),
            industry_sector: Some(sector.into()),
            total_assets: Some(5000.0),
            total_liabilities: Some(2000.0),
            revenue: Some(10000.0),
            net_profit: Some(500.0),
            cash_flow: None,
            interest_coverage_ratio: None,
            owner_id: "user-1".into(),
        }
    }

    fn setup(cache: Arc<dyn ResultCache>, config: AppConfig) -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(SqliteDb::new(&dir.path().join("assess.db"), 2).unwrap());
        (dir, AppState::new(config, db, cache))
    }

    fn records(assessment: &RiskAssessment) -> Vec<EnrichedRecord> {
        serde_json::from_str(assessment.data.get()).unwrap()
    }

    fn company(id: &str) -> RecordFilter {
        RecordFilter {
            company_id: Some(id.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = Arc::new(MemoryCache::new());
        let (_dir, state) = setup(cache.clone(), AppConfig::default());
        state.sqlite.insert_record(&new_record("C1", "tech")).unwrap();

        let first = AssessmentService::get_risk_assessment(&state, &company("C1"), 1)
            .await
            .unwrap();
        assert!(!first.cached);
        assert_eq!(first.total_records, 1);
        assert_eq!(first.limit, 50);
        assert!((records(&first)[0].metrics.operating_margin - 5.0).abs() < 1e-9);
        assert!(cache.contains_key("risk:C1:*:*:page:1"));

        let second = AssessmentService::get_risk_assessment(&state, &company("C1"), 1)
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(second.data.get(), first.data.get());
    }

    #[tokio::test]
    async fn test_cached_page_is_served_even_if_stale() {
        let cache = Arc::new(MemoryCache::new());
        let (_dir, state) = setup(cache, AppConfig::default());
        state.sqlite.insert_record(&new_record("C1", "tech")).unwrap();

        AssessmentService::get_risk_assessment(&state, &RecordFilter::default(), 1)
            .await
            .unwrap();
        state.sqlite.insert_record(&new_record("C2", "tech")).unwrap();

        let cached = AssessmentService::get_risk_assessment(&state, &RecordFilter::default(), 1)
            .await
            .unwrap();
        assert!(cached.cached);
        assert_eq!(cached.total_records, 1);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_cached() {
        let cache = Arc::new(MemoryCache::new());
        let (_dir, state) = setup(cache.clone(), AppConfig::default());

        let result = AssessmentService::get_risk_assessment(&state, &company("C9"), 1).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_pagination_and_filters() {
        let mut config = AppConfig::default();
        config.cache.page_size = 2;
        let (_dir, state) = setup(Arc::new(MemoryCache::new()), config);
        for (id, sector) in [("C1", "tech"), ("C2", "tech"), ("C3", "energy"), ("C4", "tech")] {
            state.sqlite.insert_record(&new_record(id, sector)).unwrap();
        }

        let tech = RecordFilter {
            industry_sector: Some("tech".into()),
            ..Default::default()
        };
        let page2 = AssessmentService::get_risk_assessment(&state, &tech, 2)
            .await
            .unwrap();
        assert_eq!(page2.page, 2);
        assert_eq!(page2.total_records, 1);
        assert_eq!(records(&page2)[0].record.company_id, "C4");

        let page3 = AssessmentService::get_risk_assessment(&state, &tech, 3).await;
        assert!(matches!(page3, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cache_failure_surfaces_by_default() {
        let (_dir, state) = setup(Arc::new(FailingCache), AppConfig::default());
        state.sqlite.insert_record(&new_record("C1", "tech")).unwrap();

        let result = AssessmentService::get_risk_assessment(&state, &company("C1"), 1).await;
        assert!(matches!(result, Err(AppError::Cache(_))));
    }

    #[tokio::test]
    async fn test_cache_failure_fail_open() {
        let mut config = AppConfig::default();
        config.cache.fail_open = true;
        let (_dir, state) = setup(Arc::new(FailingCache), config);
        state.sqlite.insert_record(&new_record("C1", "tech")).unwrap();

        let result = AssessmentService::get_risk_assessment(&state, &company("C1"), 1)
            .await
            .unwrap();
        assert!(!result.cached);
        assert_eq!(result.total_records, 1);
    }

    #[tokio::test]
    async fn test_page_zero_rejected() {
        let (_dir, state) = setup(Arc::new(MemoryCache::new()), AppConfig::default());
        let result = AssessmentService::get_risk_assessment(&state, &RecordFilter::default(), 0).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_cached_page_is_served_verbatim() {
        let cache = Arc::new(MemoryCache::new());
        let (_dir, state) = setup(cache.clone(), AppConfig::default());
        let stored = r#"[{"company_id":"C1","riskScore":0.1000000000000000055511151231257827}]"#;
        cache
            .set("risk:C1:*:*:page:1", stored.to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let hit = AssessmentService::get_risk_assessment(&state, &company("C1"), 1)
            .await
            .unwrap();
        assert!(hit.cached);
        assert_eq!(hit.total_records, 1);
        assert_eq!(hit.data.get(), stored);
    }

    #[tokio::test]
    async fn test_unreadable_cache_entry_falls_back_to_storage() {
        let cache = Arc::new(MemoryCache::new());
        let (_dir, state) = setup(cache.clone(), AppConfig::default());
        state.sqlite.insert_record(&new_record("C1", "tech")).unwrap();
        cache
            .set("risk:C1:*:*:page:1", "{not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let result = AssessmentService::get_risk_assessment(&state, &company("C1"), 1)
            .await
            .unwrap();
        assert!(!result.cached);
        assert_eq!(records(&result)[0].record.company_id, "C1");
    }

    #[tokio::test]
    async fn test_filters_with_separators_do_not_share_cache_entries() {
        let cache = Arc::new(MemoryCache::new());
        let (_dir, state) = setup(cache, AppConfig::default());
        let mut record = new_record("a:b", "tech");
        record.reporting_period = "c".into();
        state.sqlite.insert_record(&record).unwrap();

        let stored = RecordFilter {
            company_id: Some("a:b".into()),
            reporting_period: Some("c".into()),
            industry_sector: None,
        };
        let hit = AssessmentService::get_risk_assessment(&state, &stored, 1)
            .await
            .unwrap();
        assert_eq!(records(&hit)[0].record.company_id, "a:b");

        let other = RecordFilter {
            company_id: Some("a".into()),
            reporting_period: Some("b:c".into()),
            industry_sector: None,
        };
        let result = AssessmentService::get_risk_assessment(&state, &other, 1).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
