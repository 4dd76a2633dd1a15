//! Persistence layer

pub mod sqlite;

use crate::error::Result;
use sqlite::models::{FinancialRecord, NewFinancialRecord, RecordFilter};
use sqlite::SqliteDb;

/// Financial record storage used by workers and the read path
pub trait RecordStore: Send + Sync {
    /// Insert one record; `AppError::Conflict` if `(company_id, reporting_period)` exists
    fn insert_record(&self, record: &NewFinancialRecord) -> Result<FinancialRecord>;

    /// Insert a batch, all or nothing
    fn insert_records(&self, records: &[NewFinancialRecord]) -> Result<Vec<FinancialRecord>>;

    /// One page of matching records in insertion order
    fn find_records(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FinancialRecord>>;

    fn count_records(&self, filter: &RecordFilter) -> Result<i64>;
}

impl RecordStore for SqliteDb {
    fn insert_record(&self, record: &NewFinancialRecord) -> Result<FinancialRecord> {
        SqliteDb::insert_record(self, record)
    }

    fn insert_records(&self, records: &[NewFinancialRecord]) -> Result<Vec<FinancialRecord>> {
        SqliteDb::insert_records(self, records)
    }

    fn find_records(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FinancialRecord>> {
        SqliteDb::find_records(self, filter, limit, offset)
    }

    fn count_records(&self, filter: &RecordFilter) -> Result<i64> {
        SqliteDb::count_records(self, filter)
    }
}
