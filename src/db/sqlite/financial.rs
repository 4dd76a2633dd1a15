//! Financial record storage
//!
//! Records are unique per (company_id, reporting_period). A second insert for
//! the same identity fails with `AppError::Conflict` and leaves the stored
//! row untouched.

use crate::db::sqlite::models::{FinancialRecord, NewFinancialRecord, RecordFilter};
use crate::error::{AppError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

const RECORD_COLUMNS: &str = "id, company_id, company_name, reporting_period, industry_sector, \
     total_assets, total_liabilities, revenue, net_profit, cash_flow, interest_coverage_ratio, \
     owner_id, created_at, updated_at";

fn map_record(row: &Row<'_>) -> rusqlite::Result<FinancialRecord> {
    Ok(FinancialRecord {
        id: row.get(0)?,
        company_id: row.get(1)?,
        company_name: row.get(2)?,
        reporting_period: row.get(3)?,
        industry_sector: row.get(4)?,
        total_assets: row.get(5)?,
        total_liabilities: row.get(6)?,
        revenue: row.get(7)?,
        net_profit: row.get(8)?,
        cash_flow: row.get(9)?,
        interest_coverage_ratio: row.get(10)?,
        owner_id: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Whether a SQLite error is a UNIQUE / PRIMARY KEY violation
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

fn conflict_or(err: rusqlite::Error, record: &NewFinancialRecord) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict(format!(
            "Record for company {} in period {} already exists",
            record.company_id, record.reporting_period
        ))
    } else {
        AppError::Database(err)
    }
}

fn insert_row(conn: &Connection, record: &NewFinancialRecord) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO financial_records (
            company_id, company_name, reporting_period, industry_sector,
            total_assets, total_liabilities, revenue, net_profit, cash_flow,
            interest_coverage_ratio, owner_id
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            record.company_id,
            record.company_name,
            record.reporting_period,
            record.industry_sector,
            record.total_assets,
            record.total_liabilities,
            record.revenue,
            record.net_profit,
            record.cash_flow,
            record.interest_coverage_ratio,
            record.owner_id,
        ],
    )
    .map_err(|e| conflict_or(e, record))?;

    Ok(conn.last_insert_rowid())
}

/// Insert a single record
pub fn insert_record(conn: &Connection, record: &NewFinancialRecord) -> Result<FinancialRecord> {
    let id = insert_row(conn, record)?;
    tracing::debug!(
        "Stored financial record: id={}, company_id={}, period={}",
        id,
        record.company_id,
        record.reporting_period
    );
    get_record_by_id(conn, id)?
        .ok_or_else(|| AppError::Internal(format!("Inserted record {} not readable", id)))
}

/// Insert a batch atomically; any conflict rolls the whole batch back
pub fn insert_records(
    conn: &mut Connection,
    records: &[NewFinancialRecord],
) -> Result<Vec<FinancialRecord>> {
    let tx = conn.transaction()?;
    let mut ids = Vec::with_capacity(records.len());
    for record in records {
        ids.push(insert_row(&tx, record)?);
    }

    let mut stored = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = get_record_by_id(&tx, id)? {
            stored.push(record);
        }
    }
    tx.commit()?;

    tracing::info!("Bulk inserted {} financial records", stored.len());
    Ok(stored)
}

/// Get a record by row id
pub fn get_record_by_id(conn: &Connection, id: i64) -> Result<Option<FinancialRecord>> {
    let sql = format!("SELECT {} FROM financial_records WHERE id = ?1", RECORD_COLUMNS);
    let record = conn.query_row(&sql, params![id], map_record).optional()?;
    Ok(record)
}

/// Get a record by its identity
pub fn get_record(
    conn: &Connection,
    company_id: &str,
    reporting_period: &str,
) -> Result<Option<FinancialRecord>> {
    let sql = format!(
        "SELECT {} FROM financial_records WHERE company_id = ?1 AND reporting_period = ?2",
        RECORD_COLUMNS
    );
    let record = conn
        .query_row(&sql, params![company_id, reporting_period], map_record)
        .optional()?;
    Ok(record)
}

fn where_clause(filter: &RecordFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(c) = &filter.company_id {
        conditions.push("company_id = ?");
        params.push(Box::new(c.clone()));
    }

    if let Some(p) = &filter.reporting_period {
        conditions.push("reporting_period = ?");
        params.push(Box::new(p.clone()));
    }

    if let Some(s) = &filter.industry_sector {
        conditions.push("industry_sector = ?");
        params.push(Box::new(s.clone()));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (clause, params)
}

/// Find records matching every provided filter, in insertion order
pub fn find_records(
    conn: &Connection,
    filter: &RecordFilter,
    limit: usize,
    offset: usize,
) -> Result<Vec<FinancialRecord>> {
    let (clause, mut params_vec) = where_clause(filter);
    params_vec.push(Box::new(limit as i64));
    params_vec.push(Box::new(offset as i64));

    let sql = format!(
        "SELECT {} FROM financial_records {} ORDER BY id ASC LIMIT ? OFFSET ?",
        RECORD_COLUMNS, clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

    let records = stmt
        .query_map(params_refs.as_slice(), map_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(records)
}

/// Count records matching the filter
pub fn count_records(conn: &Connection, filter: &RecordFilter) -> Result<i64> {
    let (clause, params_vec) = where_clause(filter);
    let sql = format!("SELECT COUNT(*) FROM financial_records {}", clause);
    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let count: i64 = conn.query_row(&sql, params_refs.as_slice(), |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::migrations::run_migrations;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn record(company_id: &str, period: &str, sector: &str) -> NewFinancialRecord {
        NewFinancialRecord {
            company_id: company_id.to_string(),
            company_name: Some(format!("{} Holdings", company_id)),
            reporting_period: period.to_string(),
            industry_sector: Some(sector.to_string()),
            total_assets: Some(5000.0),
            total_liabilities: Some(2000.0),
            revenue: Some(10000.0),
            net_profit: Some(500.0),
            cash_flow: None,
            interest_coverage_ratio: None,
            owner_id: "user-1".to_string(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let conn = conn();
        let stored = insert_record(&conn, &record("C1", "2024-Q1", "tech")).unwrap();
        assert_eq!(stored.company_id, "C1");
        assert_eq!(stored.total_assets, Some(5000.0));
        assert_eq!(stored.owner_id, "user-1");
        assert!(!stored.created_at.is_empty());

        let fetched = get_record(&conn, "C1", "2024-Q1").unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[test]
    fn test_duplicate_identity_is_conflict() {
        let conn = conn();
        insert_record(&conn, &record("C1", "2024-Q1", "tech")).unwrap();

        let mut second = record("C1", "2024-Q1", "energy");
        second.owner_id = "user-2".to_string();
        let err = insert_record(&conn, &second).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Original row untouched
        let stored = get_record(&conn, "C1", "2024-Q1").unwrap().unwrap();
        assert_eq!(stored.industry_sector.as_deref(), Some("tech"));
        assert_eq!(count_records(&conn, &RecordFilter::default()).unwrap(), 1);
    }

    #[test]
    fn test_same_company_other_period_is_allowed() {
        let conn = conn();
        insert_record(&conn, &record("C1", "2024-Q1", "tech")).unwrap();
        insert_record(&conn, &record("C1", "2024-Q2", "tech")).unwrap();
        assert_eq!(count_records(&conn, &RecordFilter::default()).unwrap(), 2);
    }

    #[test]
    fn test_bulk_insert_rolls_back_on_conflict() {
        let mut conn = conn();
        insert_record(&conn, &record("C2", "2024-Q1", "tech")).unwrap();

        let batch = vec![record("C1", "2024-Q1", "tech"), record("C2", "2024-Q1", "tech")];
        let err = insert_records(&mut conn, &batch).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(get_record(&conn, "C1", "2024-Q1").unwrap().is_none());
    }

    #[test]
    fn test_find_with_filters_and_paging() {
        let conn = conn();
        for i in 0..5 {
            insert_record(&conn, &record(&format!("C{}", i), "2024-Q1", "tech")).unwrap();
        }
        insert_record(&conn, &record("E1", "2024-Q1", "energy")).unwrap();
        insert_record(&conn, &record("E1", "2023-Q4", "energy")).unwrap();

        let all = find_records(&conn, &RecordFilter::default(), 50, 0).unwrap();
        assert_eq!(all.len(), 7);

        let tech = RecordFilter {
            industry_sector: Some("tech".into()),
            ..Default::default()
        };
        let page = find_records(&conn, &tech, 2, 2).unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.company_id.as_str()).collect();
        assert_eq!(ids, vec!["C2", "C3"]);

        let narrow = RecordFilter {
            company_id: Some("E1".into()),
            reporting_period: Some("2023-Q4".into()),
            industry_sector: Some("energy".into()),
        };
        let found = find_records(&conn, &narrow, 50, 0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reporting_period, "2023-Q4");

        let none = RecordFilter {
            company_id: Some("missing".into()),
            ..Default::default()
        };
        assert!(find_records(&conn, &none, 50, 0).unwrap().is_empty());
    }
}
