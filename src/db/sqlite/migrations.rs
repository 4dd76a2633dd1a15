//! SQLite database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Run all database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    // Create migrations table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    run_migration(conn, "001_financial_records", CREATE_FINANCIAL_RECORDS_TABLE)?;
    run_migration(conn, "002_upload_jobs", CREATE_UPLOAD_JOBS_TABLE)?;

    tracing::info!("Database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    // Check if migration already applied
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute("INSERT OR IGNORE INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

const CREATE_FINANCIAL_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS financial_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id TEXT NOT NULL,
    company_name TEXT,
    reporting_period TEXT NOT NULL,
    industry_sector TEXT,
    total_assets REAL,
    total_liabilities REAL,
    revenue REAL,
    net_profit REAL,
    cash_flow REAL,
    interest_coverage_ratio REAL,
    owner_id TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(company_id, reporting_period)
);
CREATE INDEX IF NOT EXISTS idx_financial_records_period ON financial_records(reporting_period);
CREATE INDEX IF NOT EXISTS idx_financial_records_sector ON financial_records(industry_sector);
"#;

const CREATE_UPLOAD_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS upload_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'waiting',
    attempt_count INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    enqueued_at INTEGER NOT NULL,
    available_at INTEGER NOT NULL,
    locked_at INTEGER,
    lock_token TEXT,
    last_error TEXT,
    result TEXT,
    finished_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_upload_jobs_ready ON upload_jobs(state, available_at, id);
CREATE INDEX IF NOT EXISTS idx_upload_jobs_locked ON upload_jobs(state, locked_at);
"#;
