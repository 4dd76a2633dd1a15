//! Upload job queue tables
//!
//! Claiming runs inside an IMMEDIATE transaction so two workers can never
//! claim the same row. Every state change after a claim is guarded by the
//! lock token stamped at claim time.

use crate::db::sqlite::models::{millis_to_datetime, JobState, QueueCounts, UploadJob};
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

const JOB_COLUMNS: &str = "id, job_key, payload, state, attempt_count, max_attempts, enqueued_at, \
     available_at, locked_at, lock_token, last_error, result, finished_at";

/// Job about to be enqueued
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_key: String,
    pub payload: String,
}

/// Outcome of stall recovery for one job
#[derive(Debug, Clone)]
pub struct StalledJob {
    pub job: UploadJob,
    /// false when the attempt budget was exhausted and the job was failed
    pub requeued: bool,
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<UploadJob> {
    let state: String = row.get(3)?;
    let state = JobState::parse(&state).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown job state: {}", state).into(),
        )
    })?;

    Ok(UploadJob {
        id: row.get(0)?,
        job_key: row.get(1)?,
        payload: row.get(2)?,
        state,
        attempt_count: row.get(4)?,
        max_attempts: row.get(5)?,
        enqueued_at: millis_to_datetime(row.get(6)?),
        available_at: millis_to_datetime(row.get(7)?),
        locked_at: row.get::<_, Option<i64>>(8)?.map(millis_to_datetime),
        lock_token: row.get(9)?,
        last_error: row.get(10)?,
        result: row.get(11)?,
        finished_at: row.get::<_, Option<i64>>(12)?.map(millis_to_datetime),
    })
}

/// Enqueue a batch of jobs atomically
pub fn enqueue_jobs(
    conn: &mut Connection,
    jobs: &[NewJob],
    max_attempts: u32,
    now_ms: i64,
) -> Result<Vec<i64>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut ids = Vec::with_capacity(jobs.len());
    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO upload_jobs (job_key, payload, state, attempt_count, max_attempts, enqueued_at, available_at)
            VALUES (?1, ?2, 'waiting', 0, ?3, ?4, ?4)
            "#,
        )?;
        for job in jobs {
            stmt.execute(params![job.job_key, job.payload, max_attempts, now_ms])?;
            ids.push(tx.last_insert_rowid());
        }
    }
    tx.commit()?;

    tracing::debug!("Enqueued {} upload jobs", ids.len());
    Ok(ids)
}

/// Claim the oldest ready job, marking it active under `lock_token`
pub fn claim_next(conn: &mut Connection, now_ms: i64, lock_token: &str) -> Result<Option<UploadJob>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let next: Option<i64> = tx
        .query_row(
            r#"
            SELECT id FROM upload_jobs
            WHERE state = 'waiting' AND available_at <= ?1
            ORDER BY id ASC
            LIMIT 1
            "#,
            params![now_ms],
            |row| row.get(0),
        )
        .optional()?;

    let Some(id) = next else {
        return Ok(None);
    };

    tx.execute(
        r#"
        UPDATE upload_jobs
        SET state = 'active', attempt_count = attempt_count + 1, locked_at = ?2, lock_token = ?3
        WHERE id = ?1
        "#,
        params![id, now_ms, lock_token],
    )?;

    let job = get_job(&tx, id)?;
    tx.commit()?;
    Ok(job)
}

/// Mark an active job completed; false if the lock was lost
pub fn complete_job(
    conn: &Connection,
    id: i64,
    lock_token: &str,
    result: &str,
    now_ms: i64,
) -> Result<bool> {
    let rows = conn.execute(
        r#"
        UPDATE upload_jobs
        SET state = 'completed', result = ?3, finished_at = ?4, locked_at = NULL, lock_token = NULL
        WHERE id = ?1 AND state = 'active' AND lock_token = ?2
        "#,
        params![id, lock_token, result, now_ms],
    )?;
    Ok(rows == 1)
}

/// Put an active job back in the queue, ready at `available_at_ms`
pub fn reschedule_job(
    conn: &Connection,
    id: i64,
    lock_token: &str,
    error: &str,
    available_at_ms: i64,
) -> Result<bool> {
    let rows = conn.execute(
        r#"
        UPDATE upload_jobs
        SET state = 'waiting', last_error = ?3, available_at = ?4, locked_at = NULL, lock_token = NULL
        WHERE id = ?1 AND state = 'active' AND lock_token = ?2
        "#,
        params![id, lock_token, error, available_at_ms],
    )?;
    Ok(rows == 1)
}

/// Mark an active job terminally failed
pub fn fail_job(
    conn: &Connection,
    id: i64,
    lock_token: &str,
    error: &str,
    now_ms: i64,
) -> Result<bool> {
    let rows = conn.execute(
        r#"
        UPDATE upload_jobs
        SET state = 'failed', last_error = ?3, finished_at = ?4, locked_at = NULL, lock_token = NULL
        WHERE id = ?1 AND state = 'active' AND lock_token = ?2
        "#,
        params![id, lock_token, error, now_ms],
    )?;
    Ok(rows == 1)
}

/// Requeue or fail every active job locked before `cutoff_ms`
pub fn recover_stalled(conn: &mut Connection, cutoff_ms: i64, now_ms: i64) -> Result<Vec<StalledJob>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let stalled = {
        let sql = format!(
            "SELECT {} FROM upload_jobs WHERE state = 'active' AND locked_at < ?1 ORDER BY id ASC",
            JOB_COLUMNS
        );
        let mut stmt = tx.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![cutoff_ms], map_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        jobs
    };

    let mut recovered = Vec::with_capacity(stalled.len());
    for job in stalled {
        let requeued = job.attempts_left() > 0;
        if requeued {
            tx.execute(
                r#"
                UPDATE upload_jobs
                SET state = 'waiting', last_error = 'job stalled', available_at = ?2,
                    locked_at = NULL, lock_token = NULL
                WHERE id = ?1
                "#,
                params![job.id, now_ms],
            )?;
        } else {
            tx.execute(
                r#"
                UPDATE upload_jobs
                SET state = 'failed', last_error = 'job stalled more than allowable limit',
                    finished_at = ?2, locked_at = NULL, lock_token = NULL
                WHERE id = ?1
                "#,
                params![job.id, now_ms],
            )?;
        }
        recovered.push(StalledJob { job, requeued });
    }

    tx.commit()?;
    Ok(recovered)
}

/// Get a job by id
pub fn get_job(conn: &Connection, id: i64) -> Result<Option<UploadJob>> {
    let sql = format!("SELECT {} FROM upload_jobs WHERE id = ?1", JOB_COLUMNS);
    let job = conn.query_row(&sql, params![id], map_job).optional()?;
    Ok(job)
}

/// Count jobs per state
pub fn count_by_state(conn: &Connection) -> Result<QueueCounts> {
    let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM upload_jobs GROUP BY state")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut counts = QueueCounts::default();
    for (state, count) in rows {
        match JobState::parse(&state) {
            Some(JobState::Waiting) => counts.waiting = count,
            Some(JobState::Active) => counts.active = count,
            Some(JobState::Completed) => counts.completed = count,
            Some(JobState::Failed) => counts.failed = count,
            None => tracing::warn!("Ignoring jobs in unknown state: {}", state),
        }
    }

    Ok(counts)
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

    fn jobs(keys: &[&str]) -> Vec<NewJob> {
        keys.iter()
            .map(|k| NewJob {
                job_key: k.to_string(),
                payload: format!(r#"{{"company_id":"{}"}}"#, k),
            })
            .collect()
    }

    #[test]
    fn test_claim_is_fifo_and_exclusive() {
        let mut conn = conn();
        enqueue_jobs(&mut conn, &jobs(&["C1", "C2"]), 3, 1_000).unwrap();

        let first = claim_next(&mut conn, 1_000, "w1").unwrap().unwrap();
        assert_eq!(first.job_key, "C1");
        assert_eq!(first.state, JobState::Active);
        assert_eq!(first.attempt_count, 1);
        assert_eq!(first.lock_token.as_deref(), Some("w1"));

        let second = claim_next(&mut conn, 1_000, "w2").unwrap().unwrap();
        assert_eq!(second.job_key, "C2");

        assert!(claim_next(&mut conn, 1_000, "w3").unwrap().is_none());
    }

    #[test]
    fn test_rescheduled_job_waits_until_available() {
        let mut conn = conn();
        enqueue_jobs(&mut conn, &jobs(&["C1"]), 3, 1_000).unwrap();
        let job = claim_next(&mut conn, 1_000, "w1").unwrap().unwrap();

        assert!(reschedule_job(&conn, job.id, "w1", "db down", 6_000).unwrap());
        assert!(claim_next(&mut conn, 5_999, "w1").unwrap().is_none());

        let retry = claim_next(&mut conn, 6_000, "w2").unwrap().unwrap();
        assert_eq!(retry.id, job.id);
        assert_eq!(retry.attempt_count, 2);
        assert_eq!(retry.last_error.as_deref(), Some("db down"));
    }

    #[test]
    fn test_stale_lock_cannot_complete() {
        let mut conn = conn();
        enqueue_jobs(&mut conn, &jobs(&["C1"]), 3, 1_000).unwrap();
        let job = claim_next(&mut conn, 1_000, "old").unwrap().unwrap();

        let recovered = recover_stalled(&mut conn, 2_000, 2_000).unwrap();
        assert_eq!(recovered.len(), 1);
        assert!(recovered[0].requeued);

        let again = claim_next(&mut conn, 2_000, "new").unwrap().unwrap();
        assert_eq!(again.attempt_count, 2);

        assert!(!complete_job(&conn, job.id, "old", "{}", 2_500).unwrap());
        assert!(complete_job(&conn, job.id, "new", "{}", 2_500).unwrap());
        assert_eq!(get_job(&conn, job.id).unwrap().unwrap().state, JobState::Completed);
    }

    #[test]
    fn test_stalled_job_with_no_attempts_left_fails() {
        let mut conn = conn();
        enqueue_jobs(&mut conn, &jobs(&["C1"]), 1, 1_000).unwrap();
        let job = claim_next(&mut conn, 1_000, "w1").unwrap().unwrap();

        let recovered = recover_stalled(&mut conn, 5_000, 5_000).unwrap();
        assert!(!recovered[0].requeued);

        let stored = get_job(&conn, job.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert!(stored.finished_at.is_some());
    }

    #[test]
    fn test_recent_locks_are_not_stalled() {
        let mut conn = conn();
        enqueue_jobs(&mut conn, &jobs(&["C1"]), 3, 1_000).unwrap();
        claim_next(&mut conn, 1_000, "w1").unwrap().unwrap();

        assert!(recover_stalled(&mut conn, 1_000, 1_500).unwrap().is_empty());
    }

    #[test]
    fn test_counts() {
        let mut conn = conn();
        enqueue_jobs(&mut conn, &jobs(&["C1", "C2", "C3"]), 3, 1_000).unwrap();
        let a = claim_next(&mut conn, 1_000, "w1").unwrap().unwrap();
        let b = claim_next(&mut conn, 1_000, "w2").unwrap().unwrap();
        complete_job(&conn, a.id, "w1", "{}", 1_100).unwrap();
        fail_job(&conn, b.id, "w2", "bad payload", 1_100).unwrap();

        let counts = count_by_state(&conn).unwrap();
        assert_eq!(
            counts,
            QueueCounts {
                waiting: 1,
                active: 0,
                completed: 1,
                failed: 1
            }
        );
    }
}
