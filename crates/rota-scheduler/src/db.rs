use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use rota_core::{epoch_ms, from_epoch_ms, JobName, WorkerId};
use rota_lease::RunStatus;

use crate::error::Result;
use crate::types::RunRecord;

/// Initialise the run-history schema in `conn`.
///
/// Creates the `job_runs` table (idempotent) plus indexes for the two query
/// shapes: recent runs of one job, and retention pruning by age.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS job_runs (
            id             TEXT    NOT NULL PRIMARY KEY,
            job_name       TEXT    NOT NULL,
            worker_id      TEXT    NOT NULL,
            started_at_ms  INTEGER NOT NULL,
            finished_at_ms INTEGER NOT NULL,
            status         TEXT    NOT NULL,
            error          TEXT,
            duration_ms    INTEGER NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_runs_job ON job_runs (job_name, started_at_ms DESC);
        CREATE INDEX IF NOT EXISTS idx_runs_started ON job_runs (started_at_ms);
        ",
    )?;
    Ok(())
}

/// Append-only execution history, one row per finished run.
///
/// Uses its own `Connection` so history writes never contend with the lease
/// table's claim statements.
pub struct RunHistory {
    db: Mutex<Connection>,
}

impl RunHistory {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn record(&self, run: &RunRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO job_runs
             (id, job_name, worker_id, started_at_ms, finished_at_ms, status, error, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                run.id,
                run.job_name.as_str(),
                run.worker_id.as_str(),
                epoch_ms(run.started_at),
                epoch_ms(run.finished_at),
                run.status.to_string(),
                run.error,
                run.duration_ms
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first, optionally filtered to one job.
    pub fn recent(&self, job: Option<&JobName>, limit: usize) -> Result<Vec<RunRecord>> {
        let db = self.db.lock().unwrap();
        let mut records = Vec::new();
        match job {
            Some(name) => {
                let mut stmt = db.prepare(
                    "SELECT id, job_name, worker_id, started_at_ms, finished_at_ms,
                            status, error, duration_ms
                     FROM job_runs WHERE job_name = ?1
                     ORDER BY started_at_ms DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![name.as_str(), limit as i64],
                    row_to_record,
                )?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(
                    "SELECT id, job_name, worker_id, started_at_ms, finished_at_ms,
                            status, error, duration_ms
                     FROM job_runs ORDER BY started_at_ms DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    }

    /// Delete runs that started before `cutoff`. Returns rows removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM job_runs WHERE started_at_ms < ?1",
            rusqlite::params![epoch_ms(cutoff)],
        )?;
        Ok(n)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let name: String = row.get(1)?;
    let job_name = JobName::new(&name).map_err(|e| conversion_err(1, e))?;
    let status: String = row.get(5)?;
    let status: RunStatus = status.parse().map_err(|e: String| conversion_err(5, e))?;
    Ok(RunRecord {
        id: row.get(0)?,
        job_name,
        worker_id: WorkerId::from(row.get::<_, String>(2)?),
        started_at: from_epoch_ms(row.get(3)?),
        finished_at: from_epoch_ms(row.get(4)?),
        status,
        error: row.get(6)?,
        duration_ms: row.get(7)?,
    })
}

fn conversion_err(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}
