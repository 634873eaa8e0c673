use rusqlite::Connection;

use crate::error::Result;

/// Initialise the lease schema in `conn`.
///
/// Creates the `job_leases` table (idempotent) and an index on `next_due_at_ms`
/// so the due-job scan stays efficient with thousands of registered jobs.
/// All timestamps are stored as integer epoch milliseconds; comparing them in
/// SQL is then plain integer arithmetic.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS job_leases (
            job_name         TEXT    NOT NULL PRIMARY KEY,
            schedule         TEXT,               -- JSON-encoded Schedule, NULL for plain locks
            owner_id         TEXT,               -- NULL when unowned
            acquired_at_ms   INTEGER,
            expires_at_ms    INTEGER,            -- lease deadline, epoch ms
            next_due_at_ms   INTEGER,            -- window marker, NULL when schedule exhausted
            last_run_at_ms   INTEGER,            -- completion time of last successful run
            last_status      TEXT    NOT NULL DEFAULT 'pending',
            last_error       TEXT,
            last_duration_ms INTEGER,
            run_count        INTEGER NOT NULL DEFAULT 0,
            missed_windows   INTEGER NOT NULL DEFAULT 0,
            created_at_ms    INTEGER NOT NULL,
            updated_at_ms    INTEGER NOT NULL
        ) STRICT;

        -- Efficient due scan: SELECT … WHERE next_due_at_ms <= ?
        CREATE INDEX IF NOT EXISTS idx_leases_next_due ON job_leases (next_due_at_ms);
        ",
    )?;
    Ok(())
}
