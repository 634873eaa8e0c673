use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use rota_core::{epoch_ms, from_epoch_ms, JobName, Schedule, WorkerId};

use crate::error::Result;
use crate::types::{AcquireOutcome, CompletionUpdate, JobLease, RunStatus};

/// The durable lock contract every worker in the fleet goes through.
///
/// One row per job name; ownership changes only inside single conditional
/// SQL statements, so the database decides every race. Callers must treat
/// any `Err` as "I do not hold the lock": a failed write never grants or
/// keeps ownership.
///
/// All methods take `now` explicitly. Production passes wall-clock time,
/// tests pass fabricated instants.
pub trait LockStore: Send + Sync {
    /// Ensure a row exists for `job`. Returns true when this call created it;
    /// an existing row is left untouched, in particular its window marker.
    fn register(
        &self,
        job: &JobName,
        schedule: Option<&Schedule>,
        next_due_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Overwrite the stored schedule (and re-anchor the window marker) when
    /// it differs from `schedule`. Returns true when a change was written.
    fn sync_schedule(
        &self,
        job: &JobName,
        schedule: &Schedule,
        next_due_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Claim `job` regardless of its window: succeeds when the row is absent,
    /// unowned, expired, or already owned by `owner` (re-entrant extend).
    fn try_acquire(
        &self,
        job: &JobName,
        owner: &WorkerId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome>;

    /// Claim `job` only if its window has opened and nobody holds a live
    /// lease. The due check sits inside the same statement as the claim, so
    /// two workers racing on one window can't both get it.
    fn try_acquire_due(
        &self,
        job: &JobName,
        owner: &WorkerId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome>;

    /// Push the deadline to `now + lease`. False when the lease is no longer
    /// this owner's to renew (expired or taken over).
    fn renew(
        &self,
        job: &JobName,
        owner: &WorkerId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Clear ownership if `owner` still holds the row. Run bookkeeping is
    /// untouched; finishing runs go through [`LockStore::complete`].
    fn release(&self, job: &JobName, owner: &WorkerId, now: DateTime<Utc>) -> Result<bool>;

    /// Record a finished run and give the lease up in one statement: status,
    /// error, duration, advanced window marker, run counters. False when the
    /// lease was lost before completion (the row then belongs to someone
    /// else and is left alone).
    fn complete(
        &self,
        job: &JobName,
        owner: &WorkerId,
        update: &CompletionUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Current state of one lease row.
    fn read(&self, job: &JobName) -> Result<Option<JobLease>>;

    /// All lease rows, ordered by job name.
    fn list(&self) -> Result<Vec<JobLease>>;

    /// Operator override: clear ownership no matter who holds it. The next
    /// claim attempt wins the job immediately.
    fn force_release(&self, job: &JobName, now: DateTime<Utc>) -> Result<bool>;
}

/// [`LockStore`] over a shared SQLite file.
///
/// Thread-safe: wraps the connection in a Mutex. Cross-process exclusion
/// comes from SQLite itself; every ownership change is one conditional
/// UPDATE/UPSERT that either hits or misses atomically.
pub struct SqliteLockStore {
    db: Mutex<Connection>,
}

impl SqliteLockStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }
}

impl LockStore for SqliteLockStore {
    fn register(
        &self,
        job: &JobName,
        schedule: Option<&Schedule>,
        next_due_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let schedule_json = schedule.map(serde_json::to_string).transpose()?;
        let inserted = db.execute(
            "INSERT INTO job_leases (job_name, schedule, next_due_at_ms, last_status,
                                     created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)
             ON CONFLICT(job_name) DO NOTHING",
            rusqlite::params![
                job.as_str(),
                schedule_json,
                next_due_at.map(epoch_ms),
                epoch_ms(now)
            ],
        )?;
        if inserted > 0 {
            debug!(job = %job, next_due = ?next_due_at, "job registered");
        }
        Ok(inserted > 0)
    }

    fn sync_schedule(
        &self,
        job: &JobName,
        schedule: &Schedule,
        next_due_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let schedule_json = serde_json::to_string(schedule)?;
        let changed = db.execute(
            "UPDATE job_leases
             SET schedule = ?2, next_due_at_ms = ?3, updated_at_ms = ?4
             WHERE job_name = ?1 AND schedule IS NOT ?2",
            rusqlite::params![
                job.as_str(),
                schedule_json,
                next_due_at.map(epoch_ms),
                epoch_ms(now)
            ],
        )?;
        if changed > 0 {
            debug!(job = %job, next_due = ?next_due_at, "schedule changed, marker re-anchored");
        }
        Ok(changed > 0)
    }

    fn try_acquire(
        &self,
        job: &JobName,
        owner: &WorkerId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome> {
        let db = self.db.lock().unwrap();
        let expires_at = now + lease;
        let claimed = db.execute(
            "INSERT INTO job_leases (job_name, owner_id, acquired_at_ms, expires_at_ms,
                                     last_status, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, 'running', ?3, ?3)
             ON CONFLICT(job_name) DO UPDATE SET
                 owner_id       = excluded.owner_id,
                 acquired_at_ms = excluded.acquired_at_ms,
                 expires_at_ms  = excluded.expires_at_ms,
                 last_status    = 'running',
                 updated_at_ms  = excluded.updated_at_ms
             WHERE job_leases.owner_id IS NULL
                OR job_leases.owner_id = excluded.owner_id
                OR job_leases.expires_at_ms IS NULL
                OR job_leases.expires_at_ms <= excluded.acquired_at_ms",
            rusqlite::params![
                job.as_str(),
                owner.as_str(),
                epoch_ms(now),
                epoch_ms(expires_at)
            ],
        )?;
        if claimed > 0 {
            debug!(job = %job, owner = %owner, "lease acquired");
            return Ok(AcquireOutcome::Acquired { expires_at });
        }
        classify_miss(&db, job, now)
    }

    fn try_acquire_due(
        &self,
        job: &JobName,
        owner: &WorkerId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome> {
        let db = self.db.lock().unwrap();
        let expires_at = now + lease;
        // No same-owner arm here: a row we already hold means our previous
        // run is still live, and overlapping it would break exclusion.
        let claimed = db.execute(
            "UPDATE job_leases SET
                 owner_id       = ?2,
                 acquired_at_ms = ?3,
                 expires_at_ms  = ?4,
                 last_status    = 'running',
                 updated_at_ms  = ?3
             WHERE job_name = ?1
               AND next_due_at_ms IS NOT NULL
               AND next_due_at_ms <= ?3
               AND (owner_id IS NULL
                    OR expires_at_ms IS NULL
                    OR expires_at_ms <= ?3)",
            rusqlite::params![
                job.as_str(),
                owner.as_str(),
                epoch_ms(now),
                epoch_ms(expires_at)
            ],
        )?;
        if claimed > 0 {
            debug!(job = %job, owner = %owner, "due window claimed");
            return Ok(AcquireOutcome::Acquired { expires_at });
        }
        classify_miss(&db, job, now)
    }

    fn renew(
        &self,
        job: &JobName,
        owner: &WorkerId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        // An already-expired lease can't be revived: someone else may have
        // claimed the job the moment the deadline passed.
        let renewed = db.execute(
            "UPDATE job_leases
             SET expires_at_ms = ?3, updated_at_ms = ?4
             WHERE job_name = ?1 AND owner_id = ?2 AND expires_at_ms > ?4",
            rusqlite::params![
                job.as_str(),
                owner.as_str(),
                epoch_ms(now + lease),
                epoch_ms(now)
            ],
        )?;
        Ok(renewed > 0)
    }

    fn release(&self, job: &JobName, owner: &WorkerId, now: DateTime<Utc>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let released = db.execute(
            "UPDATE job_leases
             SET owner_id = NULL, acquired_at_ms = NULL, expires_at_ms = NULL,
                 updated_at_ms = ?3
             WHERE job_name = ?1 AND owner_id = ?2",
            rusqlite::params![job.as_str(), owner.as_str(), epoch_ms(now)],
        )?;
        Ok(released > 0)
    }

    fn complete(
        &self,
        job: &JobName,
        owner: &WorkerId,
        update: &CompletionUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let duration_ms = (update.finished_at - update.started_at)
            .num_milliseconds()
            .max(0);
        // last_run_at only tracks successful completions.
        let success_at_ms = match update.status {
            RunStatus::Success => Some(epoch_ms(update.finished_at)),
            _ => None,
        };
        let written = db.execute(
            "UPDATE job_leases SET
                 owner_id         = NULL,
                 acquired_at_ms   = NULL,
                 expires_at_ms    = NULL,
                 last_status      = ?3,
                 last_error       = ?4,
                 last_run_at_ms   = COALESCE(?5, last_run_at_ms),
                 last_duration_ms = ?6,
                 next_due_at_ms   = ?7,
                 run_count        = run_count + 1,
                 missed_windows   = missed_windows + ?8,
                 updated_at_ms    = ?9
             WHERE job_name = ?1 AND owner_id = ?2",
            rusqlite::params![
                job.as_str(),
                owner.as_str(),
                update.status.to_string(),
                update.error,
                success_at_ms,
                duration_ms,
                update.next_due_at.map(epoch_ms),
                update.missed_windows,
                epoch_ms(now)
            ],
        )?;
        Ok(written > 0)
    }

    fn read(&self, job: &JobName) -> Result<Option<JobLease>> {
        let db = self.db.lock().unwrap();
        read_lease(&db, job)
    }

    fn list(&self) -> Result<Vec<JobLease>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {LEASE_COLUMNS} FROM job_leases ORDER BY job_name"
        ))?;
        let rows = stmt.query_map([], row_to_lease)?;
        let mut leases = Vec::new();
        for row in rows {
            leases.push(row?);
        }
        Ok(leases)
    }

    fn force_release(&self, job: &JobName, now: DateTime<Utc>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let released = db.execute(
            "UPDATE job_leases
             SET owner_id = NULL, acquired_at_ms = NULL, expires_at_ms = NULL,
                 updated_at_ms = ?2
             WHERE job_name = ?1 AND owner_id IS NOT NULL",
            rusqlite::params![job.as_str(), epoch_ms(now)],
        )?;
        Ok(released > 0)
    }
}

const LEASE_COLUMNS: &str = "job_name, schedule, owner_id, acquired_at_ms, expires_at_ms, \
     next_due_at_ms, last_run_at_ms, last_status, last_error, last_duration_ms, \
     run_count, missed_windows, created_at_ms, updated_at_ms";

/// Explain why a claim attempt changed no rows.
///
/// The row may move under us between the claim statement and this read;
/// the classification is advisory (it feeds logs and tick reports), the
/// claim itself already settled atomically.
fn classify_miss(db: &Connection, job: &JobName, now: DateTime<Utc>) -> Result<AcquireOutcome> {
    match read_lease(db, job)? {
        None => Ok(AcquireOutcome::Unregistered),
        Some(lease) if lease.is_held(now) => Ok(AcquireOutcome::Held {
            // is_held() guarantees owner_id is set
            owner_id: lease.owner_id.unwrap_or_else(|| WorkerId::from("unknown")),
            expires_at: lease.expires_at,
        }),
        Some(lease) => Ok(AcquireOutcome::NotDue {
            next_due_at: lease.next_due_at,
        }),
    }
}

fn read_lease(db: &Connection, job: &JobName) -> Result<Option<JobLease>> {
    let lease = db
        .query_row(
            &format!("SELECT {LEASE_COLUMNS} FROM job_leases WHERE job_name = ?1"),
            rusqlite::params![job.as_str()],
            row_to_lease,
        )
        .optional()?;
    Ok(lease)
}

fn row_to_lease(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobLease> {
    let name: String = row.get(0)?;
    let job_name = JobName::new(&name).map_err(|e| conversion_err(0, e))?;
    let schedule: Option<Schedule> = row
        .get::<_, Option<String>>(1)?
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| conversion_err(1, e))?;
    let status: String = row.get(7)?;
    let last_status: RunStatus = status.parse().map_err(|e: String| conversion_err(7, e))?;
    Ok(JobLease {
        job_name,
        schedule,
        owner_id: row.get::<_, Option<String>>(2)?.map(WorkerId::from),
        acquired_at: row.get::<_, Option<i64>>(3)?.map(from_epoch_ms),
        expires_at: row.get::<_, Option<i64>>(4)?.map(from_epoch_ms),
        next_due_at: row.get::<_, Option<i64>>(5)?.map(from_epoch_ms),
        last_run_at: row.get::<_, Option<i64>>(6)?.map(from_epoch_ms),
        last_status,
        last_error: row.get(8)?,
        last_duration_ms: row.get(9)?,
        run_count: row.get(10)?,
        missed_windows: row.get(11)?,
        created_at: from_epoch_ms(row.get(12)?),
        updated_at: from_epoch_ms(row.get(13)?),
    })
}

fn conversion_err(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Barrier};

    fn mem_store() -> SqliteLockStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SqliteLockStore::new(conn)
    }

    fn file_store(path: &std::path::Path) -> SqliteLockStore {
        let conn = Connection::open(path).unwrap();
        conn.pragma_update(None, "journal_mode", "WAL").unwrap();
        conn.pragma_update(None, "busy_timeout", 5000).unwrap();
        crate::db::init_db(&conn).unwrap();
        SqliteLockStore::new(conn)
    }

    fn job(name: &str) -> JobName {
        JobName::new(name).unwrap()
    }

    fn worker(name: &str) -> WorkerId {
        WorkerId::from(name)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn mins(n: i64) -> Duration {
        Duration::minutes(n)
    }

    #[test]
    fn acquire_free_lock() {
        let store = mem_store();
        let outcome = store
            .try_acquire(&job("invoices"), &worker("a"), mins(10), t0())
            .unwrap();
        assert!(outcome.is_acquired());

        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.owner_id, Some(worker("a")));
        assert_eq!(lease.last_status, RunStatus::Running);
        assert_eq!(lease.expires_at, Some(t0() + mins(10)));
    }

    #[test]
    fn held_lock_rejects_second_worker() {
        let store = mem_store();
        store
            .try_acquire(&job("invoices"), &worker("a"), mins(10), t0())
            .unwrap();

        let outcome = store
            .try_acquire(&job("invoices"), &worker("b"), mins(10), t0() + mins(1))
            .unwrap();
        match outcome {
            AcquireOutcome::Held { owner_id, .. } => assert_eq!(owner_id, worker("a")),
            other => panic!("expected Held, got {other:?}"),
        }
        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.owner_id, Some(worker("a")));
    }

    #[test]
    fn same_owner_reacquire_extends() {
        let store = mem_store();
        store
            .try_acquire(&job("invoices"), &worker("a"), mins(10), t0())
            .unwrap();
        let outcome = store
            .try_acquire(&job("invoices"), &worker("a"), mins(10), t0() + mins(5))
            .unwrap();
        assert!(outcome.is_acquired());

        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.expires_at, Some(t0() + mins(15)));
    }

    #[test]
    fn expired_lease_is_reclaimable() {
        let store = mem_store();
        store
            .try_acquire(&job("invoices"), &worker("a"), mins(10), t0())
            .unwrap();

        // one second past the deadline
        let later = t0() + mins(10) + Duration::seconds(1);
        let outcome = store
            .try_acquire(&job("invoices"), &worker("b"), mins(10), later)
            .unwrap();
        assert!(outcome.is_acquired());

        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.owner_id, Some(worker("b")));
    }

    #[test]
    fn release_requires_ownership() {
        let store = mem_store();
        store
            .try_acquire(&job("invoices"), &worker("a"), mins(10), t0())
            .unwrap();

        assert!(!store.release(&job("invoices"), &worker("b"), t0()).unwrap());
        assert_eq!(
            store.read(&job("invoices")).unwrap().unwrap().owner_id,
            Some(worker("a"))
        );

        assert!(store.release(&job("invoices"), &worker("a"), t0()).unwrap());
        assert_eq!(store.read(&job("invoices")).unwrap().unwrap().owner_id, None);

        // second release is a no-op
        assert!(!store.release(&job("invoices"), &worker("a"), t0()).unwrap());
    }

    #[test]
    fn renew_extends_only_live_leases() {
        let store = mem_store();
        store
            .try_acquire(&job("invoices"), &worker("a"), mins(10), t0())
            .unwrap();

        assert!(store
            .renew(&job("invoices"), &worker("a"), mins(10), t0() + mins(5))
            .unwrap());
        assert_eq!(
            store.read(&job("invoices")).unwrap().unwrap().expires_at,
            Some(t0() + mins(15))
        );

        // way past the renewed deadline
        assert!(!store
            .renew(&job("invoices"), &worker("a"), mins(10), t0() + mins(60))
            .unwrap());
    }

    #[test]
    fn lost_lease_cannot_renew_or_complete() {
        let store = mem_store();
        store
            .try_acquire(&job("invoices"), &worker("a"), mins(10), t0())
            .unwrap();

        // a's lease expires, b takes over
        let later = t0() + mins(11);
        assert!(store
            .try_acquire(&job("invoices"), &worker("b"), mins(10), later)
            .unwrap()
            .is_acquired());

        assert!(!store
            .renew(&job("invoices"), &worker("a"), mins(10), later)
            .unwrap());
        let update = CompletionUpdate::success(t0(), later, None);
        assert!(!store
            .complete(&job("invoices"), &worker("a"), &update, later)
            .unwrap());

        // b's lease is untouched by a's stale writes
        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.owner_id, Some(worker("b")));
        assert_eq!(lease.run_count, 0);
    }

    #[test]
    fn register_is_idempotent_and_keeps_marker() {
        let store = mem_store();
        let sched = Schedule::Daily { hour: 0, minute: 30 };
        let first_due = t0() + mins(30);

        assert!(store
            .register(&job("invoices"), Some(&sched), Some(first_due), t0())
            .unwrap());
        assert!(!store
            .register(
                &job("invoices"),
                Some(&sched),
                Some(t0() + mins(90)),
                t0() + mins(1)
            )
            .unwrap());

        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.next_due_at, Some(first_due));
        assert_eq!(lease.last_status, RunStatus::Pending);
        assert_eq!(lease.schedule, Some(sched));
    }

    #[test]
    fn sync_schedule_rewrites_only_on_change() {
        let store = mem_store();
        let daily = Schedule::Daily { hour: 0, minute: 30 };
        store
            .register(&job("invoices"), Some(&daily), Some(t0() + mins(30)), t0())
            .unwrap();

        assert!(!store
            .sync_schedule(&job("invoices"), &daily, Some(t0() + mins(99)), t0())
            .unwrap());
        assert_eq!(
            store.read(&job("invoices")).unwrap().unwrap().next_due_at,
            Some(t0() + mins(30))
        );

        let hourly = Schedule::Interval { every_secs: 3600 };
        assert!(store
            .sync_schedule(&job("invoices"), &hourly, Some(t0() + mins(60)), t0())
            .unwrap());
        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.schedule, Some(hourly));
        assert_eq!(lease.next_due_at, Some(t0() + mins(60)));
    }

    #[test]
    fn completion_overrides_a_mid_run_schedule_edit() {
        let store = mem_store();
        let sched = Schedule::Interval { every_secs: 600 };
        store
            .register(&job("rollup"), Some(&sched), Some(t0()), t0())
            .unwrap();
        store
            .try_acquire_due(&job("rollup"), &worker("a"), mins(10), t0())
            .unwrap();

        // operator re-anchors to an hourly cadence while the run is live
        let hourly = Schedule::Interval { every_secs: 3600 };
        assert!(store
            .sync_schedule(
                &job("rollup"),
                &hourly,
                Some(t0() + mins(60)),
                t0() + mins(1)
            )
            .unwrap());

        // the in-flight run still advances the marker from the schedule it
        // was claimed under; the edit takes effect at the next completed run
        let finished = t0() + mins(2);
        let update = CompletionUpdate::success(t0(), finished, Some(t0() + mins(10)));
        assert!(store
            .complete(&job("rollup"), &worker("a"), &update, finished)
            .unwrap());

        let lease = store.read(&job("rollup")).unwrap().unwrap();
        assert_eq!(lease.schedule, Some(hourly));
        assert_eq!(lease.next_due_at, Some(t0() + mins(10)));
    }

    #[test]
    fn due_claim_respects_window() {
        let store = mem_store();
        let sched = Schedule::Interval { every_secs: 1800 };
        let due_at = t0() + mins(30);
        store
            .register(&job("rollup"), Some(&sched), Some(due_at), t0())
            .unwrap();

        match store
            .try_acquire_due(&job("rollup"), &worker("a"), mins(10), t0())
            .unwrap()
        {
            AcquireOutcome::NotDue { next_due_at } => assert_eq!(next_due_at, Some(due_at)),
            other => panic!("expected NotDue, got {other:?}"),
        }

        assert!(store
            .try_acquire_due(&job("rollup"), &worker("a"), mins(10), due_at)
            .unwrap()
            .is_acquired());
    }

    #[test]
    fn due_claim_on_unregistered_job() {
        let store = mem_store();
        let outcome = store
            .try_acquire_due(&job("ghost"), &worker("a"), mins(10), t0())
            .unwrap();
        assert!(matches!(outcome, AcquireOutcome::Unregistered));
    }

    #[test]
    fn due_claim_never_overlaps_a_live_run() {
        let store = mem_store();
        let sched = Schedule::Interval { every_secs: 300 };
        store
            .register(&job("rollup"), Some(&sched), Some(t0()), t0())
            .unwrap();
        assert!(store
            .try_acquire_due(&job("rollup"), &worker("a"), mins(10), t0())
            .unwrap()
            .is_acquired());

        // marker unchanged while running, but the live lease blocks everyone,
        // including the owner itself
        for w in ["a", "b"] {
            let outcome = store
                .try_acquire_due(&job("rollup"), &worker(w), mins(10), t0() + mins(5))
                .unwrap();
            assert!(
                matches!(outcome, AcquireOutcome::Held { .. }),
                "worker {w} got {outcome:?}"
            );
        }
    }

    #[test]
    fn complete_records_run_and_frees_lease() {
        let store = mem_store();
        let sched = Schedule::Daily { hour: 9, minute: 0 };
        store
            .register(&job("invoices"), Some(&sched), Some(t0()), t0())
            .unwrap();
        store
            .try_acquire_due(&job("invoices"), &worker("a"), mins(10), t0())
            .unwrap();

        let finished = t0() + Duration::seconds(42);
        let next_due = t0() + Duration::days(1);
        let update = CompletionUpdate::success(t0(), finished, Some(next_due));
        assert!(store
            .complete(&job("invoices"), &worker("a"), &update, finished)
            .unwrap());

        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.owner_id, None);
        assert_eq!(lease.last_status, RunStatus::Success);
        assert_eq!(lease.last_run_at, Some(finished));
        assert_eq!(lease.last_duration_ms, Some(42_000));
        assert_eq!(lease.next_due_at, Some(next_due));
        assert_eq!(lease.run_count, 1);
        assert_eq!(lease.missed_windows, 0);
    }

    #[test]
    fn failed_run_consumes_window_too() {
        let store = mem_store();
        let sched = Schedule::Daily { hour: 9, minute: 0 };
        store
            .register(&job("invoices"), Some(&sched), Some(t0()), t0())
            .unwrap();
        store
            .try_acquire_due(&job("invoices"), &worker("a"), mins(10), t0())
            .unwrap();

        let finished = t0() + Duration::seconds(3);
        let next_due = t0() + Duration::days(1);
        let update =
            CompletionUpdate::failure("exit status 1", t0(), finished, Some(next_due));
        assert!(store
            .complete(&job("invoices"), &worker("a"), &update, finished)
            .unwrap());

        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.last_status, RunStatus::Failure);
        assert_eq!(lease.last_error.as_deref(), Some("exit status 1"));
        // never succeeded, so no last_run_at; the window still advanced
        assert_eq!(lease.last_run_at, None);
        assert_eq!(lease.next_due_at, Some(next_due));

        // not claimable again until the next window opens
        let outcome = store
            .try_acquire_due(&job("invoices"), &worker("b"), mins(10), t0() + mins(30))
            .unwrap();
        assert!(matches!(outcome, AcquireOutcome::NotDue { .. }));
    }

    #[test]
    fn exactly_one_of_many_workers_acquires() {
        let store = Arc::new(mem_store());
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                let owner = worker(&format!("w{i}"));
                barrier.wait();
                store
                    .try_acquire(&job("contested"), &owner, mins(10), t0())
                    .unwrap()
                    .is_acquired()
            }));
        }
        let acquired = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(acquired, 1);

        let lease = store.read(&job("contested")).unwrap().unwrap();
        assert!(lease.owner_id.is_some());
    }

    #[test]
    fn force_release_clears_any_owner() {
        let store = mem_store();
        store
            .try_acquire(&job("invoices"), &worker("a"), mins(10), t0())
            .unwrap();

        assert!(store.force_release(&job("invoices"), t0()).unwrap());
        assert!(store
            .try_acquire(&job("invoices"), &worker("b"), mins(10), t0())
            .unwrap()
            .is_acquired());

        // no-op on an unowned row
        store.release(&job("invoices"), &worker("b"), t0()).unwrap();
        assert!(!store.force_release(&job("invoices"), t0()).unwrap());
    }

    #[test]
    fn separate_connections_share_the_table() {
        let path = std::env::temp_dir().join(format!("rota-lease-{}.db", uuid::Uuid::new_v4()));
        {
            let store_a = file_store(&path);
            let store_b = file_store(&path);

            assert!(store_a
                .try_acquire(&job("invoices"), &worker("a"), mins(10), t0())
                .unwrap()
                .is_acquired());
            let outcome = store_b
                .try_acquire(&job("invoices"), &worker("b"), mins(10), t0() + mins(1))
                .unwrap();
            assert!(matches!(outcome, AcquireOutcome::Held { .. }));

            // ownership transfers cleanly across connections after release
            assert!(store_a
                .release(&job("invoices"), &worker("a"), t0() + mins(2))
                .unwrap());
            assert!(store_b
                .try_acquire(&job("invoices"), &worker("b"), mins(10), t0() + mins(3))
                .unwrap()
                .is_acquired());
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn list_orders_by_name() {
        let store = mem_store();
        for name in ["zeta", "alpha", "mid"] {
            store.register(&job(name), None, None, t0()).unwrap();
        }
        let names: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|l| l.job_name.to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
