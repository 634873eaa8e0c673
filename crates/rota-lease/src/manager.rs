use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use rota_core::{JobName, WorkerId};

use crate::error::Result;
use crate::store::LockStore;
use crate::types::{AcquireOutcome, CompletionUpdate};

/// Guard-based exclusion on top of a [`LockStore`].
///
/// `acquire` hands back a [`LeaseGuard`] on success. The guard releases the
/// lease when dropped, so a caller that panics or bails early doesn't leave
/// the job locked for the full lease duration.
pub struct LeaseManager {
    store: Arc<dyn LockStore>,
    owner: WorkerId,
    lease: Duration,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn LockStore>, owner: WorkerId, lease_secs: u64) -> Self {
        Self {
            store,
            owner,
            lease: Duration::seconds(lease_secs as i64),
        }
    }

    pub fn owner(&self) -> &WorkerId {
        &self.owner
    }

    /// Try to take `job` at `now`. `Ok(None)` means another worker holds a
    /// live lease on it; any `Err` also means the job was not acquired.
    pub fn acquire(&self, job: &JobName, now: DateTime<Utc>) -> Result<Option<LeaseGuard>> {
        match self.store.try_acquire(job, &self.owner, self.lease, now)? {
            AcquireOutcome::Acquired { expires_at } => Ok(Some(LeaseGuard::claimed(
                Arc::clone(&self.store),
                job.clone(),
                self.owner.clone(),
                expires_at,
            ))),
            AcquireOutcome::Held {
                owner_id,
                expires_at,
            } => {
                debug!(job = %job, held_by = %owner_id, ?expires_at, "lease busy");
                Ok(None)
            }
            // try_acquire claims regardless of window, so these don't occur
            AcquireOutcome::NotDue { .. } | AcquireOutcome::Unregistered => Ok(None),
        }
    }
}

/// A live claim on one job.
///
/// Every write through the guard is owner-guarded in SQL, so using a guard
/// whose lease has expired (and been taken over) turns into a no-op, never
/// into a write against the new owner's lease.
pub struct LeaseGuard {
    store: Arc<dyn LockStore>,
    job: JobName,
    owner: WorkerId,
    expires_at: DateTime<Utc>,
    released: bool,
}

impl LeaseGuard {
    /// Wrap a lease that was just claimed through the store.
    pub fn claimed(
        store: Arc<dyn LockStore>,
        job: JobName,
        owner: WorkerId,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            job,
            owner,
            expires_at,
            released: false,
        }
    }

    pub fn job(&self) -> &JobName {
        &self.job
    }

    pub fn owner(&self) -> &WorkerId {
        &self.owner
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Extend the lease to `now + lease`. False means it was already lost.
    pub fn renew(&mut self, lease: Duration, now: DateTime<Utc>) -> Result<bool> {
        let renewed = self.store.renew(&self.job, &self.owner, lease, now)?;
        if renewed {
            self.expires_at = now + lease;
        }
        Ok(renewed)
    }

    /// Record the run outcome and give the lease up in one statement. False
    /// means the lease was lost before completion and nothing was written.
    pub fn complete(mut self, update: &CompletionUpdate) -> Result<bool> {
        self.released = true;
        self.store
            .complete(&self.job, &self.owner, update, update.finished_at)
    }

    /// Give the lease up without recording a run.
    pub fn release(mut self, now: DateTime<Utc>) -> Result<bool> {
        self.released = true;
        self.store.release(&self.job, &self.owner, now)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.store.release(&self.job, &self.owner, Utc::now()) {
            Ok(true) => debug!(job = %self.job, "lease released on drop"),
            Ok(false) => {}
            Err(e) => warn!(job = %self.job, error = %e, "failed to release lease on drop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteLockStore;
    use crate::types::RunStatus;
    use chrono::TimeZone;
    use rusqlite::Connection;

    fn mem_store() -> Arc<dyn LockStore> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        Arc::new(SqliteLockStore::new(conn))
    }

    fn manager(store: &Arc<dyn LockStore>, name: &str) -> LeaseManager {
        LeaseManager::new(Arc::clone(store), WorkerId::from(name), 600)
    }

    fn job(name: &str) -> JobName {
        JobName::new(name).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn acquire_blocks_second_manager() {
        let store = mem_store();
        let a = manager(&store, "worker-a");
        let b = manager(&store, "worker-b");

        let guard = a.acquire(&job("invoices"), t0()).unwrap();
        assert!(guard.is_some());
        assert!(b.acquire(&job("invoices"), t0()).unwrap().is_none());
    }

    #[test]
    fn dropping_guard_frees_the_job() {
        let store = mem_store();
        let a = manager(&store, "worker-a");
        let b = manager(&store, "worker-b");

        {
            let _guard = a.acquire(&job("invoices"), t0()).unwrap().unwrap();
            assert!(b.acquire(&job("invoices"), t0()).unwrap().is_none());
        }

        assert!(b.acquire(&job("invoices"), t0()).unwrap().is_some());
    }

    #[test]
    fn explicit_release_frees_the_job() {
        let store = mem_store();
        let a = manager(&store, "worker-a");
        let b = manager(&store, "worker-b");

        let guard = a.acquire(&job("invoices"), t0()).unwrap().unwrap();
        assert!(guard.release(t0() + Duration::seconds(5)).unwrap());
        assert!(b.acquire(&job("invoices"), t0() + Duration::seconds(6)).unwrap().is_some());
    }

    #[test]
    fn renew_moves_the_deadline() {
        let store = mem_store();
        let a = manager(&store, "worker-a");

        let mut guard = a.acquire(&job("invoices"), t0()).unwrap().unwrap();
        assert_eq!(guard.expires_at(), t0() + Duration::seconds(600));

        let later = t0() + Duration::seconds(300);
        assert!(guard.renew(Duration::seconds(600), later).unwrap());
        assert_eq!(guard.expires_at(), later + Duration::seconds(600));
    }

    #[test]
    fn complete_writes_outcome_and_frees() {
        let store = mem_store();
        let a = manager(&store, "worker-a");

        let guard = a.acquire(&job("invoices"), t0()).unwrap().unwrap();
        let finished = t0() + Duration::seconds(30);
        let update = CompletionUpdate::success(t0(), finished, None);
        assert!(guard.complete(&update).unwrap());

        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.owner_id, None);
        assert_eq!(lease.last_status, RunStatus::Success);
        assert_eq!(lease.run_count, 1);
    }

    #[test]
    fn stale_guard_drop_leaves_new_owner_alone() {
        let store = mem_store();
        let a = LeaseManager::new(Arc::clone(&store), WorkerId::from("worker-a"), 10);
        let b = manager(&store, "worker-b");

        let guard = a.acquire(&job("invoices"), t0()).unwrap().unwrap();

        // a's 10s lease lapses and b claims the job; b's guard must stay
        // alive here, or its own drop would release the lease under test
        let later = t0() + Duration::seconds(11);
        let b_guard = b.acquire(&job("invoices"), later).unwrap();
        assert!(b_guard.is_some());

        drop(guard);
        let lease = store.read(&job("invoices")).unwrap().unwrap();
        assert_eq!(lease.owner_id, Some(WorkerId::from("worker-b")));
    }
}
