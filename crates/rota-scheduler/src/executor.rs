use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use rota_core::WorkerId;
use rota_lease::{CompletionUpdate, LockStore};

use crate::db::RunHistory;
use crate::recurrence::advance_window;
use crate::types::{JobContext, JobDefinition, JobError, RunRecord, RunSummary};

/// Drive one claimed job to the end: run the body, renew the lease on a
/// heartbeat while it runs, abort the body the moment the lease is lost,
/// then write the outcome and the advanced window marker back in a single
/// owner-guarded statement.
///
/// Timestamps are `claimed_at` plus measured elapsed time, never a fresh
/// wall-clock read, so an engine driven by fabricated tick instants stays
/// consistent all the way through completion.
pub(crate) async fn run_claimed_job(
    store: Arc<dyn LockStore>,
    history: Arc<RunHistory>,
    def: JobDefinition,
    worker: WorkerId,
    claimed_at: DateTime<Utc>,
    renew_every: StdDuration,
) -> RunSummary {
    let clock = Instant::now();
    let ctx = JobContext {
        job_name: def.name.clone(),
        worker_id: worker.clone(),
        started_at: claimed_at,
    };
    info!(job = %def.name, worker = %worker, "job started");

    let body = AssertUnwindSafe(def.handler.execute(&ctx)).catch_unwind();
    tokio::pin!(body);
    let mut renew =
        tokio::time::interval_at(tokio::time::Instant::now() + renew_every, renew_every);

    // `lease_lost` stops us from writing a completion we no longer own.
    let mut lease_lost = false;
    let result: std::result::Result<(), JobError> = loop {
        tokio::select! {
            res = &mut body => {
                break match res {
                    Ok(inner) => inner,
                    Err(_) => Err(JobError::msg("job body panicked")),
                };
            }
            _ = renew.tick() => {
                let now = claimed_at + elapsed(clock);
                match store.renew(&def.name, &worker, def.lease, now) {
                    Ok(true) => debug!(job = %def.name, "lease renewed"),
                    Ok(false) => {
                        warn!(job = %def.name, "lease lost mid-run, aborting body");
                        lease_lost = true;
                        break Err(JobError::msg("lease lost during run"));
                    }
                    Err(e) => {
                        // Can't prove we still hold it; abort rather than
                        // run past an expiry another worker may reclaim.
                        warn!(job = %def.name, error = %e, "lease renewal failed, aborting body");
                        break Err(JobError::msg(format!("lease renewal failed: {e}")));
                    }
                }
            }
        }
    };

    let finished_at = claimed_at + elapsed(clock);
    let duration_ms = (finished_at - claimed_at).num_milliseconds();
    let (next_due, missed) = advance_window(&def.schedule, claimed_at, finished_at);
    let update = match &result {
        Ok(()) => CompletionUpdate::success(claimed_at, finished_at, next_due),
        Err(e) => CompletionUpdate::failure(e.to_string(), claimed_at, finished_at, next_due),
    }
    .with_missed_windows(missed);

    if lease_lost {
        // The window stays unconsumed for whoever took (or takes) the lease.
        warn!(job = %def.name, "run aborted, outcome not written to lease row");
    } else {
        match store.complete(&def.name, &worker, &update, finished_at) {
            Ok(true) => match &result {
                Ok(()) => {
                    info!(job = %def.name, duration_ms, next_due = ?next_due, "job finished")
                }
                Err(e) => warn!(job = %def.name, duration_ms, error = %e, "job failed"),
            },
            Ok(false) => warn!(job = %def.name, "lease lost before completion, outcome not recorded"),
            Err(e) => error!(job = %def.name, error = %e, "failed to record completion"),
        }
    }

    let record = RunRecord {
        id: uuid::Uuid::new_v4().to_string(),
        job_name: def.name.clone(),
        worker_id: worker,
        started_at: claimed_at,
        finished_at,
        status: update.status,
        error: update.error.clone(),
        duration_ms,
    };
    if let Err(e) = history.record(&record) {
        warn!(job = %def.name, error = %e, "failed to write run history");
    }

    RunSummary {
        job_name: def.name,
        status: update.status,
        duration_ms,
    }
}

fn elapsed(clock: Instant) -> Duration {
    Duration::from_std(clock.elapsed()).unwrap_or_else(|_| Duration::zero())
}
