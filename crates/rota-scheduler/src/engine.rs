use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use rota_core::config::SchedulerConfig;
use rota_core::WorkerId;
use rota_lease::{AcquireOutcome, LockStore};

use crate::db::RunHistory;
use crate::error::Result;
use crate::executor::run_claimed_job;
use crate::recurrence::next_occurrence;
use crate::registry::{check_definition, JobRegistry};
use crate::types::{JobDefinition, SkipReason, SkippedJob, TickReport};

/// Engine pacing and lease policy, derived from the `[scheduler]` config table.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Cadence of the external tick in [`SchedulerEngine::run`].
    pub tick_interval: StdDuration,
    /// Heartbeat cadence while a job body runs. `None` means a third of the
    /// job's lease duration.
    pub renew_interval: Option<StdDuration>,
    /// Run-history rows older than this are pruned.
    pub history_retention: Duration,
}

impl EngineSettings {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            tick_interval: StdDuration::from_secs(cfg.tick_interval_secs.max(1)),
            renew_interval: cfg.renew_interval_secs.map(StdDuration::from_secs),
            history_retention: Duration::days(cfg.history_retention_days as i64),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Coordinates every registered job against the shared lease table.
///
/// The engine never decides "is it time?" on its own: each tick it offers
/// every job to the store, and the store's conditional claim settles both
/// due-ness and exclusion. Crashed peers need no handling here: their
/// leases expire and the next tick picks the work up.
pub struct SchedulerEngine {
    store: Arc<dyn LockStore>,
    history: Arc<RunHistory>,
    worker: WorkerId,
    settings: EngineSettings,
    jobs: Vec<JobDefinition>,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn LockStore>,
        history: Arc<RunHistory>,
        worker: WorkerId,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            history,
            worker,
            settings,
            jobs: Vec::new(),
        }
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    pub fn jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }

    /// Add a job to this engine's registration set, applying the same checks
    /// a [`crate::registry::JobRegistry`] applies when built from config.
    pub fn register_job(&mut self, def: JobDefinition) -> Result<()> {
        check_definition(&self.jobs, &def)?;
        info!(job = %def.name, enabled = def.enabled, "job registered");
        self.jobs.push(def);
        Ok(())
    }

    /// Register every definition in `registry`.
    pub fn register_all(&mut self, registry: JobRegistry) -> Result<()> {
        for def in registry.into_definitions() {
            self.register_job(def)?;
        }
        Ok(())
    }

    /// One scheduling pass at instant `now`.
    ///
    /// Registers rows on first sight (anchoring their window strictly after
    /// `now`, so pre-registration windows never fire), offers each enabled
    /// job to the store, and runs whatever was claimed to completion before
    /// returning. A store error anywhere counts as "not acquired".
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut skipped = Vec::new();
        let mut claimed = Vec::new();

        for def in &self.jobs {
            let anchor = next_occurrence(&def.schedule, now);
            match self.store.register(&def.name, Some(&def.schedule), anchor, now) {
                Ok(true) => info!(job = %def.name, next_due = ?anchor, "lease row created"),
                Ok(false) => {
                    // An edit landing while another worker is mid-run gets its
                    // re-anchored marker overwritten by that run's completion;
                    // the new schedule governs from the next completed run on.
                    if let Err(e) = self.store.sync_schedule(&def.name, &def.schedule, anchor, now)
                    {
                        warn!(job = %def.name, error = %e, "schedule sync failed");
                    }
                }
                Err(e) => {
                    error!(job = %def.name, error = %e, "registration failed, skipping claim");
                    skipped.push(SkippedJob {
                        job_name: def.name.clone(),
                        reason: SkipReason::StoreError,
                    });
                    continue;
                }
            }

            if !def.enabled {
                skipped.push(SkippedJob {
                    job_name: def.name.clone(),
                    reason: SkipReason::Disabled,
                });
                continue;
            }

            match self
                .store
                .try_acquire_due(&def.name, &self.worker, def.lease, now)
            {
                Ok(AcquireOutcome::Acquired { .. }) => claimed.push(def.clone()),
                Ok(AcquireOutcome::Held { owner_id, .. }) => {
                    debug!(job = %def.name, held_by = %owner_id, "window held elsewhere");
                    skipped.push(SkippedJob {
                        job_name: def.name.clone(),
                        reason: SkipReason::Held,
                    });
                }
                Ok(AcquireOutcome::NotDue { .. }) => skipped.push(SkippedJob {
                    job_name: def.name.clone(),
                    reason: SkipReason::NotDue,
                }),
                Ok(AcquireOutcome::Unregistered) => {
                    warn!(job = %def.name, "row vanished between register and claim");
                    skipped.push(SkippedJob {
                        job_name: def.name.clone(),
                        reason: SkipReason::Unregistered,
                    });
                }
                Err(e) => {
                    error!(job = %def.name, error = %e, "claim failed, assuming not acquired");
                    skipped.push(SkippedJob {
                        job_name: def.name.clone(),
                        reason: SkipReason::StoreError,
                    });
                }
            }
        }

        let handles: Vec<_> = claimed
            .into_iter()
            .map(|def| {
                let renew_every = self
                    .settings
                    .renew_interval
                    .unwrap_or_else(|| renew_cadence(def.lease));
                tokio::spawn(run_claimed_job(
                    Arc::clone(&self.store),
                    Arc::clone(&self.history),
                    def,
                    self.worker.clone(),
                    now,
                    renew_every,
                ))
            })
            .collect();

        let mut ran = Vec::new();
        for joined in join_all(handles).await {
            match joined {
                Ok(summary) => ran.push(summary),
                Err(e) => error!(error = %e, "job executor task failed"),
            }
        }

        match self.history.prune_older_than(now - self.settings.history_retention) {
            Ok(0) => {}
            Ok(n) => debug!(pruned = n, "old run history removed"),
            Err(e) => warn!(error = %e, "history prune failed"),
        }

        TickReport { at: now, ran, skipped }
    }

    /// Main loop: one pass per tick interval until `shutdown` broadcasts true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.worker, jobs = self.jobs.len(), "scheduler engine started");

        let mut interval = tokio::time::interval(self.settings.tick_interval);
        // Ticks that pile up behind a long pass are dropped, not bursted.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick_at(Utc::now()).await;
                    if !report.ran.is_empty() {
                        info!(ran = report.ran.len(), "tick complete");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn renew_cadence(lease: Duration) -> StdDuration {
    StdDuration::from_secs((lease.num_seconds() / 3).max(1) as u64)
}
