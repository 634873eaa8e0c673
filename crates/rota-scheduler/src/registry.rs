use std::sync::Arc;

use tracing::debug;

use rota_core::config::RotaConfig;
use rota_core::JobName;

use crate::command::CommandJob;
use crate::error::{Result, SchedulerError};
use crate::recurrence::validate_schedule;
use crate::types::{JobDefinition, OverlapPolicy};

/// The explicit registration table handed to an engine at startup.
///
/// Entries come from `[[jobs]]` config tables, from code, or both. All
/// registration-time validation lives here: duplicate names, schedules that
/// don't parse, empty commands and unsupported overlap policies are rejected
/// while building the registry, before any engine touches the store.
pub struct JobRegistry {
    defs: Vec<JobDefinition>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self { defs: Vec::new() }
    }

    /// Build a registry from the `[[jobs]]` entries of a loaded config.
    /// Every entry becomes a [`CommandJob`] definition.
    pub fn from_config(config: &RotaConfig) -> Result<Self> {
        let mut registry = Self::new();
        for entry in &config.jobs {
            let name = JobName::new(&entry.name)
                .map_err(|e| SchedulerError::InvalidJob(e.to_string()))?;
            let overlap = match &entry.overlap {
                Some(s) => s.parse::<OverlapPolicy>().map_err(SchedulerError::InvalidJob)?,
                None => OverlapPolicy::SkipIfRunning,
            };
            let handler = CommandJob::new(entry.command.clone())?;

            let lease_secs = entry
                .lease_secs
                .unwrap_or(config.scheduler.default_lease_secs);
            let mut def = JobDefinition::new(name, entry.schedule.clone(), Arc::new(handler))
                .with_overlap(overlap)
                .with_lease_secs(lease_secs);
            if !entry.enabled {
                def = def.disabled();
            }
            registry.add(def)?;
        }
        debug!(jobs = registry.len(), "registry built from config");
        Ok(registry)
    }

    /// Validate and append one definition.
    pub fn add(&mut self, def: JobDefinition) -> Result<()> {
        check_definition(&self.defs, &def)?;
        self.defs.push(def);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn definitions(&self) -> &[JobDefinition] {
        &self.defs
    }

    pub fn into_definitions(self) -> Vec<JobDefinition> {
        self.defs
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Manual impl because [`JobDefinition`] holds a non-`Debug` handler object.
impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("defs", &self.defs.len())
            .finish()
    }
}

/// Shared registration checks, also applied by the engine for definitions
/// registered directly in code.
pub(crate) fn check_definition(existing: &[JobDefinition], def: &JobDefinition) -> Result<()> {
    if existing.iter().any(|j| j.name == def.name) {
        return Err(SchedulerError::DuplicateJob {
            name: def.name.to_string(),
        });
    }
    validate_schedule(&def.schedule)?;
    if def.overlap != OverlapPolicy::SkipIfRunning {
        return Err(SchedulerError::UnsupportedOverlap {
            name: def.name.to_string(),
            policy: def.overlap.to_string(),
        });
    }
    Ok(())
}
