use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Schedule;

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60; // external tick cadence
pub const DEFAULT_LEASE_SECS: u64 = 600; // lease duration when a job doesn't set its own
pub const DEFAULT_HISTORY_RETENTION_DAYS: u32 = 90; // job_runs rows older than this are pruned

/// Top-level config (rota.toml + ROTA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotaConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Jobs declared in config as `[[jobs]]` tables. Each runs a command
    /// under a lease; code-registered handlers are added by the embedding
    /// binary on top of these.
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

impl Default for RotaConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            jobs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Fixed worker identity. When unset a unique one is derived per process
    /// from hostname, pid and a random suffix.
    pub worker_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Lease duration applied to jobs that don't declare their own.
    #[serde(default = "default_lease_secs")]
    pub default_lease_secs: u64,
    /// Seconds between lease renewals while a job body runs.
    /// Defaults to a third of the job's lease duration.
    pub renew_interval_secs: Option<u64>,
    /// Days of run history to keep before pruning.
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            default_lease_secs: DEFAULT_LEASE_SECS,
            renew_interval_secs: None,
            history_retention_days: DEFAULT_HISTORY_RETENTION_DAYS,
        }
    }
}

/// A single config-declared job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    /// Job name, shared across every worker that registers this job.
    pub name: String,
    /// When the job runs.
    pub schedule: Schedule,
    /// Command argv to execute, e.g. `["sh", "-c", "billing-cli invoice"]`.
    pub command: Vec<String>,
    /// Per-job lease duration override in seconds.
    pub lease_secs: Option<u64>,
    /// Disabled jobs stay registered but are never claimed.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Overlap policy name; defaults to skip-if-running, the only policy
    /// the scheduler accepts.
    #[serde(default)]
    pub overlap: Option<String>,
}

fn bool_true() -> bool {
    true
}

fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_lease_secs() -> u64 {
    DEFAULT_LEASE_SECS
}
fn default_history_retention_days() -> u32 {
    DEFAULT_HISTORY_RETENTION_DAYS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rota/rota.db", home)
}

impl RotaConfig {
    /// Load config from a TOML file with ROTA_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ROTA_CONFIG env var
    ///   3. ~/.rota/rota.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("ROTA_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        // figment treats a missing file as empty, not as an error
        if !std::path::Path::new(&path).exists() {
            warn!(path = %path, "config file not found, using defaults and ROTA_* overrides");
        }

        let config: RotaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ROTA_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        debug!(path = %path, jobs = config.jobs.len(), "config loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rota/rota.toml", home)
}
