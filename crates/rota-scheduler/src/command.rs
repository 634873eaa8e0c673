use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::types::{JobContext, JobError, JobHandler};

/// Longest stderr slice kept in the recorded error message.
const MAX_STDERR_CHARS: usize = 500;

/// Job body that runs an external command, the handler behind `[[jobs]]`
/// config entries.
///
/// The command inherits the worker's environment plus `ROTA_JOB_NAME` and
/// `ROTA_WORKER_ID`. A non-zero exit status becomes a run failure carrying
/// the exit code and a stderr excerpt.
pub struct CommandJob {
    argv: Vec<String>,
}

impl CommandJob {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(SchedulerError::InvalidJob(
                "command must name a program to run".to_string(),
            ));
        }
        Ok(Self { argv })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

#[async_trait]
impl JobHandler for CommandJob {
    async fn execute(&self, ctx: &JobContext) -> std::result::Result<(), JobError> {
        debug!(job = %ctx.job_name, program = %self.argv[0], "spawning command");
        let output = tokio::process::Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .env("ROTA_JOB_NAME", ctx.job_name.as_str())
            .env("ROTA_WORKER_ID", ctx.worker_id.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
        Err(JobError::msg(format!("{}: {excerpt}", output.status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rota_core::{JobName, WorkerId};

    fn ctx() -> JobContext {
        JobContext {
            job_name: JobName::new("cmd-test").unwrap(),
            worker_id: WorkerId::from("test-worker"),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn rejects_empty_argv() {
        assert!(CommandJob::new(vec![]).is_err());
        assert!(CommandJob::new(vec!["  ".to_string()]).is_err());
    }

    #[tokio::test]
    async fn successful_command_is_ok() {
        let job = CommandJob::new(vec!["true".to_string()]).unwrap();
        assert!(job.execute(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn failing_command_reports_exit_status() {
        let job = CommandJob::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo nope >&2; exit 3".to_string(),
        ])
        .unwrap();
        let err = job.execute(&ctx()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit status: 3"), "got: {msg}");
        assert!(msg.contains("nope"), "got: {msg}");
    }

    #[tokio::test]
    async fn missing_program_is_an_io_error() {
        let job = CommandJob::new(vec!["definitely-not-a-real-binary-0xE4".to_string()]).unwrap();
        assert!(matches!(
            job.execute(&ctx()).await,
            Err(JobError::Io(_))
        ));
    }
}
