use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ExecutorError;
use crate::types::jobs::status::SPAWN_FAILURE_CODE;
use crate::types::jobs::template::{CommandContext, CommandTemplate};
use crate::types::jobs::{ClassificationRules, Job, JobName, Status, StatusClass};
use crate::utils::fs::remove_if_exists;

/// Commands configured for one job type.
#[derive(Debug, Clone)]
pub struct WorkerCommands {
    pub normal: CommandTemplate,
    /// Present when this instance can escalate to the large-machine variant.
    pub large: Option<CommandTemplate>,
}

/// Runs the worker command of a locked job and reports its exit status.
#[derive(Debug, Clone)]
pub struct Executor {
    local_id: String,
    commands: HashMap<JobName, WorkerCommands>,
    rules: ClassificationRules,
}

impl Executor {
    pub fn new(local_id: impl Into<String>, commands: HashMap<JobName, WorkerCommands>, rules: ClassificationRules) -> Self {
        Self { local_id: local_id.into(), commands, rules }
    }

    pub fn rules(&self) -> &ClassificationRules {
        &self.rules
    }

    /// Runs `job` and returns exactly one status for it.
    ///
    /// A job that is not yet large and fails with a code of the local retry set is re-run right
    /// away with the large command, and the second status is returned instead.
    pub async fn run(&self, job: &Job, cancel: &CancellationToken) -> Status {
        let Some(commands) = self.commands.get(&job.name()) else {
            error!(job = %job.name(), "No worker command configured for job type");
            return Status::new(SPAWN_FAILURE_CODE);
        };

        let in_files = job.input_paths();
        let out_files = job.tmp_output_paths(&self.local_id);

        if job.is_large() {
            let template = commands.large.as_ref().unwrap_or(&commands.normal);
            return self.run_template(template, job, &in_files, &out_files, cancel).await;
        }

        let status = self.run_template(&commands.normal, job, &in_files, &out_files, cancel).await;
        let Some(large) = commands.large.as_ref() else { return status };
        if !job.definition.allow_large_escalation || status.classify(&self.rules) != StatusClass::TransientRetry {
            return status;
        }

        info!(exit_code = status.exit_code, "Retrying locally with the large command");
        for partial in &out_files {
            if let Err(e) = remove_if_exists(partial) {
                warn!(file = %partial.display(), error = %e, "Failed to remove partial output before large retry");
            }
        }
        self.run_template(large, job, &in_files, &out_files, cancel).await
    }

    async fn run_template(
        &self,
        template: &CommandTemplate,
        job: &Job,
        in_files: &[PathBuf],
        out_files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Status {
        let job_name: &'static str = job.name().into();
        let ctx = CommandContext { job: job_name, start: job.start(), end: job.end(), in_files, out_files };
        match self.run_command(template, &ctx, cancel).await {
            Ok(status) => status,
            Err(e) => {
                error!(error = %e, "Worker command could not be run");
                Status::new(SPAWN_FAILURE_CODE)
            }
        }
    }

    async fn run_command(
        &self,
        template: &CommandTemplate,
        ctx: &CommandContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Status, ExecutorError> {
        let command = template.render(ctx)?;
        debug!(command = %command, "Running worker command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutorError::Spawn { command: command.clone(), source })?;

        tokio::select! {
            status = child.wait() => Ok(Status::new(exit_code_of(status.map_err(ExecutorError::Wait)?))),
            _ = cancel.cancelled() => {
                warn!("Killing worker command on controller request");
                if let Err(e) = child.kill().await {
                    error!(error = %e, "Failed to kill worker command");
                }
                Ok(Status::new(self.rules.killed_by_scheduler_code))
            }
        }
    }
}

/// Exit code of a finished process. A process killed by a signal reports `128 + signal`,
/// as a shell would, so an OOM kill reads as 137.
fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => SPAWN_FAILURE_CODE,
    }
}
