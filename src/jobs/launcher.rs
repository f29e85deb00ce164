//! Process Job Launcher
//!
//! Runs each job's command steps as child processes on a spawned task so the
//! event loop never waits on them. The job is visible in the [`JobTable`]
//! while it runs.

use super::table::JobTable;
use crate::domain::ports::{JobHandle, JobLauncher, JobOutcome, JobSpec};
use crate::error::{Error, Result};
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Launches jobs as child processes
pub struct ProcessJobLauncher {
    table: Arc<JobTable>,
}

impl ProcessJobLauncher {
    pub fn new(table: Arc<JobTable>) -> Self {
        Self { table }
    }
}

impl JobLauncher for ProcessJobLauncher {
    fn spawn_job(&self, spec: JobSpec) -> Result<JobHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| Error::JobLaunch {
            operation: spec.operation.to_string(),
            reason: e.to_string(),
        })?;

        let job = self.table.start(spec.operation, spec.objects.clone());
        let (tx, rx) = oneshot::channel();
        let table = self.table.clone();
        let id = job.id;

        info!(
            "Starting {} {} on {} for uid {}",
            spec.operation, id, spec.target_owner, spec.caller.uid
        );

        runtime.spawn(async move {
            let outcome = run_steps(&spec.command.steps()).await;
            table.finish(id);
            if outcome.success {
                info!("{} {} completed", spec.operation, id);
            } else {
                warn!("{} {} failed: {}", spec.operation, id, outcome.message);
            }
            let _ = tx.send(outcome);
        });

        Ok(JobHandle { id, completion: rx })
    }
}

/// Run steps in order, stopping at the first failure
pub async fn run_steps(steps: &[Vec<String>]) -> JobOutcome {
    for step in steps {
        let Some((program, args)) = step.split_first() else {
            continue;
        };
        debug!("Running {} {:?}", program, args);

        match Command::new(program).args(args).output().await {
            Ok(output) if output.status.success() => {}
            Ok(output) => return JobOutcome::failed(failure_message(program, &output)),
            Err(e) => return JobOutcome::failed(format!("Error spawning {}: {}", program, e)),
        }
    }
    JobOutcome::succeeded()
}

fn failure_message(program: &str, output: &Output) -> String {
    let status = match output.status.code() {
        Some(code) => format!("exited with non-zero exit status {}", code),
        None => "was terminated by a signal".to_string(),
    };
    format!(
        "{} {}: {}\n{}",
        program,
        status,
        String::from_utf8_lossy(&output.stderr).trim_end(),
        String::from_utf8_lossy(&output.stdout).trim_end()
    )
}
