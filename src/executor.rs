//! Per-host pipeline: connect, stage the script, execute, probe for the
//! artifact, retrieve it
//!
//! The pipeline is strictly sequential within a host. Any stage can end
//! the run; the failure is folded into the host's [`ExecutionResult`]
//! and never escapes to the caller. The session is closed on every exit
//! path, including cancellation.

use crate::error::{FleetError, Result};
use crate::models::{
    ExecutionResult, HostDescriptor, RemoteJob, RunStatus, Stage, StderrPolicy,
};
use crate::observer::{JobObserver, StageEvent, StageOutcome};
use crate::session::{ExecOutput, HostSession, SessionFactory};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Drives one [`HostSession`] through the full pipeline for one job
pub struct JobExecutor {
    job: Arc<RemoteJob>,
    factory: Arc<dyn SessionFactory>,
    observer: Arc<dyn JobObserver>,
    stderr_policy: StderrPolicy,
    run_id: Uuid,
    cancel: Arc<AtomicBool>,
}

struct PipelineState {
    stage: Stage,
    output_found: bool,
    stderr: String,
    artifact: Option<std::path::PathBuf>,
}

impl JobExecutor {
    pub fn new(
        job: Arc<RemoteJob>,
        factory: Arc<dyn SessionFactory>,
        observer: Arc<dyn JobObserver>,
        stderr_policy: StderrPolicy,
        run_id: Uuid,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            job,
            factory,
            observer,
            stderr_policy,
            run_id,
            cancel,
        }
    }

    /// Run the full pipeline against one host. Every outcome, including
    /// a failure at the first stage, becomes exactly one result.
    pub fn execute(&self, host: &HostDescriptor) -> ExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut session = self.factory.create(host, &self.job);
        let mut state = PipelineState {
            stage: Stage::Init,
            output_found: false,
            stderr: String::new(),
            artifact: None,
        };

        let outcome = self.drive(session.as_mut(), host, &mut state);
        session.close();

        let (status, error) = match outcome {
            Ok(()) => (RunStatus::Success, None),
            Err(err) => (err.status_class(), Some(err.to_string())),
        };

        ExecutionResult {
            host: host.id(),
            stage: state.stage,
            status,
            output_found: state.output_found,
            stderr: state.stderr,
            artifact: state.artifact,
            error,
            started_at,
            duration: start.elapsed(),
        }
    }

    fn drive(
        &self,
        session: &mut dyn HostSession,
        host: &HostDescriptor,
        state: &mut PipelineState,
    ) -> Result<()> {
        self.checkpoint(host, Stage::Connected)?;
        self.try_stage(host, Stage::Connected, session.connect())?;
        self.advance(state, host, Stage::Connected);

        self.checkpoint(host, Stage::Uploaded)?;
        self.try_stage(
            host,
            Stage::Uploaded,
            session.ensure_remote_dir(&self.job.remote_script_dir),
        )?;
        self.try_stage(
            host,
            Stage::Uploaded,
            session.upload(&self.job.script, &self.job.remote_script_path()),
        )?;
        self.advance(state, host, Stage::Uploaded);

        self.checkpoint(host, Stage::Executed)?;
        let output = self.try_stage(
            host,
            Stage::Executed,
            session.execute(
                &self.job.invocation(),
                Duration::from_secs(self.job.exec_timeout),
            ),
        )?;
        let host_id = host.id();
        for line in output.stdout.lines() {
            self.observer.script_output(&host_id, line);
        }
        state.stderr = output.stderr.clone();
        self.try_stage(host, Stage::Executed, self.judge_execution(host, &output))?;
        self.advance(state, host, Stage::Executed);

        self.checkpoint(host, Stage::OutputFound)?;
        let remote_output = self.job.remote_output_path(&host.address);
        let found = self.try_stage(
            host,
            Stage::OutputFound,
            session.exists(&remote_output),
        )?;
        if !found {
            // Absent artifact is a normal completion, not a failure.
            self.emit(
                host,
                Stage::OutputFound,
                StageOutcome::Skipped,
                Some(format!("output file {remote_output} absent")),
            );
            return Ok(());
        }
        state.output_found = true;
        self.advance(state, host, Stage::OutputFound);

        self.checkpoint(host, Stage::Downloaded)?;
        let local = self.job.local_artifact_path(&host.address);
        self.try_stage(
            host,
            Stage::Downloaded,
            session.download(&remote_output, &local),
        )?;
        state.artifact = Some(local);
        self.advance(state, host, Stage::Downloaded);

        Ok(())
    }

    /// Apply the configured execution-outcome policy.
    fn judge_execution(&self, host: &HostDescriptor, output: &ExecOutput) -> Result<()> {
        match self.stderr_policy {
            StderrPolicy::AnyStderr => {
                if !output.stderr.trim().is_empty() {
                    return Err(FleetError::RemoteExecution {
                        host: host.address.clone(),
                        detail: output.stderr.trim().to_string(),
                    });
                }
                Ok(())
            }
            StderrPolicy::ExitCode => {
                if output.exit_code != 0 {
                    let stderr = output.stderr.trim();
                    let detail = if stderr.is_empty() {
                        format!("exit code {}", output.exit_code)
                    } else {
                        format!("exit code {}: {stderr}", output.exit_code)
                    };
                    return Err(FleetError::RemoteExecution {
                        host: host.address.clone(),
                        detail,
                    });
                }
                Ok(())
            }
        }
    }

    /// Stop before the next stage once the run is canceled; the caller
    /// still closes the session.
    fn checkpoint(&self, host: &HostDescriptor, next: Stage) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            self.emit(
                host,
                next,
                StageOutcome::Skipped,
                Some("run canceled".to_string()),
            );
            return Err(FleetError::Canceled);
        }
        Ok(())
    }

    fn try_stage<T>(&self, host: &HostDescriptor, stage: Stage, result: Result<T>) -> Result<T> {
        result.map_err(|err| {
            self.emit(host, stage, StageOutcome::Failed, Some(err.to_string()));
            err
        })
    }

    fn advance(&self, state: &mut PipelineState, host: &HostDescriptor, stage: Stage) {
        state.stage = stage;
        self.emit(host, stage, StageOutcome::Ok, None);
    }

    fn emit(
        &self,
        host: &HostDescriptor,
        stage: Stage,
        outcome: StageOutcome,
        detail: Option<String>,
    ) {
        self.observer.stage_event(&StageEvent {
            run_id: self.run_id,
            host: host.id(),
            stage,
            outcome,
            detail,
        });
    }
}
