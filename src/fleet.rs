//! Fleet orchestration: bounded fan-out of the per-host pipeline
//!
//! One independent unit of work per host. ssh2 is a blocking library,
//! so each host's pipeline runs on the blocking pool; the async side
//! only bounds concurrency and collects results in completion order.

use crate::error::{FleetError, Result};
use crate::executor::JobExecutor;
use crate::models::{ExecutionResult, HostDescriptor, RemoteJob, StderrPolicy};
use crate::observer::{JobObserver, TracingObserver};
use crate::parser::{validate_hosts, validate_job};
use crate::session::SessionFactory;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Flips the shared cancellation flag for one orchestrator. In-flight
/// hosts stop before their next stage; queued hosts never start one.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Fans one [`RemoteJob`] out across a set of hosts
pub struct FleetOrchestrator {
    factory: Arc<dyn SessionFactory>,
    observer: Arc<dyn JobObserver>,
    stderr_policy: StderrPolicy,
    cancel: Arc<AtomicBool>,
}

impl FleetOrchestrator {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            observer: Arc::new(TracingObserver),
            stderr_policy: StderrPolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_stderr_policy(mut self, policy: StderrPolicy) -> Self {
        self.stderr_policy = policy;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: self.cancel.clone(),
        }
    }

    /// Run the job on every host, at most `limit` concurrently
    /// (default: one worker per host). Returns exactly one result per
    /// host, in completion order; per-host failures never abort the
    /// run. Only validation fails the call itself, before any host is
    /// contacted.
    pub async fn run(
        &self,
        job: RemoteJob,
        hosts: Vec<HostDescriptor>,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionResult>> {
        validate_job(&job)?;
        validate_hosts(&hosts)?;
        std::fs::create_dir_all(&job.local_output_dir).map_err(|e| {
            FleetError::Validation(format!(
                "cannot create local output directory {}: {e}",
                job.local_output_dir.display()
            ))
        })?;

        let limit = limit.unwrap_or(hosts.len()).max(1);
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            hosts = hosts.len(),
            limit,
            script = %job.script.display(),
            "starting fleet run"
        );

        let executor = Arc::new(JobExecutor::new(
            Arc::new(job),
            self.factory.clone(),
            self.observer.clone(),
            self.stderr_policy,
            run_id,
            self.cancel.clone(),
        ));

        let results: Vec<ExecutionResult> = stream::iter(hosts)
            .map(|host| {
                let executor = executor.clone();
                async move {
                    let identity = host.id();
                    let started_at = Utc::now();
                    match tokio::task::spawn_blocking(move || executor.execute(&host)).await {
                        Ok(result) => result,
                        // A dead worker still owes its host a result.
                        Err(join_err) => {
                            warn!(host = %identity, "host worker died: {join_err}");
                            ExecutionResult::worker_failure(
                                identity,
                                started_at,
                                join_err.to_string(),
                            )
                        }
                    }
                }
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            %run_id,
            total = results.len(),
            succeeded,
            failed = results.len() - succeeded,
            "fleet run complete"
        );

        Ok(results)
    }
}
