//! Structured stage events emitted by the per-host pipeline
//!
//! The executor never writes to a console. Every stage transition goes
//! through an injected [`JobObserver`]; the default implementation
//! forwards to the tracing subscriber.

use crate::models::{HostId, Stage};
use tracing::{info, warn};
use uuid::Uuid;

/// How a stage transition ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Stage completed and the pipeline moved on
    Ok,
    /// Stage was not attempted or had nothing to do (absent artifact,
    /// canceled run)
    Skipped,
    /// Stage failed and ended the host's pipeline
    Failed,
}

/// One stage transition on one host
#[derive(Debug, Clone)]
pub struct StageEvent {
    pub run_id: Uuid,
    pub host: HostId,
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub detail: Option<String>,
}

/// Sink for pipeline events, injected into the executor
pub trait JobObserver: Send + Sync {
    fn stage_event(&self, event: &StageEvent);

    /// Remote stdout, one line at a time, as captured from the host.
    fn script_output(&self, host: &HostId, line: &str) {
        let _ = (host, line);
    }
}

/// Default observer: forwards events to tracing
pub struct TracingObserver;

impl JobObserver for TracingObserver {
    fn stage_event(&self, event: &StageEvent) {
        match event.outcome {
            StageOutcome::Ok => info!(
                run_id = %event.run_id,
                host = %event.host,
                stage = %event.stage,
                "stage complete"
            ),
            StageOutcome::Skipped => info!(
                run_id = %event.run_id,
                host = %event.host,
                stage = %event.stage,
                detail = event.detail.as_deref().unwrap_or(""),
                "stage skipped"
            ),
            StageOutcome::Failed => warn!(
                run_id = %event.run_id,
                host = %event.host,
                stage = %event.stage,
                detail = event.detail.as_deref().unwrap_or(""),
                "stage failed"
            ),
        }
    }

    fn script_output(&self, host: &HostId, line: &str) {
        info!(host = %host, "script output: {line}");
    }
}

/// Observer that drops every event. Useful for embedding and tests.
pub struct NullObserver;

impl JobObserver for NullObserver {
    fn stage_event(&self, _event: &StageEvent) {}
}
