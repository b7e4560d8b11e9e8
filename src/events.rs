//! Structured events emitted while mirrors are updated and hooks run.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::hooks::HookStep;
use crate::mirror::{MirrorState, OperationKind};
use crate::process::{ExecutionResult, labeled};

#[derive(Debug, Clone)]
pub struct MirrorEvent {
    pub timestamp: DateTime<Utc>,
    pub section: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    /// The request never reached a process.
    Rejected { reason: String },
    Transition {
        operation_id: Uuid,
        state: MirrorState,
    },
    PrimaryExited {
        operation_id: Uuid,
        operation: OperationKind,
        backgrounded: bool,
        result: ExecutionResult,
    },
    SpawnFailed { command: String, error: String },
    StepExited {
        step: HookStep,
        result: ExecutionResult,
    },
    HooksFinished { operation_id: Uuid },
}

impl MirrorEvent {
    pub fn new(section: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            section: section.into(),
            kind,
        }
    }
}

/// Destination for [`MirrorEvent`]s.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: MirrorEvent);
}

/// Renders events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: MirrorEvent) {
        let section = &event.section;
        match &event.kind {
            EventKind::Rejected { reason } => {
                warn!("Rejected request for {:?}: {}", section, reason);
            }
            EventKind::Transition {
                operation_id,
                state,
            } => {
                debug!("[{}] {} is now {:?}", operation_id, section, state);
            }
            EventKind::PrimaryExited {
                operation_id,
                operation,
                backgrounded,
                result,
            } => {
                info!(
                    "[{}] {} child process {} {} completed with exit code {}",
                    operation_id,
                    if *backgrounded { "bg" } else { "fg" },
                    operation.verb(),
                    section,
                    result.exit_code
                );
                log_failed_output(result);
            }
            EventKind::SpawnFailed { command, error } => {
                error!("Could not run '{}' for {}: {}", command, section, error);
            }
            EventKind::StepExited { step, result } => {
                info!(
                    "{} for {} exited with code {}",
                    step.name(),
                    section,
                    result.exit_code
                );
                log_failed_output(result);
            }
            EventKind::HooksFinished { operation_id } => {
                debug!("[{}] hooks finished for {}", operation_id, section);
            }
        }
    }
}

fn log_failed_output(result: &ExecutionResult) {
    if !result.success() {
        warn!("{}", labeled("stderr", &result.stderr));
        warn!("{}", labeled("stdout", &result.stdout));
    }
}
