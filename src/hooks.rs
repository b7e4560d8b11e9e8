//! Post-update maintenance and hook scripts.
//!
//! After every clone or fetch three steps run, one after another:
//!
//! 1. `git gc --auto` inside the mirror
//! 2. the mirror's own `hooks/post-fetch`
//! 3. the server-wide `bin/post-fetch`
//!
//! Each step only runs when its gate path exists. Hooks are advisory, so a
//! failing step never stops the ones after it.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::MirrorConfig;
use crate::events::{EventKind, EventSink, MirrorEvent};
use crate::process::{CommandSpec, ExecutionResult, ProcessRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStep {
    Gc,
    LocalPostFetch,
    GlobalPostFetch,
}

impl HookStep {
    pub fn name(&self) -> &'static str {
        match self {
            HookStep::Gc => "gc",
            HookStep::LocalPostFetch => "hooks/post-fetch",
            HookStep::GlobalPostFetch => "bin/post-fetch",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Gate path absent; nothing was spawned.
    Skipped,
    Exited(ExecutionResult),
    SpawnFailed,
}

/// A command that only runs when `gate` exists.
#[derive(Debug, Clone)]
pub struct ConditionalStep {
    pub step: HookStep,
    pub gate: PathBuf,
    pub command: CommandSpec,
}

impl ConditionalStep {
    pub async fn run(
        &self,
        runner: &dyn ProcessRunner,
        sink: &dyn EventSink,
        section: &str,
    ) -> StepOutcome {
        match tokio::fs::metadata(&self.gate).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return StepOutcome::Skipped,
            // only a missing gate is silent; anything else gets attempted and reported
            Err(e) => debug!("Cannot stat {}: {}", self.gate.display(), e),
        }

        let completion = match runner.spawn(&self.command) {
            Ok(completion) => completion,
            Err(e) => {
                sink.emit(MirrorEvent::new(
                    section,
                    EventKind::SpawnFailed {
                        command: self.command.to_string(),
                        error: e.to_string(),
                    },
                ));
                return StepOutcome::SpawnFailed;
            }
        };

        let result = completion.await;
        sink.emit(MirrorEvent::new(
            section,
            EventKind::StepExited {
                step: self.step,
                result: result.clone(),
            },
        ));
        StepOutcome::Exited(result)
    }
}

#[derive(Debug, Clone)]
pub struct HookSequencer {
    steps: Vec<ConditionalStep>,
}

impl HookSequencer {
    pub fn new(steps: Vec<ConditionalStep>) -> Self {
        Self { steps }
    }

    /// The standard gc / local hook / global hook sequence for `mirror_path`.
    /// `input` goes to both hooks on stdin.
    pub fn for_mirror(config: &MirrorConfig, mirror_path: &Path, input: &str) -> Self {
        let local_hook = mirror_path.join("hooks").join("post-fetch");
        let global_hook = config.global_hook_path();

        Self::new(vec![
            ConditionalStep {
                step: HookStep::Gc,
                gate: mirror_path.to_path_buf(),
                command: CommandSpec::new(&config.git, mirror_path).args(["gc", "--auto"]),
            },
            ConditionalStep {
                step: HookStep::LocalPostFetch,
                gate: local_hook.clone(),
                command: CommandSpec::new(local_hook, mirror_path).stdin(input),
            },
            ConditionalStep {
                step: HookStep::GlobalPostFetch,
                gate: global_hook.clone(),
                command: CommandSpec::new(global_hook, mirror_path).stdin(input),
            },
        ])
    }

    pub fn steps(&self) -> &[ConditionalStep] {
        &self.steps
    }

    /// Run every step in order, each one only after the previous process
    /// has exited.
    pub async fn run(
        &self,
        runner: &dyn ProcessRunner,
        sink: &dyn EventSink,
        section: &str,
        operation_id: Uuid,
    ) -> Vec<StepOutcome> {
        let mut outcomes = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            outcomes.push(step.run(runner, sink, section).await);
        }
        sink.emit(MirrorEvent::new(
            section,
            EventKind::HooksFinished { operation_id },
        ));
        outcomes
    }
}
