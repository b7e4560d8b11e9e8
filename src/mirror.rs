//! Clone-or-update decision for a single mirror.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::completion::{CompletionProtocol, Reply};
use crate::error::{MirrorError, Result};
use crate::events::{EventKind, EventSink, MirrorEvent};
use crate::hooks::HookSequencer;
use crate::process::CommandSpec;
use crate::section::Section;
use crate::webhook::{Payload, hook_input};
use crate::{AppState, MirrorConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Unknown,
    Creating,
    Updating,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
}

impl OperationKind {
    pub fn verb(&self) -> &'static str {
        match self {
            OperationKind::Create => "creating",
            OperationKind::Update => "updating",
        }
    }
}

/// Tracks one request's mirror from the first stat to the primary
/// process exiting.
///
/// There is no lock per mirror: two machines for the same section may run
/// at once.
pub struct MirrorStateMachine {
    operation_id: Uuid,
    section: Section,
    mirror_path: PathBuf,
    state: MirrorState,
    sink: Arc<dyn EventSink>,
}

impl MirrorStateMachine {
    pub fn new(base: &Path, section: Section, sink: Arc<dyn EventSink>) -> Self {
        let mirror_path = section.mirror_path(base);
        Self {
            operation_id: Uuid::now_v7(),
            section,
            mirror_path,
            state: MirrorState::Unknown,
            sink,
        }
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    pub fn section(&self) -> &Section {
        &self.section
    }

    pub fn mirror_path(&self) -> &Path {
        &self.mirror_path
    }

    pub fn state(&self) -> MirrorState {
        self.state
    }

    /// Stat the mirror directory and build the primary command.
    ///
    /// A missing mirror with no payload can not be cloned; the machine stays
    /// `Unknown` and `MissingPayload` is returned.
    pub async fn resolve(
        &mut self,
        config: &MirrorConfig,
        payload: Option<&Payload>,
    ) -> Result<(OperationKind, CommandSpec)> {
        let exists = tokio::fs::metadata(&self.mirror_path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        if exists {
            self.transition(MirrorState::Updating);
            return Ok((OperationKind::Update, update_command(config, &self.mirror_path)));
        }

        let payload = payload.ok_or_else(|| MirrorError::MissingPayload {
            section: self.section.to_string(),
        })?;
        self.transition(MirrorState::Creating);
        Ok((
            OperationKind::Create,
            create_command(config, &self.mirror_path, payload),
        ))
    }

    /// The primary process exited, whatever its status.
    pub fn finish(&mut self) {
        self.transition(MirrorState::Ready);
    }

    fn transition(&mut self, state: MirrorState) {
        self.state = state;
        self.sink.emit(MirrorEvent::new(
            self.section.as_str(),
            EventKind::Transition {
                operation_id: self.operation_id,
                state,
            },
        ));
    }
}

/// `git clone --mirror --bare <url> <path>`, run from the base directory.
pub fn create_command(config: &MirrorConfig, mirror_path: &Path, payload: &Payload) -> CommandSpec {
    CommandSpec::new(&config.git, &config.base_dir).args([
        "clone".to_string(),
        "--mirror".to_string(),
        "--bare".to_string(),
        payload.clone_url(&config.git_host),
        mirror_path.to_string_lossy().into_owned(),
    ])
}

/// `git remote update -p`, run inside the mirror.
pub fn update_command(config: &MirrorConfig, mirror_path: &Path) -> CommandSpec {
    CommandSpec::new(&config.git, mirror_path).args(["remote", "update", "-p"])
}

/// Bring `section` up to date: clone it if missing, otherwise fetch, then
/// hand the running process to the completion protocol.
pub async fn sync_mirror(
    state: &AppState,
    section: Section,
    payload: Option<Payload>,
    backgrounded: bool,
) -> Result<Reply> {
    if let Some(p) = &payload {
        info!("Processing {}", p.full_name());
    }

    let mut machine = MirrorStateMachine::new(&state.config.base_dir, section, state.sink.clone());
    let (operation, command) = machine.resolve(&state.config, payload.as_ref()).await?;

    let completion = state.runner.spawn(&command).inspect_err(|e| {
        state.sink.emit(MirrorEvent::new(
            machine.section().as_str(),
            EventKind::SpawnFailed {
                command: command.to_string(),
                error: e.to_string(),
            },
        ));
    })?;

    let hooks = HookSequencer::for_mirror(
        &state.config,
        machine.mirror_path(),
        &hook_input(payload.as_ref()),
    );

    let protocol = CompletionProtocol {
        machine,
        operation,
        hooks,
        runner: state.runner.clone(),
        sink: state.sink.clone(),
    };
    Ok(protocol.complete(completion, backgrounded).await)
}
