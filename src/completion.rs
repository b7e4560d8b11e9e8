//! Turning a running mirror process into an HTTP reply.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::oneshot;
use tracing::error;

use crate::events::{EventKind, EventSink, MirrorEvent};
use crate::hooks::HookSequencer;
use crate::mirror::{MirrorStateMachine, OperationKind};
use crate::plain_text;
use crate::process::{Completion, ExecutionResult, ProcessRunner, labeled_output};

/// Transport-neutral reply for one mirror request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: String,
}

impl Reply {
    pub fn accepted() -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            body: String::new(),
        }
    }

    /// 200 or 500 depending on the exit code; the body always carries both
    /// streams, stderr first.
    pub fn from_result(result: &ExecutionResult) -> Self {
        Self {
            status: if result.success() {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            },
            body: labeled_output(result),
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        plain_text(self.status, self.body)
    }
}

/// Everything needed once the primary process has been spawned.
pub struct CompletionProtocol {
    pub machine: MirrorStateMachine,
    pub operation: OperationKind,
    pub hooks: HookSequencer,
    pub runner: Arc<dyn ProcessRunner>,
    pub sink: Arc<dyn EventSink>,
}

impl CompletionProtocol {
    /// Watch `completion` on a detached task so the child is always reaped
    /// and the hooks always run, even if the client goes away.
    ///
    /// Backgrounded requests get 202 right away. Otherwise the reply waits
    /// for the exit code; the hooks start after the result is handed back.
    pub async fn complete(self, completion: Completion, backgrounded: bool) -> Reply {
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = completion.await;
            if !backgrounded {
                // The requester may have hung up; the hooks still run.
                let _ = tx.send(Reply::from_result(&result));
            }
            self.on_exit(result, backgrounded).await;
        });

        if backgrounded {
            return Reply::accepted();
        }

        match rx.await {
            Ok(reply) => reply,
            Err(_) => {
                error!("Mirror task ended without reporting a result");
                Reply {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: "mirror task ended without a result\n".to_string(),
                }
            }
        }
    }

    async fn on_exit(mut self, result: ExecutionResult, backgrounded: bool) {
        self.machine.finish();
        let section = self.machine.section().to_string();
        let operation_id = self.machine.operation_id();

        self.sink.emit(MirrorEvent::new(
            section.as_str(),
            EventKind::PrimaryExited {
                operation_id,
                operation: self.operation,
                backgrounded,
                result,
            },
        ));

        self.hooks
            .run(self.runner.as_ref(), self.sink.as_ref(), &section, operation_id)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MirrorConfig;
    use crate::process::CommandSpec;
    use crate::section::Section;
    use crate::test_support::{MemorySink, ScriptedRunner};

    fn protocol(
        base: &std::path::Path,
        runner: Arc<ScriptedRunner>,
        sink: Arc<MemorySink>,
    ) -> CompletionProtocol {
        let config = MirrorConfig::with_base_dir(base);
        let section = Section::parse("/repo").unwrap();
        let mirror = section.mirror_path(base);
        CompletionProtocol {
            machine: MirrorStateMachine::new(base, section, sink.clone()),
            operation: OperationKind::Update,
            hooks: HookSequencer::for_mirror(&config, &mirror, ""),
            runner,
            sink,
        }
    }

    #[test]
    fn reply_status_follows_exit_code() {
        let ok = Reply::from_result(&ExecutionResult::default());
        assert_eq!(ok.status, StatusCode::OK);
        assert_eq!(ok.body, "---- stderr ----\n\n----\n---- stdout ----\n\n----\n");

        let failed = Reply::from_result(&ExecutionResult {
            exit_code: 128,
            stdout: b"out".to_vec(),
            stderr: b"fatal: not a git repository".to_vec(),
        });
        assert_eq!(failed.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(failed.body.starts_with("---- stderr ----\nfatal: not a git repository\n"));
        assert!(failed.body.ends_with("---- stdout ----\nout\n----\n"));
    }

    #[tokio::test]
    async fn backgrounded_replies_before_exit() {
        let base = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let gate = runner.hold("git");
        let sink = Arc::new(MemorySink::default());
        let mut events = sink.subscribe();

        let completion = runner
            .spawn(&CommandSpec::new("git", base.path()))
            .unwrap();
        let reply = protocol(base.path(), runner.clone(), sink.clone())
            .complete(completion, true)
            .await;

        assert_eq!(reply, Reply::accepted());
        assert!(
            !sink
                .events()
                .iter()
                .any(|e| matches!(e.kind, EventKind::PrimaryExited { .. }))
        );

        gate.notify_one();
        let exited = MemorySink::wait_for(&mut events, |e| {
            matches!(e.kind, EventKind::PrimaryExited { .. })
        })
        .await;
        assert!(matches!(
            exited.kind,
            EventKind::PrimaryExited { backgrounded: true, .. }
        ));
        MemorySink::wait_for(&mut events, |e| {
            matches!(e.kind, EventKind::HooksFinished { .. })
        })
        .await;
    }

    #[tokio::test]
    async fn foreground_waits_and_still_runs_hooks() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir(base.path().join("repo")).unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "git",
            ExecutionResult {
                exit_code: 1,
                stdout: b"partial".to_vec(),
                stderr: b"boom".to_vec(),
            },
        );
        let sink = Arc::new(MemorySink::default());
        let mut events = sink.subscribe();

        let completion = runner
            .spawn(&CommandSpec::new("git", base.path()))
            .unwrap();
        let reply = protocol(base.path(), runner.clone(), sink.clone())
            .complete(completion, false)
            .await;

        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(reply.body.contains("boom"));
        assert!(reply.body.contains("partial"));

        MemorySink::wait_for(&mut events, |e| {
            matches!(e.kind, EventKind::HooksFinished { .. })
        })
        .await;
        // primary + gc, the mirror directory exists
        assert_eq!(runner.spawned().len(), 2);
    }
}
