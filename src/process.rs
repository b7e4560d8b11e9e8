//! Spawning external programs and collecting their output.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{MirrorError, Result};

/// How long output is still collected after the process itself exited.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// One external command: program, arguments, working directory and
/// optional text fed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            stdin: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit status and captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// `-1` when the process was killed by a signal or could not be waited on.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Resolves once the spawned process has exited and its pipes are drained,
/// or have stayed open past a short grace period.
pub type Completion = Pin<Box<dyn Future<Output = ExecutionResult> + Send + 'static>>;

/// Starts external processes.
///
/// `spawn` returns as soon as the process is running; output is collected in
/// the background and handed over by the returned [`Completion`].
pub trait ProcessRunner: Send + Sync + 'static {
    fn spawn(&self, command: &CommandSpec) -> Result<Completion>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn spawn(&self, command: &CommandSpec) -> Result<Completion> {
        info!(
            "Running (cwd = '{}'): {}",
            command.cwd.display(),
            command
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MirrorError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        if let (Some(input), Some(mut pipe)) = (command.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                // A hook that never reads stdin closes the pipe early; that is fine.
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!("stdin write stopped early: {}", e);
                }
            });
        }

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let program = command.program.clone();

        Ok(Box::pin(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    warn!("Failed to wait on {}: {}", program.display(), e);
                    -1
                }
            };
            // Backgrounded grandchildren may keep the pipes open forever.
            let deadline = Instant::now() + OUTPUT_GRACE;
            ExecutionResult {
                exit_code,
                stdout: collect(stdout, deadline).await,
                stderr: collect(stderr, deadline).await,
            }
        }))
    }
}

/// Output read so far from one pipe, and the task still reading it.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

/// Read a pipe on its own task so a chatty process never blocks on a full
/// pipe buffer.
fn drain<R>(pipe: Option<R>) -> Option<Drain>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut reader| {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!("pipe read stopped early: {}", e);
                        break;
                    }
                }
            }
        });
        Drain { buf, task }
    })
}

/// Wait for the pipe to close until `deadline`, then keep what arrived.
async fn collect(drain: Option<Drain>, deadline: Instant) -> Vec<u8> {
    let Some(mut drain) = drain else {
        return Vec::new();
    };
    if tokio::time::timeout_at(deadline, &mut drain.task).await.is_err() {
        debug!("pipe still open after exit, dropping the reader");
        drain.task.abort();
    }
    std::mem::take(&mut *drain.buf.lock().unwrap_or_else(PoisonError::into_inner))
}

/// `---- <label> ----` block used for both log output and response bodies.
pub fn labeled(label: &str, content: &[u8]) -> String {
    format!(
        "---- {} ----\n{}\n----\n",
        label,
        String::from_utf8_lossy(content)
    )
}

/// Labeled stderr block followed by the labeled stdout block.
pub fn labeled_output(result: &ExecutionResult) -> String {
    let mut out = labeled("stderr", &result.stderr);
    out.push_str(&labeled("stdout", &result.stdout));
    out
}
