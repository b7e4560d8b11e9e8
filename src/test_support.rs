//! Test-only runner and event sink.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, broadcast};

use crate::error::{MirrorError, Result};
use crate::events::{EventSink, MirrorEvent};
use crate::process::{CommandSpec, Completion, ExecutionResult, ProcessRunner};

const DEFAULT_MAX_EVENTS: usize = 1024;
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Script {
    spawned: Vec<CommandSpec>,
    results: HashMap<PathBuf, ExecutionResult>,
    holds: HashMap<PathBuf, Arc<Notify>>,
    failing: HashSet<PathBuf>,
}

/// [`ProcessRunner`] that never starts a real process.
///
/// Every spawn is recorded. Results are looked up by program path and
/// default to a silent exit 0.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<Script>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn respond(&self, program: impl Into<PathBuf>, result: ExecutionResult) {
        self.script().results.insert(program.into(), result);
    }

    /// Make spawning `program` fail as if it were not executable.
    pub fn fail_spawn(&self, program: impl Into<PathBuf>) {
        self.script().failing.insert(program.into());
    }

    /// Keep every `program` process "running" until the returned handle is
    /// notified, once per process.
    pub fn hold(&self, program: impl Into<PathBuf>) -> Arc<Notify> {
        self.script()
            .holds
            .entry(program.into())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.script().spawned.clone()
    }

    /// Wait until at least `count` processes have been spawned.
    pub async fn wait_for_spawns(&self, count: usize) {
        let polled = tokio::time::timeout(WAIT_TIMEOUT, async {
            while self.script().spawned.len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(polled.is_ok(), "timed out waiting for {count} spawns");
    }
}

impl ProcessRunner for ScriptedRunner {
    fn spawn(&self, command: &CommandSpec) -> Result<Completion> {
        let mut script = self.script();
        if script.failing.contains(&command.program) {
            return Err(MirrorError::Spawn {
                program: command.program.clone(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "scripted failure"),
            });
        }
        script.spawned.push(command.clone());

        let result = script
            .results
            .get(&command.program)
            .cloned()
            .unwrap_or_default();
        let hold = script.holds.get(&command.program).cloned();

        Ok(Box::pin(async move {
            if let Some(hold) = hold {
                hold.notified().await;
            }
            result
        }))
    }
}

/// [`EventSink`] keeping the most recent events in memory and
/// re-broadcasting them to subscribers.
pub struct MemorySink {
    events: Mutex<VecDeque<MirrorEvent>>,
    max_events: usize,
    tx: broadcast::Sender<MirrorEvent>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }
}

impl MemorySink {
    pub fn with_capacity(max_events: usize) -> Self {
        let (tx, _) = broadcast::channel(max_events.max(1));
        Self {
            events: Mutex::new(VecDeque::new()),
            max_events,
            tx,
        }
    }

    pub fn events(&self) -> Vec<MirrorEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.tx.subscribe()
    }

    /// Receive events until one matches `predicate`.
    pub async fn wait_for<F>(rx: &mut broadcast::Receiver<MirrorEvent>, predicate: F) -> MirrorEvent
    where
        F: Fn(&MirrorEvent) -> bool,
    {
        let found = tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                match rx.recv().await {
                    Ok(event) if predicate(&event) => return Some(event),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await;
        match found {
            Ok(Some(event)) => event,
            _ => panic!("expected event never arrived"),
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: MirrorEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        while events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event.clone());
        let _ = self.tx.send(event);
    }
}
