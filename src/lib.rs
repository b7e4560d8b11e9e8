pub mod api;
pub mod completion;
pub mod error;
pub mod events;
pub mod hooks;
pub mod logging;
pub mod mirror;
pub mod process;
pub mod section;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod webhook;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::{MirrorError, Result};
use crate::events::EventSink;
use crate::process::ProcessRunner;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8124";
pub const DEFAULT_BASE_DIR: &str = "/tmp";
pub const DEFAULT_GIT: &str = "/usr/bin/git";
pub const DEFAULT_GIT_HOST: &str = "github.com";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MirrorConfig {
    pub bind_address: String,
    /// Directory holding every mirror; sections resolve below it.
    pub base_dir: PathBuf,
    /// Path to the git executable.
    pub git: PathBuf,
    /// Host used to build clone URLs for new mirrors.
    pub git_host: String,
    /// Server-wide post-fetch hook. Defaults to `<base_dir>/bin/post-fetch`.
    pub global_hook: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            git: PathBuf::from(DEFAULT_GIT),
            git_host: DEFAULT_GIT_HOST.to_string(),
            global_hook: None,
            log_dir: None,
        }
    }
}

impl MirrorConfig {
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn global_hook_path(&self) -> PathBuf {
        self.global_hook
            .clone()
            .unwrap_or_else(|| self.base_dir.join("bin").join("post-fetch"))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = lookup("GITMIRROR_BASE_DIR") {
            self.base_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("GITMIRROR_GIT") {
            self.git = PathBuf::from(v);
        }
        if let Some(v) = lookup("GITMIRROR_GIT_HOST") {
            self.git_host = v;
        }
        if let Some(v) = lookup("GITMIRROR_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base_dir.is_dir() {
            return Err(MirrorError::ConfigError(format!(
                "base directory '{}' does not exist or is not a directory",
                self.base_dir.display()
            )));
        }
        if self.git_host.is_empty() {
            return Err(MirrorError::ConfigError("git_host must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Load and parse the configuration file.
///
/// A missing file yields the defaults unless `required` is set.
pub fn load_config(path: &Path, required: bool) -> Result<MirrorConfig> {
    if !required && !path.exists() {
        return Ok(MirrorConfig::default());
    }

    let config_str = fs::read_to_string(path).map_err(|e| {
        MirrorError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config: MirrorConfig = toml::from_str(&config_str)?;
    Ok(config)
}

pub struct AppState {
    pub config: MirrorConfig,
    pub runner: Arc<dyn ProcessRunner>,
    pub sink: Arc<dyn EventSink>,
}

impl AppState {
    pub fn new(
        config: MirrorConfig,
        runner: Arc<dyn ProcessRunner>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            runner,
            sink,
        }
    }
}

pub type SharedState = Arc<AppState>;

/// Every response this service sends is plain text.
pub fn plain_text(status: StatusCode, body: impl Into<String>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        body.into(),
    )
        .into_response()
}
