use std::io;
use std::path::PathBuf;

use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::plain_text;

/// Body sent back for any section that tries to climb out of the base directory.
pub const TRAVERSAL_BODY: &str = "You're doing it wrong\n";

/// Custom error type for gitmirror operations
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("Invalid section: {0:?}")]
    InvalidSection(String),

    /// The query string or body could not be extracted at all.
    #[error("{message}")]
    Request { status: StatusCode, message: String },

    #[error("Malformed form body: {0}")]
    MalformedForm(#[from] serde_urlencoded::de::Error),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("No mirror for {section}")]
    MissingPayload { section: String },

    #[error("Failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl MirrorError {
    pub fn status(&self) -> StatusCode {
        match self {
            MirrorError::InvalidSection(_) => StatusCode::FORBIDDEN,
            MirrorError::Request { status, .. } => *status,
            MirrorError::MalformedForm(_) | MirrorError::MalformedPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            MirrorError::MissingPayload { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueryRejection> for MirrorError {
    fn from(rejection: QueryRejection) -> Self {
        MirrorError::Request {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<BytesRejection> for MirrorError {
    fn from(rejection: BytesRejection) -> Self {
        MirrorError::Request {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        let body = match &self {
            MirrorError::InvalidSection(_) => TRAVERSAL_BODY.to_string(),
            other => format!("{}\n", other),
        };
        plain_text(self.status(), body)
    }
}

/// Helper type for Results that use MirrorError
pub type Result<T> = std::result::Result<T, MirrorError>;
