//! HTTP surface: every path is a mirror section.

pub mod webhook;

use axum::extract::DefaultBodyLimit;
use axum::{Router, routing};

use crate::SharedState;

pub use webhook::{favicon, handle_mirror};

/// Webhook form bodies above this size are refused.
pub const MAX_FORM_BYTES: usize = 10 << 20;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/favicon.ico", routing::get(favicon))
        .fallback(handle_mirror)
        .layer(DefaultBodyLimit::max(MAX_FORM_BYTES))
        .with_state(state)
}
