//! Manual GET and repository-host POST handlers

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::State as AxumState,
    extract::Query,
    extract::rejection::{BytesRejection, QueryRejection},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::error::{MirrorError, Result};
use crate::events::{EventKind, MirrorEvent};
use crate::mirror::sync_mirror;
use crate::section::Section;
use crate::webhook::Payload;
use crate::{SharedState, plain_text};

pub async fn favicon() -> Response {
    plain_text(StatusCode::GONE, "No favicon\n")
}

/// Handles every request that is not the favicon.
///
/// `GET /<section>` fetches an existing mirror. `POST /<section>` does the
/// same, or clones the mirror first when the form carries a `payload`.
/// `?bg=false` makes the reply wait for git.
pub async fn handle_mirror(
    AxumState(state): AxumState<SharedState>,
    method: Method,
    uri: Uri,
    query: std::result::Result<Query<HashMap<String, String>>, QueryRejection>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    info!("Handling {} {}", method, uri.path());

    if method != Method::GET && method != Method::POST {
        return plain_text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n");
    }

    let Query(params) = match query {
        Ok(query) => query,
        Err(e) => return reject(&state, uri.path(), e.into()),
    };

    let raw_section = params
        .get("name")
        .filter(|n| !n.is_empty())
        .map(String::as_str)
        .unwrap_or_else(|| uri.path());
    let backgrounded = is_backgrounded(&params);

    let section = match Section::parse(raw_section) {
        Ok(section) => section,
        Err(e) => return reject(&state, raw_section, e),
    };

    let body = match body {
        Ok(body) => body,
        Err(e) => return reject(&state, raw_section, e.into()),
    };

    let payload = if method == Method::POST {
        match form_payload(&body) {
            Ok(payload) => payload,
            Err(e) => return reject(&state, raw_section, e),
        }
    } else {
        None
    };

    match sync_mirror(&state, section, payload, backgrounded).await {
        Ok(reply) => reply.into_response(),
        // already reported by the mirror machinery
        Err(e @ MirrorError::Spawn { .. }) => e.into_response(),
        Err(e) => reject(&state, raw_section, e),
    }
}

/// Only an explicit `bg=false` waits for the result.
pub fn is_backgrounded(params: &HashMap<String, String>) -> bool {
    params.get("bg").map(|v| v != "false").unwrap_or(true)
}

/// Parse an urlencoded form and pull out its `payload` field, if any.
pub fn form_payload(body: &[u8]) -> Result<Option<Payload>> {
    let form: HashMap<String, String> = serde_urlencoded::from_bytes(body)?;
    match form.get("payload").filter(|p| !p.is_empty()) {
        Some(raw) => Payload::parse(raw).map(Some),
        None => Ok(None),
    }
}

fn reject(state: &SharedState, raw_section: &str, err: MirrorError) -> Response {
    warn!("Refusing request for {:?}: {}", raw_section, err);
    state.sink.emit(MirrorEvent::new(
        raw_section,
        EventKind::Rejected {
            reason: err.to_string(),
        },
    ));
    err.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn only_bg_false_disables_backgrounding() {
        assert!(is_backgrounded(&params(&[])));
        assert!(is_backgrounded(&params(&[("bg", "true")])));
        assert!(is_backgrounded(&params(&[("bg", "0")])));
        assert!(is_backgrounded(&params(&[("bg", "FALSE")])));
        assert!(!is_backgrounded(&params(&[("bg", "false")])));
    }

    #[test]
    fn form_without_payload_is_a_plain_update() {
        assert_eq!(form_payload(b"").unwrap(), None);
        assert_eq!(form_payload(b"other=1").unwrap(), None);
        assert_eq!(form_payload(b"payload=").unwrap(), None);
    }

    #[test]
    fn form_payload_is_decoded() {
        let body = b"payload=%7B%22repository%22%3A%7B%22owner%22%3A%7B%22name%22%3A%22acme%22%7D%2C%22name%22%3A%22widget%22%2C%22private%22%3Afalse%7D%7D";
        let payload = form_payload(body).unwrap().unwrap();
        assert_eq!(payload.full_name(), "acme/widget");
        assert_eq!(
            payload.raw,
            r#"{"repository":{"owner":{"name":"acme"},"name":"widget","private":false}}"#
        );
    }

    #[test]
    fn broken_payload_json_is_an_error() {
        assert!(matches!(
            form_payload(b"payload=%7Bnope"),
            Err(MirrorError::MalformedPayload(_))
        ));
    }
}
