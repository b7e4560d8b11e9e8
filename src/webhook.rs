//! Webhook payload structures

use serde::Deserialize;

use crate::error::{MirrorError, Result};

/// Repository details extracted from a webhook `payload` field.
///
/// `raw` keeps the JSON exactly as received; hooks get it on stdin.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub owner: String,
    pub name: String,
    pub private: bool,
    pub raw: String,
}

#[derive(Deserialize)]
struct Envelope {
    repository: Option<Repository>,
}

#[derive(Deserialize)]
struct Repository {
    owner: Option<Owner>,
    name: Option<String>,
    #[serde(default)]
    private: bool,
}

/// Older hooks send the owner as a bare string, newer ones as an account
/// object where `login` is the handle.
#[derive(Deserialize)]
#[serde(untagged)]
enum Owner {
    Name(String),
    Account {
        login: Option<String>,
        name: Option<String>,
    },
}

impl Owner {
    fn into_name(self) -> Option<String> {
        match self {
            Owner::Name(name) => Some(name),
            Owner::Account { login, name } => login.or(name),
        }
    }
}

impl Payload {
    pub fn parse(raw: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|e| MirrorError::MalformedPayload(e.to_string()))?;

        let repository = envelope
            .repository
            .ok_or_else(|| MirrorError::MalformedPayload("missing repository".to_string()))?;
        let name = repository
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| MirrorError::MalformedPayload("missing repository.name".to_string()))?;
        let owner = repository
            .owner
            .and_then(Owner::into_name)
            .filter(|o| !o.is_empty())
            .ok_or_else(|| {
                MirrorError::MalformedPayload("missing repository.owner".to_string())
            })?;

        Ok(Self {
            owner,
            name,
            private: repository.private,
            raw: raw.to_string(),
        })
    }

    /// Clone source for this repository on `host`: anonymous git protocol for
    /// public repositories, ssh for private ones.
    pub fn clone_url(&self, host: &str) -> String {
        if self.private {
            format!("git@{}:{}/{}.git", host, self.owner, self.name)
        } else {
            format!("git://{}/{}/{}.git", host, self.owner, self.name)
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// What hooks read on stdin: the payload JSON, or nothing.
pub fn hook_input(payload: Option<&Payload>) -> String {
    payload.map(|p| p.raw.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_object_with_name() {
        let raw = r#"{"repository":{"owner":{"name":"acme"},"name":"widget","private":false}}"#;
        let payload = Payload::parse(raw).unwrap();
        assert_eq!(payload.owner, "acme");
        assert_eq!(payload.name, "widget");
        assert!(!payload.private);
        assert_eq!(payload.raw, raw);
        assert_eq!(payload.clone_url("github.com"), "git://github.com/acme/widget.git");
    }

    #[test]
    fn login_wins_over_name() {
        let raw = r#"{"repository":{"owner":{"login":"dustin","name":"Dustin S"},"name":"gitmirror"}}"#;
        let payload = Payload::parse(raw).unwrap();
        assert_eq!(payload.owner, "dustin");
        assert_eq!(payload.full_name(), "dustin/gitmirror");
    }

    #[test]
    fn owner_as_plain_string() {
        let raw = r#"{"repository":{"owner":"acme","name":"widget"}}"#;
        assert_eq!(Payload::parse(raw).unwrap().owner, "acme");
    }

    #[test]
    fn private_repositories_clone_over_ssh() {
        let raw = r#"{"repository":{"owner":{"name":"acme"},"name":"secret","private":true}}"#;
        let payload = Payload::parse(raw).unwrap();
        assert_eq!(payload.clone_url("example.org"), "git@example.org:acme/secret.git");
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = Payload::parse("{not json").unwrap_err();
        assert!(matches!(err, MirrorError::MalformedPayload(_)));
    }

    #[test]
    fn missing_fields_are_errors() {
        for raw in [
            r#"{}"#,
            r#"{"repository":{"name":"widget"}}"#,
            r#"{"repository":{"owner":{"name":"acme"}}}"#,
            r#"{"repository":{"owner":{"id":3},"name":"widget"}}"#,
            r#"{"repository":{"owner":"","name":"widget"}}"#,
        ] {
            assert!(
                matches!(Payload::parse(raw), Err(MirrorError::MalformedPayload(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn hook_input_is_empty_without_payload() {
        assert_eq!(hook_input(None), "");
        let payload = Payload::parse(r#"{"repository":{"owner":"a","name":"b"}}"#).unwrap();
        assert_eq!(hook_input(Some(&payload)), payload.raw);
    }
}
