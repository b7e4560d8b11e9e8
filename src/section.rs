//! Request path to mirror directory mapping.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, Result};

/// A normalized, relative mirror name such as `dustin/gitmirror.git`.
///
/// A `Section` never starts with `.`, so joining it onto the base directory
/// can not escape it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Section(String);

impl Section {
    /// Normalize a raw request path (leading `/` allowed) and reject anything
    /// that would start with a dot.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = normalize(raw.strip_prefix('/').unwrap_or(raw));
        if normalized.starts_with('.') {
            return Err(MirrorError::InvalidSection(raw.to_string()));
        }
        Ok(Section(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory of this mirror under `base`.
    pub fn mirror_path(&self, base: &Path) -> PathBuf {
        base.join(&self.0)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lexical path normalization: drops empty and `.` segments and lets `..`
/// eat the previous normal segment. Leading `..` segments are kept so the
/// caller can see them. An empty result becomes `.`.
fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(Section::parse("/myrepo").unwrap().as_str(), "myrepo");
        assert_eq!(
            Section::parse("/dustin/gitmirror.git").unwrap().as_str(),
            "dustin/gitmirror.git"
        );
    }

    #[test]
    fn redundant_segments_collapse() {
        assert_eq!(Section::parse("//a/./b/").unwrap().as_str(), "a/b");
        assert_eq!(Section::parse("/a/x/../b").unwrap().as_str(), "a/b");
    }

    #[test]
    fn traversal_is_rejected() {
        for raw in ["/..", "/../etc", "/a/../../etc", "/a/b/../../../x", "/./.."] {
            assert!(
                matches!(Section::parse(raw), Err(MirrorError::InvalidSection(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn dot_files_and_root_are_rejected() {
        assert!(Section::parse("/.git").is_err());
        assert!(Section::parse("/").is_err());
        assert!(Section::parse("").is_err());
        assert!(Section::parse("/a/..").is_err());
    }

    #[test]
    fn mirror_path_stays_under_base() {
        let base = Path::new("/srv/mirrors");
        let section = Section::parse("/a/../b").unwrap();
        assert_eq!(section.mirror_path(base), PathBuf::from("/srv/mirrors/b"));
        assert!(section.mirror_path(base).starts_with(base));
    }
}
