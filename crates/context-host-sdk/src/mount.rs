//! Mount paths
//!
//! A mount path is the unique key of an execution context, e.g. `/app`.
//! The root context is mounted at `/`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MountPathError;

/// Directory name reserved for the context mounted at `/`
pub const ROOT_UNIT_NAME: &str = "root";

/// Normalized mount path of an execution context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MountPath(String);

impl MountPath {
    /// The root mount path `/`
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and normalize a mount path.
    ///
    /// A single trailing slash is dropped (`/app/` becomes `/app`). Empty,
    /// `.` and `..` segments are rejected.
    pub fn parse(raw: &str) -> Result<Self, MountPathError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MountPathError::Empty);
        }
        if !raw.starts_with('/') {
            return Err(MountPathError::NotAbsolute(raw.to_string()));
        }
        if raw == "/" {
            return Ok(Self::root());
        }

        let trimmed = raw.strip_suffix('/').unwrap_or(raw);
        let invalid = trimmed[1..]
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if invalid {
            return Err(MountPathError::InvalidSegment(raw.to_string()));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Mount path for a unit directory discovered under the units root.
    ///
    /// A directory named `root` (any case) maps to `/`, anything else to `/<name>`.
    pub fn for_unit_dir(dir_name: &str) -> Self {
        if dir_name.eq_ignore_ascii_case(ROOT_UNIT_NAME) {
            Self::root()
        } else {
            Self(format!("/{}", dir_name))
        }
    }

    /// Whether this is the root mount path
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name used for per-context resources: `root` for `/`, otherwise the
    /// path with its slashes removed.
    pub fn context_name(&self) -> String {
        if self.is_root() {
            ROOT_UNIT_NAME.to_string()
        } else {
            self.0.replace('/', "")
        }
    }

    /// Whether a request path falls under this mount path.
    ///
    /// Matching is segment-aware: `/app` matches `/app` and `/app/x` but not `/apple`.
    pub fn matches(&self, request_path: &str) -> bool {
        if self.is_root() {
            return request_path.starts_with('/');
        }
        match request_path.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Strip this mount path from a matching request path, always returning
    /// a path that starts with `/`.
    pub fn strip<'a>(&self, request_path: &'a str) -> Option<&'a str> {
        if !self.matches(request_path) {
            return None;
        }
        if self.is_root() {
            return Some(request_path);
        }
        let rest = &request_path[self.0.len()..];
        Some(if rest.is_empty() { "/" } else { rest })
    }
}

impl fmt::Display for MountPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for MountPath {
    type Error = MountPathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MountPath> for String {
    fn from(value: MountPath) -> Self {
        value.0
    }
}

impl std::str::FromStr for MountPath {
    type Err = MountPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_dir_mapping() {
        assert_eq!(MountPath::for_unit_dir("root"), MountPath::root());
        assert_eq!(MountPath::for_unit_dir("ROOT"), MountPath::root());
        assert_eq!(MountPath::for_unit_dir("Root"), MountPath::root());
        assert_eq!(MountPath::for_unit_dir("app1").as_str(), "/app1");
        assert_eq!(MountPath::for_unit_dir("rooted").as_str(), "/rooted");
    }

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(MountPath::parse("/app/").unwrap().as_str(), "/app");
        assert_eq!(MountPath::parse(" /a/b ").unwrap().as_str(), "/a/b");
        assert!(MountPath::parse("/").unwrap().is_root());
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!(MountPath::parse(""), Err(MountPathError::Empty));
        assert!(matches!(MountPath::parse("app"), Err(MountPathError::NotAbsolute(_))));
        assert!(matches!(MountPath::parse("/a//b"), Err(MountPathError::InvalidSegment(_))));
        assert!(matches!(MountPath::parse("/a/../b"), Err(MountPathError::InvalidSegment(_))));
    }

    #[test]
    fn test_matches_is_segment_aware() {
        let app = MountPath::parse("/app").unwrap();
        assert!(app.matches("/app"));
        assert!(app.matches("/app/index.html"));
        assert!(!app.matches("/apple"));
        assert!(MountPath::root().matches("/anything"));

        assert_eq!(app.strip("/app"), Some("/"));
        assert_eq!(app.strip("/app/x/y"), Some("/x/y"));
        assert_eq!(app.strip("/other"), None);
    }

    #[test]
    fn test_context_name() {
        assert_eq!(MountPath::root().context_name(), "root");
        assert_eq!(MountPath::parse("/chat").unwrap().context_name(), "chat");
    }
}
