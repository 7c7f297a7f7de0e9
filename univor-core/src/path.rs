//! Slash-delimited node addressing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, UnivorError};

/// Reserved child name addressing a folder's own common definition.
pub const COMMON: &str = "common";

/// Absolute path of a folder or descriptor, e.g. `/courseA/student1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath {
    segments: Vec<String>,
}

impl NodePath {
    /// The root folder.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse an absolute path. Repeated and trailing slashes are ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if !raw.starts_with('/') {
            return Err(UnivorError::Validation(format!("Path must be absolute: {:?}", raw)));
        }

        let segments: Vec<String> = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        for segment in &segments {
            if segment == "." || segment == ".." {
                return Err(UnivorError::Validation(format!("Relative segment in path: {:?}", raw)));
            }
        }

        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Last segment; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent path; `None` for the root.
    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Child path. Fails if `name` is not a valid node name.
    pub fn join(&self, name: &str) -> Result<NodePath> {
        validate_name(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// True if `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Replace the leading `from` part of this path with `to`.
    pub fn rebase(&self, from: &NodePath, to: &NodePath) -> Option<NodePath> {
        if !self.starts_with(from) {
            return None;
        }
        let mut segments = to.segments.clone();
        segments.extend_from_slice(&self.segments[from.segments.len()..]);
        Some(Self { segments })
    }

    /// Hypervisor-friendly flat name, e.g. `courseA_student1`.
    pub fn flat_name(&self) -> String {
        self.segments.join("_")
    }
}

/// Check a user-supplied folder or descriptor name.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.trim() != name {
        return Err(UnivorError::Validation(format!("Invalid name: {:?}", name)));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(UnivorError::Validation(format!("Invalid name: {:?}", name)));
    }
    if name == COMMON {
        return Err(UnivorError::Validation(format!(
            "'{}' is reserved for the folder definition", COMMON
        )));
    }
    Ok(())
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = UnivorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodePath {
    type Error = UnivorError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let path = NodePath::parse("/courseA//student1/").unwrap();
        assert_eq!(path.to_string(), "/courseA/student1");
        assert_eq!(path.name(), Some("student1"));
        assert_eq!(path.parent().unwrap().to_string(), "/courseA");
        assert_eq!(path.flat_name(), "courseA_student1");

        assert!(NodePath::parse("/").unwrap().is_root());
        assert!(NodePath::parse("courseA").is_err());
        assert!(NodePath::parse("/a/../b").is_err());
    }

    #[test]
    fn test_reserved_and_invalid_names() {
        let root = NodePath::root();
        assert!(root.join("common").is_err());
        assert!(root.join("").is_err());
        assert!(root.join("a/b").is_err());
        assert!(root.join(" padded").is_err());
        assert!(root.join("student1").is_ok());
    }

    #[test]
    fn test_rebase() {
        let path = NodePath::parse("/old/sub/vm").unwrap();
        let from = NodePath::parse("/old").unwrap();
        let to = NodePath::parse("/new/place").unwrap();
        assert_eq!(path.rebase(&from, &to).unwrap().to_string(), "/new/place/sub/vm");
        assert!(to.rebase(&from, &path).is_none());
    }

    #[test]
    fn test_serde_as_string() {
        let path = NodePath::parse("/a/b").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: NodePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
