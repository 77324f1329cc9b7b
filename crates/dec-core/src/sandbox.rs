use std::path::{Component, Path};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::EnvironmentId;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for SandboxError {
    fn from(e: std::io::Error) -> Self {
        SandboxError::Io(e.to_string())
    }
}

/// Point-in-time view of the files in a sandboxed project.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub files: Vec<SnapshotFile>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: String,
    pub content: String,
}

impl ProjectSnapshot {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.content.as_str())
    }
}

/// The external environment where file changes take effect.
///
/// Implementations provide their own internal serialization; callers issue
/// writes in order without holding any lock across them.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn snapshot(&self, env: &EnvironmentId) -> Result<ProjectSnapshot, SandboxError>;

    async fn write_file(&self, env: &EnvironmentId, path: &str, content: &str) -> Result<(), SandboxError>;
}

/// Reject empty, absolute, and parent-traversing paths.
pub fn validate_relative_path(path: &str) -> Result<(), SandboxError> {
    if path.trim().is_empty() {
        return Err(SandboxError::InvalidPath("empty path".into()));
    }
    let p = Path::new(path);
    for component in p.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(SandboxError::InvalidPath(format!("{path}: parent traversal")));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::InvalidPath(format!("{path}: absolute path")));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_accepted() {
        assert!(validate_relative_path("src/App.tsx").is_ok());
        assert!(validate_relative_path("./index.html").is_ok());
    }

    #[test]
    fn unsafe_paths_rejected() {
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("   ").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("src/../../secret").is_err());
    }

    #[test]
    fn snapshot_lookup() {
        let snap = ProjectSnapshot {
            files: vec![SnapshotFile { path: "a.ts".into(), content: "x".into() }],
        };
        assert_eq!(snap.get("a.ts"), Some("x"));
        assert_eq!(snap.get("b.ts"), None);
        assert!(!snap.is_empty());
    }
}
