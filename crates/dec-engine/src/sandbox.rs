//! Sandbox implementations: a directory-per-environment workspace on disk,
//! and an in-memory one for tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dec_core::ids::EnvironmentId;
use dec_core::sandbox::{validate_relative_path, ProjectSnapshot, Sandbox, SandboxError, SnapshotFile};
use parking_lot::RwLock;
use tracing::debug;

const SKIP_DIRS: &[&str] = &["node_modules", ".git", "target", "dist", "build", ".next"];
const DEFAULT_MAX_DEPTH: usize = 8;

/// Each environment is a directory `<root>/<env_id>`.
#[derive(Clone, Debug)]
pub struct LocalSandbox {
    root: PathBuf,
    max_depth: usize,
}

impl LocalSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for an environment. The id must be one plain path component.
    pub fn env_dir(&self, env: &EnvironmentId) -> Result<PathBuf, SandboxError> {
        let id = env.as_str();
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(SandboxError::InvalidPath(format!("environment id {id:?}")));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn snapshot(&self, env: &EnvironmentId) -> Result<ProjectSnapshot, SandboxError> {
        let dir = self.env_dir(env)?;
        if !dir.is_dir() {
            return Err(SandboxError::EnvironmentNotFound(env.to_string()));
        }
        let max_depth = self.max_depth;
        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            walk(&dir, &dir, 0, max_depth, &mut files);
            files
        })
        .await
        .map_err(|e| SandboxError::Unavailable(format!("snapshot task failed: {e}")))?;
        Ok(ProjectSnapshot { files })
    }

    async fn write_file(&self, env: &EnvironmentId, path: &str, content: &str) -> Result<(), SandboxError> {
        validate_relative_path(path)?;
        let target = self.env_dir(env)?.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        debug!(env_id = %env, path, bytes = content.len(), "wrote file");
        Ok(())
    }
}

fn walk(root: &Path, dir: &Path, depth: usize, max_depth: usize, out: &mut Vec<SnapshotFile>) {
    if depth >= max_depth {
        return;
    }
    let mut entries: Vec<_> = match std::fs::read_dir(dir) {
        Ok(e) => e.flatten().collect(),
        Err(_) => return,
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name();
        if path.is_dir() {
            if !SKIP_DIRS.contains(&name.to_string_lossy().as_ref()) {
                walk(root, &path, depth + 1, max_depth, out);
            }
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            // binary or unreadable
            continue;
        };
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        out.push(SnapshotFile {
            path: rel.to_string_lossy().replace('\\', "/"),
            content,
        });
    }
}

/// Per-environment file maps held in memory.
#[derive(Default)]
pub struct MemorySandbox {
    envs: RwLock<HashMap<EnvironmentId, BTreeMap<String, String>>>,
}

impl MemorySandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, env: &EnvironmentId, path: impl Into<String>, content: impl Into<String>) {
        self.envs
            .write()
            .entry(env.clone())
            .or_default()
            .insert(path.into(), content.into());
    }

    pub fn file(&self, env: &EnvironmentId, path: &str) -> Option<String> {
        self.envs.read().get(env).and_then(|files| files.get(path).cloned())
    }

    pub fn files(&self, env: &EnvironmentId) -> BTreeMap<String, String> {
        self.envs.read().get(env).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Sandbox for MemorySandbox {
    async fn snapshot(&self, env: &EnvironmentId) -> Result<ProjectSnapshot, SandboxError> {
        let envs = self.envs.read();
        let files = envs
            .get(env)
            .ok_or_else(|| SandboxError::EnvironmentNotFound(env.to_string()))?;
        Ok(ProjectSnapshot {
            files: files
                .iter()
                .map(|(path, content)| SnapshotFile {
                    path: path.clone(),
                    content: content.clone(),
                })
                .collect(),
        })
    }

    async fn write_file(&self, env: &EnvironmentId, path: &str, content: &str) -> Result<(), SandboxError> {
        validate_relative_path(path)?;
        self.insert(env, path.trim_start_matches("./"), content);
        Ok(())
    }
}
