//! Document store backends.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dec_core::documents::{DocumentError, DocumentKind, DocumentStore};
use tracing::debug;

pub const CORE_DOCUMENT: &str = "core.md";
const DOCUMENT_EXTENSION: &str = "md";

/// Markdown documents on disk:
///
/// ```text
/// <root>/core.md
/// <root>/examples/*.md
/// <root>/context/*.md
/// ```
#[derive(Clone, Debug)]
pub struct DirDocumentStore {
    root: PathBuf,
}

impl DirDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> Result<(), DocumentError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(DocumentError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }

    fn read_optional(path: &Path) -> Result<Option<String>, DocumentError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DocumentError::Read {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Names must be a single plain file name.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

/// `name` itself, then `name.md` when it has no extension.
fn candidates(name: &str) -> Vec<String> {
    let mut out = vec![name.to_string()];
    if Path::new(name).extension().is_none() {
        out.push(format!("{name}.{DOCUMENT_EXTENSION}"));
    }
    out
}

impl DocumentStore for DirDocumentStore {
    fn load_core(&self) -> Result<String, DocumentError> {
        self.ensure_root()?;
        let content = Self::read_optional(&self.root.join(CORE_DOCUMENT))?;
        if content.is_none() {
            debug!(root = %self.root.display(), "no core document");
        }
        Ok(content.unwrap_or_default())
    }

    fn list(&self, kind: DocumentKind) -> Result<Vec<String>, DocumentError> {
        self.ensure_root()?;
        let dir = self.root.join(kind.as_str());
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DocumentError::Read {
                    path: dir.display().to_string(),
                    message: e.to_string(),
                })
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .filter(|p| p.extension().is_some_and(|ext| ext == DOCUMENT_EXTENSION))
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    fn load(&self, kind: DocumentKind, name: &str) -> Result<Option<String>, DocumentError> {
        self.ensure_root()?;
        if !is_safe_name(name) {
            debug!(document = %name, "rejected unsafe document name");
            return Ok(None);
        }
        let dir = self.root.join(kind.as_str());
        for candidate in candidates(name) {
            if let Some(content) = Self::read_optional(&dir.join(candidate))? {
                return Ok(Some(content));
            }
        }
        Ok(None)
    }
}

/// In-process corpus.
#[derive(Clone, Debug, Default)]
pub struct MemoryDocumentStore {
    core: String,
    examples: BTreeMap<String, String>,
    context: BTreeMap<String, String>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_core(mut self, core: impl Into<String>) -> Self {
        self.core = core.into();
        self
    }

    pub fn with_document(
        mut self,
        kind: DocumentKind,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.collection_mut(kind).insert(name.into(), content.into());
        self
    }

    fn collection(&self, kind: DocumentKind) -> &BTreeMap<String, String> {
        match kind {
            DocumentKind::Examples => &self.examples,
            DocumentKind::Context => &self.context,
        }
    }

    fn collection_mut(&mut self, kind: DocumentKind) -> &mut BTreeMap<String, String> {
        match kind {
            DocumentKind::Examples => &mut self.examples,
            DocumentKind::Context => &mut self.context,
        }
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load_core(&self) -> Result<String, DocumentError> {
        Ok(self.core.clone())
    }

    fn list(&self, kind: DocumentKind) -> Result<Vec<String>, DocumentError> {
        Ok(self.collection(kind).keys().cloned().collect())
    }

    fn load(&self, kind: DocumentKind, name: &str) -> Result<Option<String>, DocumentError> {
        let docs = self.collection(kind);
        Ok(candidates(name).iter().find_map(|c| docs.get(c).cloned()))
    }
}
