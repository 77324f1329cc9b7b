use serde::{Deserialize, Serialize};
use tracing::debug;

/// The two named document collections besides the core instructions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Examples,
    Context,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Examples => "examples",
            Self::Context => "context",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
}

/// Read-only corpus of instructional documents.
///
/// A missing document is `Ok(None)`, never an error: errors mean the backing
/// store itself could not be reached.
pub trait DocumentStore: Send + Sync {
    fn load_core(&self) -> Result<String, DocumentError>;

    fn list(&self, kind: DocumentKind) -> Result<Vec<String>, DocumentError>;

    fn load(&self, kind: DocumentKind, name: &str) -> Result<Option<String>, DocumentError>;

    fn list_examples(&self) -> Result<Vec<String>, DocumentError> {
        self.list(DocumentKind::Examples)
    }

    fn list_context(&self) -> Result<Vec<String>, DocumentError> {
        self.list(DocumentKind::Context)
    }

    /// Concatenate the named documents, each under a heading derived from its
    /// name. Missing documents are skipped.
    fn load_many(&self, kind: DocumentKind, names: &[String]) -> Result<String, DocumentError> {
        let mut sections = Vec::with_capacity(names.len());
        for name in names {
            match self.load(kind, name)? {
                Some(content) => {
                    sections.push(format!("## {}\n\n{}", document_heading(name), content.trim()));
                }
                None => debug!(collection = %kind, document = %name, "document not found, skipping"),
            }
        }
        Ok(sections.join("\n\n"))
    }
}

/// Human-readable heading for a document name: `data-fetching.md` → `Data Fetching`.
pub fn document_heading(name: &str) -> String {
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    stem.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
