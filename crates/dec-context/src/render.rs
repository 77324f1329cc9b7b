//! Rendering documents, catalogs and project snapshots into prompt text.

use std::fmt;
use std::sync::Arc;

use dec_core::documents::{DocumentKind, DocumentStore};
use dec_core::sandbox::ProjectSnapshot;
use dec_protocol::tool_calls::LOAD_EXAMPLES_USAGE;
use tracing::{debug, warn};

use crate::selector::ContextSelection;
use crate::truncate::truncate_with_marker;

pub const EXAMPLES_BANNER: &str = "=== REQUESTED EXAMPLES ===";
pub const EXAMPLES_END_BANNER: &str = "=== END REQUESTED EXAMPLES ===";
pub const CONTEXT_BANNER: &str = "=== REQUESTED CONTEXT ===";
pub const CONTEXT_END_BANNER: &str = "=== END REQUESTED CONTEXT ===";
pub const LOADED_BANNER: &str = "=== DYNAMICALLY LOADED DOCUMENTS ===";

/// The instruction text for one phase of a turn. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssembledPrompt {
    text: String,
}

impl AssembledPrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// A new prompt with the loaded documents appended under their own banner.
    pub fn with_loaded_documents(&self, content: &str) -> Self {
        let mut text = self.text.clone();
        push_section(&mut text, &format!("{LOADED_BANNER}\n\n{}", content.trim()));
        Self { text }
    }
}

impl fmt::Display for AssembledPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<AssembledPrompt> for String {
    fn from(p: AssembledPrompt) -> Self {
        p.text
    }
}

fn push_section(buf: &mut String, section: &str) {
    if !buf.is_empty() {
        buf.push_str("\n\n");
    }
    buf.push_str(section);
}

#[derive(Clone, Debug)]
pub struct RenderOptions {
    pub include_catalog: bool,
    pub max_file_bytes: usize,
    pub max_files: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            include_catalog: true,
            max_file_bytes: 16 * 1024,
            max_files: 50,
        }
    }
}

pub struct PromptRenderer {
    store: Arc<dyn DocumentStore>,
    options: RenderOptions,
}

impl PromptRenderer {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_options(store, RenderOptions::default())
    }

    pub fn with_options(store: Arc<dyn DocumentStore>, options: RenderOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Core instructions, or empty when the store cannot be read.
    pub fn render_core_instructions(&self) -> String {
        match self.store.load_core() {
            Ok(core) => core.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "core instructions unavailable");
                String::new()
            }
        }
    }

    pub fn render_selection(&self, selection: &ContextSelection) -> AssembledPrompt {
        let mut text = self.render_core_instructions();
        if let Some(block) = self.render_block(
            DocumentKind::Examples,
            &selection.examples,
            EXAMPLES_BANNER,
            EXAMPLES_END_BANNER,
        ) {
            push_section(&mut text, &block);
        }
        if let Some(block) = self.render_block(
            DocumentKind::Context,
            &selection.context,
            CONTEXT_BANNER,
            CONTEXT_END_BANNER,
        ) {
            push_section(&mut text, &block);
        }
        AssembledPrompt { text }
    }

    fn render_block(
        &self,
        kind: DocumentKind,
        names: &[String],
        open: &str,
        close: &str,
    ) -> Option<String> {
        if names.is_empty() {
            return None;
        }
        match self.store.load_many(kind, names) {
            Ok(body) if !body.is_empty() => Some(format!("{open}\n\n{body}\n\n{close}")),
            Ok(_) => {
                debug!(collection = %kind, "no selected documents found");
                None
            }
            Err(e) => {
                warn!(collection = %kind, error = %e, "failed to load selected documents");
                None
            }
        }
    }

    /// Names the model may request with `load_examples`, or `None` when the
    /// catalog is disabled or there is nothing to list.
    pub fn render_catalog(&self) -> Option<String> {
        if !self.options.include_catalog {
            return None;
        }
        let list = |kind: DocumentKind| match self.store.list(kind) {
            Ok(names) => names,
            Err(e) => {
                warn!(collection = %kind, error = %e, "failed to list documents");
                Vec::new()
            }
        };
        let examples = list(DocumentKind::Examples);
        let context = list(DocumentKind::Context);
        if examples.is_empty() && context.is_empty() {
            return None;
        }

        let mut out = String::from("# Available Reference Documents\n\n");
        out.push_str(
            "Before answering you may request any of these documents by replying with:\n\n",
        );
        out.push_str(LOAD_EXAMPLES_USAGE);
        for (label, names) in [("Examples", &examples), ("Context", &context)] {
            if !names.is_empty() {
                out.push_str(&format!("\n\n{label}: {}", names.join(", ")));
            }
        }
        Some(out)
    }

    /// The current project files, each fenced and size-bounded.
    pub fn render_snapshot(&self, snapshot: &ProjectSnapshot) -> Option<String> {
        if snapshot.is_empty() {
            return None;
        }
        let mut out = String::from("# Current Project");
        for file in snapshot.files.iter().take(self.options.max_files) {
            let lang = file.path.rsplit_once('.').map_or("", |(_, ext)| ext);
            let content = truncate_with_marker(&file.content, self.options.max_file_bytes);
            out.push_str(&format!("\n\n## {}\n\n```{lang}\n{}\n```", file.path, content.trim_end()));
        }
        let hidden = snapshot.files.len().saturating_sub(self.options.max_files);
        if hidden > 0 {
            out.push_str(&format!("\n\n[{hidden} more files not shown]"));
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DirDocumentStore, MemoryDocumentStore};
    use dec_core::sandbox::SnapshotFile;

    fn store() -> Arc<dyn DocumentStore> {
        Arc::new(
            MemoryDocumentStore::new()
                .with_core("CORE")
                .with_document(DocumentKind::Examples, "data-fetching.md", "fetch stuff")
                .with_document(DocumentKind::Examples, "forms.md", "form stuff")
                .with_document(DocumentKind::Context, "styling.md", "style stuff"),
        )
    }

    fn selection(examples: &[&str], context: &[&str]) -> ContextSelection {
        ContextSelection {
            examples: examples.iter().map(|s| s.to_string()).collect(),
            context: context.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_selection_is_core_only() {
        let r = PromptRenderer::new(store());
        assert_eq!(r.render_selection(&ContextSelection::default()).as_str(), "CORE");
    }

    #[test]
    fn blocks_in_order_with_headings() {
        let r = PromptRenderer::new(store());
        let prompt = r.render_selection(&selection(&["data-fetching.md", "missing.md"], &["styling.md"]));
        let text = prompt.as_str();
        assert_eq!(
            text,
            "CORE\n\n=== REQUESTED EXAMPLES ===\n\n## Data Fetching\n\nfetch stuff\n\n=== END REQUESTED EXAMPLES ===\n\n=== REQUESTED CONTEXT ===\n\n## Styling\n\nstyle stuff\n\n=== END REQUESTED CONTEXT ==="
        );
    }

    #[test]
    fn all_missing_documents_skip_block() {
        let r = PromptRenderer::new(store());
        let prompt = r.render_selection(&selection(&["nope.md"], &[]));
        assert_eq!(prompt.as_str(), "CORE");
    }

    #[test]
    fn unavailable_store_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let r = PromptRenderer::new(Arc::new(DirDocumentStore::new(dir.path().join("gone"))));
        assert_eq!(r.render_core_instructions(), "");
        let prompt = r.render_selection(&selection(&["forms.md"], &["styling.md"]));
        assert!(prompt.is_empty());
        assert!(r.render_catalog().is_none());
    }

    #[test]
    fn loaded_documents_make_new_prompt() {
        let base = AssembledPrompt::new("CORE");
        let enhanced = base.with_loaded_documents("## Forms\n\nform stuff\n");
        assert_eq!(base.as_str(), "CORE");
        assert_eq!(
            enhanced.as_str(),
            "CORE\n\n=== DYNAMICALLY LOADED DOCUMENTS ===\n\n## Forms\n\nform stuff"
        );
    }

    #[test]
    fn catalog_lists_names_and_usage() {
        let r = PromptRenderer::new(store());
        let catalog = r.render_catalog().unwrap();
        assert!(catalog.contains("<load_examples>"));
        assert!(catalog.contains("Examples: data-fetching.md, forms.md"));
        assert!(catalog.contains("Context: styling.md"));

        let off = PromptRenderer::with_options(
            store(),
            RenderOptions {
                include_catalog: false,
                ..RenderOptions::default()
            },
        );
        assert!(off.render_catalog().is_none());
    }

    #[test]
    fn snapshot_is_fenced_and_bounded() {
        let r = PromptRenderer::with_options(
            store(),
            RenderOptions {
                include_catalog: true,
                max_file_bytes: 4,
                max_files: 1,
            },
        );
        let snapshot = ProjectSnapshot {
            files: vec![
                SnapshotFile {
                    path: "src/App.tsx".into(),
                    content: "export default App".into(),
                },
                SnapshotFile {
                    path: "src/main.tsx".into(),
                    content: "x".into(),
                },
            ],
        };
        let out = r.render_snapshot(&snapshot).unwrap();
        assert!(out.starts_with("# Current Project"));
        assert!(out.contains("## src/App.tsx\n\n```tsx\nexpo\n[truncated: 18 bytes -> 4 bytes]\n```"));
        assert!(!out.contains("main.tsx"));
        assert!(out.ends_with("[1 more files not shown]"));
        assert!(r.render_snapshot(&ProjectSnapshot::default()).is_none());
    }
}
