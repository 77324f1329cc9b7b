//! Context assembly for a turn: which reference documents to include, where
//! they come from, and how they are rendered into the system prompt.

pub mod render;
pub mod selector;
pub mod store;
pub mod truncate;

pub use render::{AssembledPrompt, PromptRenderer, RenderOptions};
pub use selector::{ContextSelection, ContextSelector, ForcedRule, SelectionRule};
pub use store::{DirDocumentStore, MemoryDocumentStore};
