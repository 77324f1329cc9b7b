use serde::{Deserialize, Serialize};

use crate::messages::PromptMessage;

/// The complete context sent to a provider for one model call.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub system_blocks: Vec<SystemBlock>,
    pub messages: Vec<PromptMessage>,
}

impl LlmContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// All system blocks joined into a single prompt string.
    pub fn system_prompt(&self) -> String {
        self.system_blocks
            .iter()
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn block(&self, label: &SystemBlockLabel) -> Option<&SystemBlock> {
        self.system_blocks.iter().find(|b| &b.label == label)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemBlock {
    pub content: String,
    pub label: SystemBlockLabel,
}

impl SystemBlock {
    pub fn new(label: SystemBlockLabel, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            label,
        }
    }
}

/// Labels for tracking what's in the context (debugging, tests).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SystemBlockLabel {
    /// Core instructions plus any selected or dynamically loaded documents.
    Instructions,
    ProjectSnapshot,
    DocumentCatalog,
    Custom(String),
}
