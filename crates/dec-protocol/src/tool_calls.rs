//! `load_examples` tool calls: the model asking for more documents before it
//! writes its final answer.

use dec_core::documents::{DocumentError, DocumentKind, DocumentStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scanner::{self, Element};

pub const LOAD_EXAMPLES_TAG: &str = "load_examples";
const EXAMPLES_CHILD: &str = "examples";
const CONTEXT_CHILD: &str = "context";

/// Usage line shown to the model next to the document catalog.
pub const LOAD_EXAMPLES_USAGE: &str = "<load_examples><examples>name-one.md, name-two.md</examples><context>optional.md</context></load_examples>";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    LoadExamples,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub kind: ToolCallKind,
    pub examples: Vec<String>,
    #[serde(default)]
    pub context: Vec<String>,
}

impl ToolCall {
    pub fn load_examples(examples: Vec<String>, context: Vec<String>) -> Self {
        Self {
            kind: ToolCallKind::LoadExamples,
            examples,
            context,
        }
    }

    fn from_element(el: &Element<'_>) -> Option<Self> {
        let body = el.body?;
        let children = scanner::scan(body, &[EXAMPLES_CHILD, CONTEXT_CHILD]);
        let first = |name: &str| {
            children
                .iter()
                .find(|c| c.name == name)
                .and_then(|c| c.body)
                .map(split_names)
                .unwrap_or_default()
        };
        let examples = first(EXAMPLES_CHILD);
        if examples.is_empty() {
            return None;
        }
        Some(Self::load_examples(examples, first(CONTEXT_CHILD)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(content: String) -> Self {
        Self {
            success: true,
            content: Some(content),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
        }
    }
}

fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

/// Every usable `load_examples` call, in order of appearance.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    scanner::scan_with(text, &[LOAD_EXAMPLES_TAG], ToolCall::from_element)
        .into_iter()
        .map(|m| m.value)
        .collect()
}

/// Remove every well-formed `load_examples` element and trim.
pub fn strip_tool_calls(text: &str) -> String {
    let spans: Vec<_> = scanner::scan(text, &[LOAD_EXAMPLES_TAG])
        .into_iter()
        .map(|el| el.span)
        .collect();
    scanner::remove_spans(text, &spans).trim().to_string()
}

/// Resolve a call against the document store.
pub fn execute(call: &ToolCall, store: &dyn DocumentStore) -> ToolResult {
    match load(call, store) {
        Ok(content) => ToolResult::ok(content),
        Err(e) => ToolResult::failed(e.to_string()),
    }
}

fn load(call: &ToolCall, store: &dyn DocumentStore) -> Result<String, DocumentError> {
    let examples = store.load_many(DocumentKind::Examples, &call.examples)?;
    let context = store.load_many(DocumentKind::Context, &call.context)?;
    debug!(
        examples = call.examples.len(),
        context = call.context.len(),
        bytes = examples.len() + context.len(),
        "load_examples resolved"
    );
    Ok([examples, context]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n"))
}

/// Concatenated content of the successful results, blank-line separated.
pub fn combined_content(results: &[ToolResult]) -> String {
    results
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.content.as_deref())
        .filter(|c| !c.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
