//! Keyword heuristics mapping a user utterance to reference documents.
//!
//! Two tiers: a primary table of case-folded substring triggers, then forced
//! rules matched on whole words and unioned into whatever the table produced.

use dec_core::documents::DocumentKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Document names picked for one utterance, per collection, deduplicated and
/// in rule order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSelection {
    pub examples: Vec<String>,
    pub context: Vec<String>,
}

impl ContextSelection {
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty() && self.context.is_empty()
    }

    pub fn names(&self, kind: DocumentKind) -> &[String] {
        match kind {
            DocumentKind::Examples => &self.examples,
            DocumentKind::Context => &self.context,
        }
    }

    pub fn contains(&self, kind: DocumentKind, name: &str) -> bool {
        self.names(kind).iter().any(|n| n == name)
    }

    /// Add a name unless already present. Returns whether it was added.
    pub fn insert(&mut self, kind: DocumentKind, name: &str) -> bool {
        if self.contains(kind, name) {
            return false;
        }
        let list = match kind {
            DocumentKind::Examples => &mut self.examples,
            DocumentKind::Context => &mut self.context,
        };
        list.push(name.to_string());
        true
    }
}

/// Primary table entry: include `document` when any trigger occurs as a
/// substring of the lowercased utterance.
#[derive(Clone, Debug)]
pub struct SelectionRule {
    pub kind: DocumentKind,
    pub document: String,
    triggers: Vec<String>,
}

impl SelectionRule {
    pub fn new(kind: DocumentKind, document: impl Into<String>, triggers: &[&str]) -> Self {
        Self {
            kind,
            document: document.into(),
            triggers: triggers.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    fn matches(&self, lowered: &str) -> bool {
        self.triggers.iter().any(|t| lowered.contains(t.as_str()))
    }
}

/// Forced inclusion: whole-word, case-insensitive match against any of a
/// fixed word list.
#[derive(Clone, Debug)]
pub struct ForcedRule {
    pub kind: DocumentKind,
    pub document: String,
    pattern: Regex,
}

impl ForcedRule {
    pub fn new(
        kind: DocumentKind,
        document: impl Into<String>,
        words: &[&str],
    ) -> Result<Self, regex::Error> {
        let alternatives = words
            .iter()
            .map(|w| {
                w.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{alternatives})\b"))?;
        Ok(Self {
            kind,
            document: document.into(),
            pattern,
        })
    }

    fn matches(&self, utterance: &str) -> bool {
        self.pattern.is_match(utterance)
    }
}

pub struct ContextSelector {
    rules: Vec<SelectionRule>,
    forced: Vec<ForcedRule>,
}

impl ContextSelector {
    pub fn new(rules: Vec<SelectionRule>, forced: Vec<ForcedRule>) -> Self {
        Self { rules, forced }
    }

    pub fn rules(&self) -> &[SelectionRule] {
        &self.rules
    }

    /// Pure function of the utterance.
    pub fn select(&self, utterance: &str) -> ContextSelection {
        let lowered = utterance.to_lowercase();
        let mut selection = ContextSelection::default();

        for rule in self.rules.iter().filter(|r| r.matches(&lowered)) {
            selection.insert(rule.kind, &rule.document);
        }
        for rule in self.forced.iter().filter(|r| r.matches(utterance)) {
            if selection.insert(rule.kind, &rule.document) {
                debug!(document = %rule.document, "forced context inclusion");
            }
        }

        debug!(
            examples = ?selection.examples,
            context = ?selection.context,
            "context selected"
        );
        selection
    }
}

impl Default for ContextSelector {
    fn default() -> Self {
        Self::new(builtin_rules(), builtin_forced())
    }
}

pub fn builtin_rules() -> Vec<SelectionRule> {
    use DocumentKind::{Context, Examples};
    vec![
        SelectionRule::new(
            Examples,
            "authentication.md",
            &["login", "log in", "sign in", "sign up", "signup", "auth", "password", "logout"],
        ),
        SelectionRule::new(
            Examples,
            "forms.md",
            &["form", "input field", "validation", "submit", "checkbox"],
        ),
        SelectionRule::new(
            Examples,
            "data-fetching.md",
            &["fetch", "api", "endpoint", "http", "axios"],
        ),
        SelectionRule::new(
            Examples,
            "routing.md",
            &["route", "routing", "navigation", "navigate", "page"],
        ),
        SelectionRule::new(
            Examples,
            "state-management.md",
            &["state", "zustand", "redux", "context provider"],
        ),
        SelectionRule::new(
            Examples,
            "database.md",
            &["database", "supabase", "sql", "persist", "save data"],
        ),
        SelectionRule::new(Examples, "charts.md", &["chart", "graph", "plot", "visualiz"]),
        SelectionRule::new(Examples, "animations.md", &["animat", "transition", "motion"]),
        SelectionRule::new(
            Examples,
            "landing-page.md",
            &["landing page", "hero section", "homepage", "marketing"],
        ),
        SelectionRule::new(
            Examples,
            "todo-app.md",
            &["todo", "to-do", "task list", "checklist"],
        ),
        SelectionRule::new(
            Context,
            "styling.md",
            &["css", "style", "tailwind", "color", "theme", "dark mode", "responsive"],
        ),
        SelectionRule::new(
            Context,
            "dependencies.md",
            &["install", "package", "dependency", "dependencies", "library", "npm"],
        ),
        SelectionRule::new(
            Context,
            "project-structure.md",
            &["structure", "organize", "folder", "refactor", "architecture"],
        ),
        SelectionRule::new(
            Context,
            "debugging.md",
            &["debug", "troubleshoot", "stack trace"],
        ),
        SelectionRule::new(
            Context,
            "ui-components.md",
            &["shadcn", "design system", "radix"],
        ),
    ]
}

pub fn builtin_forced() -> Vec<ForcedRule> {
    let specs: [(&str, &[&str]); 2] = [
        (
            "debugging.md",
            &[
                "error", "errors", "bug", "bugs", "broken", "crash", "crashes", "fail", "failing",
                "failed", "exception", "issue", "not working",
            ],
        ),
        (
            "ui-components.md",
            &[
                "component", "components", "ui", "button", "buttons", "modal", "dialog", "card",
                "layout", "interface",
            ],
        ),
    ];
    specs
        .into_iter()
        .filter_map(|(document, words)| {
            ForcedRule::new(DocumentKind::Context, document, words)
                .map_err(|e| warn!(document, error = %e, "invalid forced rule, skipping"))
                .ok()
        })
        .collect()
}
