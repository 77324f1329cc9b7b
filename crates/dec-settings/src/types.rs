//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`,
//! so a settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecSettings {
    pub provider: ProviderSettings,
    pub documents: DocumentSettings,
    pub workspace: WorkspaceSettings,
    pub context: ContextSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 8192,
            temperature: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

/// Where `core.md`, `examples/` and `context/` live.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentSettings {
    pub root: String,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            root: "docs".to_string(),
        }
    }
}

/// Parent directory of the per-environment project directories.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceSettings {
    pub root: String,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: "projects".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// List the available documents in the system prompt.
    pub catalog: bool,
    /// Render the current project into the system prompt.
    pub snapshot: bool,
    pub max_file_bytes: usize,
    pub max_files: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            catalog: true,
            snapshot: true,
            max_file_bytes: 16 * 1024,
            max_files: 50,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
