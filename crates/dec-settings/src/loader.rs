//! Settings loading with deep merge and environment variable overrides.
//!
//! 1. Start with compiled [`DecSettings::default()`]
//! 2. If `~/.dec/settings.json` exists, deep-merge it over the defaults
//! 3. Apply `DEC_*` environment overrides
//!
//! Objects merge per key, arrays and primitives are replaced, nulls in the
//! file are skipped.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::DecSettings;

/// `~/.dec/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".dec").join("settings.json")
}

pub fn load_settings() -> Result<DecSettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults when the file is missing; an error when it is not valid JSON.
pub fn load_settings_from_path(path: &Path) -> Result<DecSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file(path: &Path) -> Result<DecSettings> {
    let defaults = serde_json::to_value(DecSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

pub fn apply_env_overrides(settings: &mut DecSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Overrides from an arbitrary lookup. Invalid values are ignored.
pub fn apply_overrides(settings: &mut DecSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("DEC_MODEL") {
        settings.provider.model = v;
    }
    if let Some(v) = string("DEC_MAX_TOKENS") {
        match parse_u32_range(&v, 1, 200_000) {
            Some(n) => settings.provider.max_tokens = n,
            None => warn!(key = "DEC_MAX_TOKENS", value = %v, "invalid integer env var, ignoring"),
        }
    }
    if let Some(v) = string("DEC_DOCS_DIR") {
        settings.documents.root = v;
    }
    if let Some(v) = string("DEC_WORKSPACE") {
        settings.workspace.root = v;
    }
    if let Some(v) = string("DEC_LOG_LEVEL") {
        match parse_level(&v) {
            Some(level) => settings.logging.level = level.to_string(),
            None => warn!(key = "DEC_LOG_LEVEL", value = %v, "invalid log level env var, ignoring"),
        }
    }
    if let Some(v) = string("DEC_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn!(key = "DEC_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Normalized level name, or `None` if it is not one `tracing` knows.
pub fn parse_level(val: &str) -> Option<&'static str> {
    match val.trim().to_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}
