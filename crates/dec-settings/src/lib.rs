//! # dec-settings
//!
//! Settings are layered, lowest priority first:
//! 1. **Compiled defaults**: [`DecSettings::default()`]
//! 2. **User file**: `~/.dec/settings.json`, deep-merged over the defaults
//! 3. **Environment**: `DEC_*` overrides
//!
//! ```no_run
//! let settings = dec_settings::load_settings().unwrap_or_default();
//! println!("model: {}", settings.provider.model);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
