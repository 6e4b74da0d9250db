//! # aegis-settings
//!
//! Settings are resolved from three layers, later layers winning:
//! 1. compiled defaults ([`AegisSettings::default()`])
//! 2. a JSON settings file, deep-merged over the defaults
//! 3. `AEGIS_*` environment variables

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings_from_path, settings_path};
pub use types::*;

use std::path::PathBuf;

/// `$HOME/.aegis`, or `/tmp/.aegis` without a home directory.
pub fn aegis_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".aegis")
}
