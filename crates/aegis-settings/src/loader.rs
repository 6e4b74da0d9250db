//! Settings loading with deep merge and environment overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::AegisSettings;

/// `~/.aegis/settings.json`.
pub fn settings_path() -> PathBuf {
    crate::aegis_dir().join("settings.json")
}

/// Load settings from `path` (defaults when absent) and apply environment
/// overrides. Invalid JSON and out-of-range values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<AegisSettings> {
    let defaults = serde_json::to_value(AegisSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: AegisSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
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

/// Apply `AEGIS_*` overrides read through `lookup`. Values that fail to
/// parse or fall outside their range are ignored with a warning.
pub fn apply_overrides(settings: &mut AegisSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = Env { lookup: &lookup };

    if let Some(v) = env.string("AEGIS_BASE_URL") {
        settings.reasoning.base_url = v;
    }
    if let Some(v) = env.string("AEGIS_API_KEY") {
        settings.reasoning.api_key = Some(v);
    }
    if let Some(v) = env.string("AEGIS_INSTRUCT_MODEL") {
        settings.reasoning.instruct_model = v;
    }
    if let Some(v) = env.string("AEGIS_THINK_MODEL") {
        settings.reasoning.think_model = v;
    }
    if let Some(v) = env.string("AEGIS_VERIFIER_MODEL") {
        settings.reasoning.verifier_model = Some(v);
    }
    if let Some(v) = env.ranged("AEGIS_MAX_STEPS", 1, 10_000) {
        settings.audit.max_steps = v as u32;
    }
    if let Some(v) = env.ranged("AEGIS_MAX_CONCURRENT_SESSIONS", 1, 64) {
        settings.audit.max_concurrent_sessions = v as usize;
    }
    if let Some(v) = env.string("AEGIS_DOT_BINARY") {
        settings.render.dot_binary = Some(PathBuf::from(v));
    }
    if let Some(v) = env.string("AEGIS_DB") {
        settings.storage.database_path = PathBuf::from(v);
    }
    if let Some(v) = env.string("AEGIS_LOG_LEVEL") {
        if parse_level(&v).is_some() {
            settings.logging.level = v.to_lowercase();
        } else {
            warn!(key = "AEGIS_LOG_LEVEL", value = %v, "invalid log level env var, ignoring");
        }
    }
    if let Some(v) = env.boolean("AEGIS_LOG_JSON") {
        settings.logging.json = v;
    }
}

impl AegisSettings {
    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<()> {
        if self.reasoning.base_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("reasoning.baseUrl is empty".into()));
        }
        if self.audit.max_steps == 0 {
            return Err(SettingsError::InvalidValue("audit.maxSteps must be at least 1".into()));
        }
        if self.audit.max_concurrent_sessions == 0 {
            return Err(SettingsError::InvalidValue(
                "audit.maxConcurrentSessions must be at least 1".into(),
            ));
        }
        if self.audit.max_key_code_lines == 0 {
            return Err(SettingsError::InvalidValue(
                "audit.maxKeyCodeLines must be at least 1".into(),
            ));
        }
        if parse_level(&self.logging.level).is_none() {
            return Err(SettingsError::InvalidValue(format!(
                "logging.level '{}' is not a log level",
                self.logging.level
            )));
        }
        Ok(())
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

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_level(val: &str) -> Option<&'static str> {
    match val.to_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn boolean(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn ranged(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "out-of-range env var, ignoring");
        }
        result
    }
}
