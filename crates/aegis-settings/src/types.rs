//! Settings sections. JSON field names are camelCase; every section is
//! `#[serde(default)]` so partial files deserialize.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings for the auditor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AegisSettings {
    pub reasoning: ReasoningSettings,
    pub retry: RetrySettings,
    pub audit: AuditSettings,
    pub render: RenderSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// The OpenAI-compatible endpoint and the models behind each reasoning role.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReasoningSettings {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub instruct_model: String,
    /// Stronger model used after repeated or failed actions and for
    /// key-code corrections.
    pub think_model: String,
    /// Falls back to `think_model` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl ReasoningSettings {
    pub fn verifier(&self) -> &str {
        self.verifier_model.as_deref().unwrap_or(&self.think_model)
    }
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: None,
            instruct_model: "Qwen3-VL-32B-Instruct-FP8".to_string(),
            think_model: "Qwen3-VL-32B-Thinking-FP8".to_string(),
            verifier_model: None,
            temperature: 0.0,
            max_tokens: 4096,
            request_timeout_secs: 600,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_secs: 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditSettings {
    /// Reason/act round-trips before a session is abandoned.
    pub max_steps: u32,
    /// Key-code excerpts longer than this are sent back for simplification.
    pub max_key_code_lines: usize,
    pub annotate_on_start: bool,
    pub max_concurrent_sessions: usize,
    pub max_inspect_bytes: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_key_code_lines: 15,
            annotate_on_start: true,
            max_concurrent_sessions: 1,
            max_inspect_bytes: 32 * 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderSettings {
    pub output_dir: PathBuf,
    /// Graphviz `dot` executable; PNG output is produced only when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dot_binary: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs/attack_path_graphs"),
            dot_binary: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: crate::aegis_dir().join("aegis.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    pub json: bool,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_to_sqlite: false,
            log_db_path: crate::aegis_dir().join("logs.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(AegisSettings::default()).unwrap();
        assert_eq!(json["audit"]["maxKeyCodeLines"], 15);
        assert_eq!(json["reasoning"]["requestTimeoutSecs"], 600);
        assert!(json["reasoning"].get("apiKey").is_none());
        assert!(json["render"].get("dotBinary").is_none());
    }

    #[test]
    fn verifier_falls_back_to_think_model() {
        let mut reasoning = ReasoningSettings::default();
        assert_eq!(reasoning.verifier(), reasoning.think_model);
        reasoning.verifier_model = Some("qwen-vl-max".into());
        assert_eq!(reasoning.verifier(), "qwen-vl-max");
    }

    #[test]
    fn partial_section_fills_defaults() {
        let audit: AuditSettings = serde_json::from_str(r#"{"maxSteps": 7}"#).unwrap();
        assert_eq!(audit.max_steps, 7);
        assert!(audit.annotate_on_start);
        assert_eq!(audit.max_inspect_bytes, 32 * 1024);
    }
}
