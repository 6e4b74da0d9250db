use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier pairing a tool call with its result. Providers usually supply
/// one; `generate` covers those that do not.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCallId(String);

impl ToolCallId {
    pub fn generate() -> Self {
        Self(format!("call_{}", Uuid::now_v7().simple()))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolCallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ToolCallId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_distinct() {
        let a = ToolCallId::generate();
        let b = ToolCallId::generate();
        assert!(a.as_str().starts_with("call_"), "got: {a}");
        assert_ne!(a, b);
    }

    #[test]
    fn provider_ids_survive_serde() {
        let id = ToolCallId::from_raw("chatcmpl-tool-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""chatcmpl-tool-1""#);
        assert_eq!(ToolCallId::from("chatcmpl-tool-1"), id);
    }
}
