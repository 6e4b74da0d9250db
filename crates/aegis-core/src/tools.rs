use serde::{Deserialize, Serialize};

/// Action definition sent to the reasoner as part of the context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
        }
    }
}

/// Outcome of one dispatched action, as reported back to the reasoner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_serde() {
        let def = ToolDefinition::new(
            "list_callees",
            "List real callees",
            serde_json::json!({"type": "object"}),
        );
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["name"], "list_callees");
        let parsed: ToolDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, def);
    }

    #[test]
    fn outcome_constructors() {
        assert!(!ToolOutcome::ok("fine").is_error);
        assert!(ToolOutcome::error("bad").is_error);
    }
}
