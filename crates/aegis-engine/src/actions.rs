//! The closed catalogue of actions a reasoner may request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use aegis_core::messages::ToolCallBlock;
use aegis_core::tools::ToolDefinition;
use aegis_graph::FunctionId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "arguments", rename_all = "snake_case")]
pub enum AuditAction {
    AddNewFunction {
        function: String,
        callers: Vec<FunctionId>,
    },
    CompressCallChain {
        start_function: FunctionId,
        intermediate_functions: Vec<FunctionId>,
        end_function: FunctionId,
        new_edge_label: String,
    },
    UpdateFunctionNode {
        function: FunctionId,
        updates: BTreeMap<String, String>,
    },
    InspectFunction {
        function: FunctionId,
    },
    ListCallees {
        function: FunctionId,
    },
}

impl AuditAction {
    /// Decode a tool call. The error text is reported back to the reasoner.
    pub fn from_call(call: &ToolCallBlock) -> Result<Self, String> {
        if let Value::String(raw) = &call.arguments {
            return Err(format!("arguments of {} are not valid JSON: {raw}", call.name));
        }
        let tagged = json!({"action": call.name, "arguments": call.arguments});
        serde_json::from_value(tagged).map_err(|e| {
            if catalogue().iter().any(|d| d.name == call.name) {
                format!("invalid arguments for {}: {e}", call.name)
            } else {
                format!("unknown action {}", call.name)
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AddNewFunction { .. } => "add_new_function",
            Self::CompressCallChain { .. } => "compress_call_chain",
            Self::UpdateFunctionNode { .. } => "update_function_node",
            Self::InspectFunction { .. } => "inspect_function",
            Self::ListCallees { .. } => "list_callees",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::AddNewFunction { .. } | Self::CompressCallChain { .. } | Self::UpdateFunctionNode { .. }
        )
    }
}

/// Canonical description of a call, used to spot repeats in history.
pub fn describe(call: &ToolCallBlock) -> String {
    format!("Invoked {} with arguments {}", call.name, call.arguments)
}

/// Tool definitions advertised to the reasoner.
pub fn catalogue() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "add_new_function",
            "Add a function to the call graph as a direct callee of the given callers. \
             `function` is the function name or a dotted suffix of it; it is resolved \
             among the real callees of the callers.",
            json!({
                "type": "object",
                "required": ["function", "callers"],
                "properties": {
                    "function": {"type": "string", "description": "Name or dotted suffix of the callee to add"},
                    "callers": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Fully qualified graph nodes that call the function"
                    }
                }
            }),
        ),
        ToolDefinition::new(
            "compress_call_chain",
            "Replace a linear chain start -> intermediates -> end with a single labeled edge \
             start -> end. Every intermediate must have exactly one caller and one callee. \
             The label may use {start_function}, {intermediate_functions} and {end_function}.",
            json!({
                "type": "object",
                "required": ["start_function", "intermediate_functions", "end_function", "new_edge_label"],
                "properties": {
                    "start_function": {"type": "string"},
                    "intermediate_functions": {"type": "array", "items": {"type": "string"}},
                    "end_function": {"type": "string"},
                    "new_edge_label": {"type": "string", "description": "What the collapsed chain does with the data"}
                }
            }),
        ),
        ToolDefinition::new(
            "update_function_node",
            "Record findings on a graph node. Allowed keys: security_sanitizer, \
             taint_propagation, summary, key_codes.",
            json!({
                "type": "object",
                "required": ["function", "updates"],
                "properties": {
                    "function": {"type": "string"},
                    "updates": {
                        "type": "object",
                        "additionalProperties": {"type": "string"},
                        "description": "Finding kind to text"
                    }
                }
            }),
        ),
        ToolDefinition::new(
            "inspect_function",
            "Return the source code of a function.",
            json!({
                "type": "object",
                "required": ["function"],
                "properties": {
                    "function": {"type": "string", "description": "Fully qualified function name"}
                }
            }),
        ),
        ToolDefinition::new(
            "list_callees",
            "List the functions a function calls, one per line.",
            json!({
                "type": "object",
                "required": ["function"],
                "properties": {
                    "function": {"type": "string", "description": "Fully qualified function name"}
                }
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::ids::ToolCallId;

    fn call(name: &str, arguments: Value) -> ToolCallBlock {
        ToolCallBlock {
            id: ToolCallId::from_raw("c1"),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn decodes_every_catalogue_entry() {
        let compress = AuditAction::from_call(&call(
            "compress_call_chain",
            json!({"start_function": "a", "intermediate_functions": ["b", "c"],
                   "end_function": "d", "new_edge_label": "via {intermediate_functions}"}),
        ))
        .unwrap();
        assert_eq!(compress.name(), "compress_call_chain");
        assert!(compress.is_mutation());

        let update = AuditAction::from_call(&call(
            "update_function_node",
            json!({"function": "a.f1", "updates": {"taint_propagation": "body flows"}}),
        ))
        .unwrap();
        let AuditAction::UpdateFunctionNode { updates, .. } = update else {
            panic!("wrong variant");
        };
        assert_eq!(updates["taint_propagation"], "body flows");

        let inspect = AuditAction::from_call(&call("inspect_function", json!({"function": "a.f"}))).unwrap();
        assert_eq!(inspect, AuditAction::InspectFunction { function: "a.f".into() });
        assert!(!inspect.is_mutation());
    }

    #[test]
    fn unknown_action() {
        let err = AuditAction::from_call(&call("delete_graph", json!({}))).unwrap_err();
        assert_eq!(err, "unknown action delete_graph");
    }

    #[test]
    fn bad_arguments_name_the_action() {
        let err = AuditAction::from_call(&call("add_new_function", json!({"function": "f"}))).unwrap_err();
        assert!(err.starts_with("invalid arguments for add_new_function"), "{err}");

        let err = AuditAction::from_call(&call("list_callees", Value::String("{oops".into()))).unwrap_err();
        assert!(err.contains("not valid JSON"));
    }

    #[test]
    fn description_is_stable_across_key_order() {
        let a = call("add_new_function", json!({"function": "load", "callers": ["a.f"]}));
        let b = call("add_new_function", json!({"callers": ["a.f"], "function": "load"}));
        assert_eq!(describe(&a), describe(&b));
        assert_eq!(
            describe(&a),
            r#"Invoked add_new_function with arguments {"callers":["a.f"],"function":"load"}"#
        );
    }

    #[test]
    fn catalogue_names_match_variants() {
        let names: Vec<_> = catalogue().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            ["add_new_function", "compress_call_chain", "update_function_node", "inspect_function", "list_callees"]
        );
    }
}
