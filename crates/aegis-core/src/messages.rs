use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;
use crate::tokens::TokenUsage;

/// One entry of an audit conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultMessage),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: Vec<UserContent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<AssistantContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub tool_call_id: ToolCallId,
    pub text: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { mime_type: String, data: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AssistantContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallBlock),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallBlock {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage::text(text))
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(text))
    }

    pub fn tool_result(tool_call_id: ToolCallId, text: impl Into<String>, is_error: bool) -> Self {
        Message::ToolResult(ToolResultMessage {
            tool_call_id,
            text: text.into(),
            is_error,
        })
    }

    /// Plain text carried by the message; images are skipped.
    pub fn text(&self) -> String {
        match self {
            Message::User(u) => u.text_content(),
            Message::Assistant(a) => a.text_content(),
            Message::ToolResult(t) => t.text.clone(),
        }
    }
}

impl UserMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![UserContent::Text { text: text.into() }],
        }
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                UserContent::Text { text } => Some(text.as_str()),
                UserContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, UserContent::Image { .. }))
    }
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![AssistantContent::Text { text: text.into() }],
            usage: None,
            stop_reason: Some(StopReason::EndTurn),
        }
    }

    pub fn with_tool_calls(text: impl Into<String>, calls: Vec<ToolCallBlock>) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            content.push(AssistantContent::Text { text });
        }
        content.extend(calls.into_iter().map(AssistantContent::ToolCall));
        Self {
            content,
            usage: None,
            stop_reason: Some(StopReason::ToolUse),
        }
    }

    pub fn tool_calls(&self) -> Vec<&ToolCallBlock> {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::ToolCall(tc) => Some(tc),
                AssistantContent::Text { .. } => None,
            })
            .collect()
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text { text } => Some(text.as_str()),
                AssistantContent::ToolCall(_) => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, AssistantContent::ToolCall(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_message() {
        let msg = Message::user_text("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "hello");
    }

    #[test]
    fn tool_result_message() {
        let id = ToolCallId::generate();
        let msg = Message::tool_result(id.clone(), "result", true);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool_result");
        assert_eq!(json["tool_call_id"], id.as_str());
        assert_eq!(json["is_error"], true);
        assert_eq!(msg.text(), "result");
    }

    #[test]
    fn assistant_tool_calls_extracted() {
        let tc = ToolCallBlock {
            id: ToolCallId::generate(),
            name: "update_function_node".into(),
            arguments: serde_json::json!({"function": "pkg.f"}),
        };
        let msg = AssistantMessage::with_tool_calls("annotating", vec![tc]);
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls().len(), 1);
        assert_eq!(msg.tool_calls()[0].name, "update_function_node");
        assert_eq!(msg.text_content(), "annotating");
        assert_eq!(msg.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn empty_text_is_not_stored_with_tool_calls() {
        let msg = AssistantMessage::with_tool_calls("", Vec::new());
        assert!(msg.content.is_empty());
    }

    #[test]
    fn user_text_skips_images() {
        let msg = UserMessage {
            content: vec![
                UserContent::Text { text: "graph".into() },
                UserContent::Image { mime_type: "image/png".into(), data: "AAAA".into() },
            ],
        };
        assert!(msg.has_image());
        assert_eq!(msg.text_content(), "graph");
    }

    #[test]
    fn serde_roundtrip_mixed_history() {
        let history = vec![
            Message::user_text("start"),
            Message::Assistant(AssistantMessage::with_tool_calls(
                "",
                vec![ToolCallBlock {
                    id: ToolCallId::from_raw("call_1"),
                    name: "list_callees".into(),
                    arguments: serde_json::json!({"function": "a.b"}),
                }],
            )),
            Message::tool_result(ToolCallId::from_raw("call_1"), "a.c", false),
        ];
        let json = serde_json::to_string(&history).unwrap();
        let parsed: Vec<Message> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, history);
    }
}
