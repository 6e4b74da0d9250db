use serde::{Deserialize, Serialize};

use crate::messages::{Message, UserContent, UserMessage};
use crate::tools::ToolDefinition;

/// Everything a reasoning provider sees for one request.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            ..Self::default()
        }
    }

    /// A single-turn context: one user message, no tools.
    pub fn single(system_prompt: Option<String>, user: UserMessage) -> Self {
        Self {
            system_prompt,
            messages: vec![Message::User(user)],
            tools: Vec::new(),
        }
    }

    pub fn image_count(&self) -> usize {
        self.messages
            .iter()
            .map(|m| match m {
                Message::User(u) => u
                    .content
                    .iter()
                    .filter(|c| matches!(c, UserContent::Image { .. }))
                    .count(),
                _ => 0,
            })
            .sum()
    }
}

/// The visual artifact attached to a reasoning request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    /// Base64 encoded image bytes.
    Image { mime_type: String, data: String },
    /// Textual graph description (DOT source).
    Text { text: String },
}

impl Attachment {
    pub fn into_content(self) -> UserContent {
        match self {
            Attachment::Image { mime_type, data } => UserContent::Image { mime_type, data },
            Attachment::Text { text } => UserContent::Text { text },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_has_nothing() {
        let ctx = LlmContext::empty();
        assert!(ctx.system_prompt.is_none());
        assert!(ctx.messages.is_empty());
        assert!(ctx.tools.is_empty());
    }

    #[test]
    fn image_count_spans_messages() {
        let mut ctx = LlmContext::with_system("audit");
        ctx.messages.push(Message::User(UserMessage {
            content: vec![
                UserContent::Text { text: "graph".into() },
                Attachment::Image { mime_type: "image/png".into(), data: "AA".into() }.into_content(),
            ],
        }));
        ctx.messages.push(Message::assistant_text("ok"));
        ctx.messages.push(Message::User(UserMessage {
            content: vec![Attachment::Text { text: "digraph {}".into() }.into_content()],
        }));
        assert_eq!(ctx.image_count(), 1);
    }

    #[test]
    fn attachment_serde_tag() {
        let json = serde_json::to_value(Attachment::Text { text: "x".into() }).unwrap();
        assert_eq!(json["kind"], "text");
    }
}
