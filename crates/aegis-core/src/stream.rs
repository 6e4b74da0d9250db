use crate::errors::GatewayError;
use crate::ids::ToolCallId;
use crate::messages::{AssistantMessage, StopReason, ToolCallBlock};

/// Events emitted by a provider, in order:
///
/// Start → (TextDelta* | ToolCallStart → ToolCallEnd)* → Done | Error
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta { delta: String },
    ToolCallStart { tool_call_id: ToolCallId, name: String },
    ToolCallEnd { tool_call: ToolCallBlock },
    Done { message: AssistantMessage, stop_reason: StopReason },
    Error { error: GatewayError },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
