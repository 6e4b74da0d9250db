use serde_json::{json, Value};

use aegis_core::context::LlmContext;
use aegis_core::errors::GatewayError;
use aegis_core::ids::ToolCallId;
use aegis_core::messages::{
    AssistantContent, AssistantMessage, Message, StopReason, ToolCallBlock, ToolResultMessage,
    UserContent, UserMessage,
};
use aegis_core::provider::StreamOptions;
use aegis_core::tokens::TokenUsage;

/// Convert a context into an OpenAI-compatible chat-completions body.
pub fn build_request_body(context: &LlmContext, options: &StreamOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "stream": false,
    });

    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }

    let mut messages = Vec::with_capacity(context.messages.len() + 1);
    if let Some(system) = &context.system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.extend(context.messages.iter().map(convert_message));
    body["messages"] = json!(messages);

    if !context.tools.is_empty() {
        let tools: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
        body["tool_choice"] = json!("auto");
    }

    body
}

fn convert_message(msg: &Message) -> Value {
    match msg {
        Message::User(user) => convert_user_message(user),
        Message::Assistant(asst) => convert_assistant_message(asst),
        Message::ToolResult(tr) => convert_tool_result(tr),
    }
}

fn convert_user_message(msg: &UserMessage) -> Value {
    let content: Vec<Value> = msg
        .content
        .iter()
        .map(|c| match c {
            UserContent::Text { text } => json!({"type": "text", "text": text}),
            UserContent::Image { mime_type, data } => json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{mime_type};base64,{data}")}
            }),
        })
        .collect();

    json!({"role": "user", "content": content})
}

fn convert_assistant_message(msg: &AssistantMessage) -> Value {
    let text = msg.text_content();
    let mut out = json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { json!(text) },
    });

    let calls: Vec<Value> = msg
        .content
        .iter()
        .filter_map(|c| match c {
            AssistantContent::ToolCall(tc) => Some(convert_tool_call(tc)),
            AssistantContent::Text { .. } => None,
        })
        .collect();
    if !calls.is_empty() {
        out["tool_calls"] = json!(calls);
    }
    out
}

fn convert_tool_call(tc: &ToolCallBlock) -> Value {
    json!({
        "id": tc.id.as_str(),
        "type": "function",
        "function": {
            "name": tc.name,
            "arguments": tc.arguments.to_string(),
        }
    })
}

fn convert_tool_result(msg: &ToolResultMessage) -> Value {
    json!({
        "role": "tool",
        "tool_call_id": msg.tool_call_id.as_str(),
        "content": msg.text,
    })
}

/// Parse a non-streamed chat-completions response into an assistant message.
pub fn parse_response(body: &Value) -> Result<(AssistantMessage, StopReason), GatewayError> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| GatewayError::MalformedResponse("response has no choices".into()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| GatewayError::MalformedResponse("choice has no message".into()))?;

    let mut content = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            content.push(AssistantContent::Text { text: text.to_string() });
        }
    }

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            content.push(AssistantContent::ToolCall(parse_tool_call(call)?));
        }
    }

    let has_calls = content
        .iter()
        .any(|c| matches!(c, AssistantContent::ToolCall(_)));
    let stop_reason = match choice.get("finish_reason").and_then(Value::as_str) {
        Some("length") => StopReason::MaxTokens,
        _ if has_calls => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    let usage = body.get("usage").map(|u| TokenUsage {
        input_tokens: read_u32(u, "prompt_tokens"),
        output_tokens: read_u32(u, "completion_tokens"),
    });

    Ok((
        AssistantMessage {
            content,
            usage,
            stop_reason: Some(stop_reason.clone()),
        },
        stop_reason,
    ))
}

fn parse_tool_call(call: &Value) -> Result<ToolCallBlock, GatewayError> {
    let function = call
        .get("function")
        .ok_or_else(|| GatewayError::MalformedResponse("tool call has no function".into()))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::MalformedResponse("tool call has no name".into()))?;

    // Arguments arrive as a JSON-encoded string; keep the raw text when it
    // does not parse so the dispatcher can report it.
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        }
        Some(other) => other.clone(),
        None => json!({}),
    };

    let id = call
        .get("id")
        .and_then(Value::as_str)
        .map(ToolCallId::from_raw)
        .unwrap_or_else(ToolCallId::generate);

    Ok(ToolCallBlock {
        id,
        name: name.to_string(),
        arguments,
    })
}

fn read_u32(v: &Value, key: &str) -> u32 {
    v.get(key)
        .and_then(Value::as_u64)
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}
