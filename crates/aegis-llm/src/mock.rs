use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use aegis_core::context::LlmContext;
use aegis_core::errors::GatewayError;
use aegis_core::ids::ToolCallId;
use aegis_core::messages::{AssistantMessage, StopReason, ToolCallBlock};
use aegis_core::provider::{EventStream, LlmProvider, StreamOptions};
use aegis_core::stream::StreamEvent;

/// Pre-programmed responses for deterministic testing without an endpoint.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Stream(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: text.to_string() },
            StreamEvent::Done {
                message: AssistantMessage::text(text),
                stop_reason: StopReason::EndTurn,
            },
        ])
    }

    /// A response requesting the given actions, in order.
    pub fn tool_calls(calls: Vec<(&str, serde_json::Value)>) -> Self {
        let blocks: Vec<ToolCallBlock> = calls
            .into_iter()
            .map(|(name, arguments)| ToolCallBlock {
                id: ToolCallId::generate(),
                name: name.to_string(),
                arguments,
            })
            .collect();

        let mut events = vec![StreamEvent::Start];
        for block in &blocks {
            events.push(StreamEvent::ToolCallStart {
                tool_call_id: block.id.clone(),
                name: block.name.clone(),
            });
            events.push(StreamEvent::ToolCallEnd { tool_call: block.clone() });
        }
        events.push(StreamEvent::Done {
            message: AssistantMessage::with_tool_calls("", blocks),
            stop_reason: StopReason::ToolUse,
        });
        Self::Stream(events)
    }

    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::tool_calls(vec![(name, arguments)])
    }

    /// A stream that ends with an error event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Returns pre-programmed responses in order and records every context it
/// was called with.
pub struct MockProvider {
    model: String,
    responses: Mutex<VecDeque<MockResponse>>,
    seen: Mutex<Vec<LlmContext>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self::named("mock-model", responses)
    }

    pub fn named(model: &str, responses: Vec<MockResponse>) -> Self {
        Self {
            model: model.to_string(),
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }

    /// Contexts received so far, oldest first.
    pub fn contexts(&self) -> Vec<LlmContext> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let call = {
            let mut seen = self.seen.lock();
            seen.push(context.clone());
            seen.len()
        };
        let next = self.responses.lock().pop_front();
        match next {
            Some(response) => resolve_response(response).await,
            None => Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {call}"
            ))),
        }
    }
}

/// Unrolls nested delays iteratively.
async fn resolve_response(response: MockResponse) -> Result<EventStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
