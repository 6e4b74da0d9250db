use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::messages::AssistantMessage;
use crate::stream::StreamEvent;

/// Options controlling generation behavior.
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A reasoning capability: given a context and an action catalogue, produce
/// text or action requests.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    fn supports_tools(&self) -> bool {
        true
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError>;
}

/// Drive a provider stream to its terminal event and return the final message.
pub async fn complete(
    provider: &dyn LlmProvider,
    context: &LlmContext,
    options: &StreamOptions,
) -> Result<AssistantMessage, GatewayError> {
    let mut stream = provider.stream(context, options).await?;
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Done { message, .. } => return Ok(message),
            StreamEvent::Error { error } => return Err(error),
            _ => {}
        }
    }
    Err(GatewayError::MalformedResponse(
        "stream ended without a terminal event".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::StopReason;

    struct Scripted(Vec<StreamEvent>);

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "scripted-1"
        }
        async fn stream(
            &self,
            _context: &LlmContext,
            _options: &StreamOptions,
        ) -> Result<EventStream, GatewayError> {
            Ok(Box::pin(futures::stream::iter(self.0.clone())))
        }
    }

    #[test]
    fn stream_options_defaults() {
        let opts = StreamOptions::default();
        assert!(opts.max_tokens.is_none());
        assert!(opts.temperature.is_none());
    }

    #[tokio::test]
    async fn complete_returns_done_message() {
        let provider = Scripted(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: "hi".into() },
            StreamEvent::Done {
                message: AssistantMessage::text("hi"),
                stop_reason: StopReason::EndTurn,
            },
        ]);
        let msg = complete(&provider, &LlmContext::empty(), &StreamOptions::default())
            .await
            .unwrap();
        assert_eq!(msg.text_content(), "hi");
    }

    #[tokio::test]
    async fn complete_surfaces_error_event() {
        let provider = Scripted(vec![
            StreamEvent::Start,
            StreamEvent::Error { error: GatewayError::ProviderOverloaded },
        ]);
        let err = complete(&provider, &LlmContext::empty(), &StreamOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn complete_rejects_truncated_stream() {
        let provider = Scripted(vec![StreamEvent::Start]);
        let err = complete(&provider, &LlmContext::empty(), &StreamOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MalformedResponse(_)));
    }
}
