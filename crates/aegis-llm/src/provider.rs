use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};

use aegis_core::context::LlmContext;
use aegis_core::errors::GatewayError;
use aegis_core::provider::{EventStream, LlmProvider, StreamOptions};
use aegis_core::stream::StreamEvent;

use crate::converter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for one model behind an OpenAI-compatible endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Base URL up to and including the version segment, e.g. `http://host:8000/v1`.
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub request_timeout: Duration,
}

/// Chat-completions client. Responses are requested whole and replayed as
/// a short event stream.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key,
            model: config.model,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, context, options), fields(model = %self.model, messages = context.messages.len()))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let body = converter::build_request_body(context, options, &self.model);

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(Duration::ZERO)
            } else {
                GatewayError::NetworkError(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(match GatewayError::from_status(status, body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after },
                other => other,
            });
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        let (message, stop_reason) = converter::parse_response(&payload)?;
        debug!(
            tool_calls = message.tool_calls().len(),
            text_len = message.text_content().len(),
            "completion received"
        );

        let mut events = vec![StreamEvent::Start];
        let text = message.text_content();
        if !text.is_empty() {
            events.push(StreamEvent::TextDelta { delta: text });
        }
        for call in message.tool_calls() {
            events.push(StreamEvent::ToolCallStart {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
            });
            events.push(StreamEvent::ToolCallEnd { tool_call: call.clone() });
        }
        events.push(StreamEvent::Done { message, stop_reason });

        Ok(Box::pin(stream::iter(events)))
    }
}
