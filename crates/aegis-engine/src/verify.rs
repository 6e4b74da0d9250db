use std::sync::Arc;

use tracing::{debug, instrument};

use aegis_core::context::{Attachment, LlmContext};
use aegis_core::errors::GatewayError;
use aegis_core::messages::{Message, UserContent, UserMessage};
use aegis_core::provider::{complete, LlmProvider, StreamOptions};

use crate::parse::{lenient_bool, lenient_text, parse_object};
use crate::prompts::VERIFICATION_PROMPT;

pub const UNPARSABLE_VERIFICATION: &str = "could not parse verification";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Accepted { is_vulnerable: bool, feedback: String },
    Rejected { feedback: String },
}

/// Independent second opinion on a terminal judgment. Anything short of
/// an explicit, well-formed acceptance is a rejection.
pub struct VerificationGate {
    provider: Arc<dyn LlmProvider>,
    options: StreamOptions,
}

impl VerificationGate {
    pub fn new(provider: Arc<dyn LlmProvider>, options: StreamOptions) -> Self {
        Self { provider, options }
    }

    /// Ask the verifier about the conversation in `context`. The verification
    /// prompt is appended to a copy; the caller's history is not touched.
    #[instrument(skip_all, fields(model = self.provider.model(), messages = context.messages.len()))]
    pub async fn verify(
        &self,
        context: &LlmContext,
        attachment: Option<&Attachment>,
    ) -> Result<GateDecision, GatewayError> {
        let mut request = context.clone();
        let mut content = vec![UserContent::Text { text: VERIFICATION_PROMPT.to_string() }];
        if let Some(attachment) = attachment {
            content.push(attachment.clone().into_content());
        }
        request.messages.push(Message::User(UserMessage { content }));

        let response = complete(self.provider.as_ref(), &request, &self.options).await?;
        let text = response.text_content();
        debug!(response = %text, "verification response");
        Ok(parse_decision(&text))
    }
}

pub fn parse_decision(text: &str) -> GateDecision {
    let generic = || GateDecision::Rejected { feedback: UNPARSABLE_VERIFICATION.to_string() };
    let Ok(object) = parse_object(text) else {
        return generic();
    };
    let feedback = object.get("feedback").map(lenient_text).unwrap_or_default();
    match object.get("is_accurate_and_complete").and_then(lenient_bool) {
        None => generic(),
        Some(false) if feedback.trim().is_empty() => GateDecision::Rejected {
            feedback: "the conclusion is not accurate and complete".to_string(),
        },
        Some(false) => GateDecision::Rejected { feedback },
        Some(true) => match object.get("is_vulnerable").and_then(lenient_bool) {
            Some(is_vulnerable) => GateDecision::Accepted { is_vulnerable, feedback },
            None => generic(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_llm::{MockProvider, MockResponse};

    #[test]
    fn accepted_with_verdict() {
        let decision = parse_decision(
            "```json\n{\"is_accurate_and_complete\": true, \"feedback\": \"argv reaches loads\", \"is_vulnerable\": true}\n```",
        );
        assert_eq!(
            decision,
            GateDecision::Accepted { is_vulnerable: true, feedback: "argv reaches loads".into() }
        );
    }

    #[test]
    fn rejection_keeps_feedback() {
        let decision = parse_decision(r#"{"is_accurate_and_complete": false, "feedback": "inspect app.run"}"#);
        assert_eq!(decision, GateDecision::Rejected { feedback: "inspect app.run".into() });
    }

    #[test]
    fn fails_safe_on_garbage_or_missing_fields() {
        let generic = GateDecision::Rejected { feedback: UNPARSABLE_VERIFICATION.into() };
        assert_eq!(parse_decision("looks fine to me"), generic);
        assert_eq!(parse_decision(r#"{"feedback": "ok"}"#), generic);
        assert_eq!(parse_decision(r#"{"is_accurate_and_complete": true, "feedback": "ok"}"#), generic);
    }

    #[tokio::test]
    async fn prompt_goes_to_a_copy_of_the_context() {
        let verifier = Arc::new(MockProvider::named(
            "verifier",
            vec![MockResponse::text(r#"{"is_accurate_and_complete": true, "feedback": "fine", "is_vulnerable": false}"#)],
        ));
        let gate = VerificationGate::new(verifier.clone(), StreamOptions::default());
        let mut context = LlmContext::with_system("audit");
        context.messages.push(Message::assistant_text("{\"is_vulnerable\": false}"));
        let image = Attachment::Image { mime_type: "image/png".into(), data: "AA".into() };

        let decision = gate.verify(&context, Some(&image)).await.unwrap();
        assert!(matches!(decision, GateDecision::Accepted { is_vulnerable: false, .. }));
        assert_eq!(context.messages.len(), 1);

        let seen = verifier.contexts();
        assert_eq!(seen[0].messages.len(), 2);
        assert_eq!(seen[0].image_count(), 1);
        assert!(seen[0].messages[1].text().starts_with("Double-check the conclusion"));
    }
}
