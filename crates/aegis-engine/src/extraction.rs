//! Per-function finding extraction.
//!
//! The function body is cut after the last line that calls something on
//! the path, the instruct role is asked for a structured analysis, and the
//! think role corrects responses that do not parse or whose key-code
//! excerpt is too long. Extraction never fails: the worst case is a
//! `summary` holding whatever text came back.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use aegis_core::context::{Attachment, LlmContext};
use aegis_core::messages::{Message, UserContent, UserMessage};
use aegis_core::provider::{complete, LlmProvider, StreamOptions};
use aegis_graph::{FindingKind, Findings, FunctionId};

use crate::parse::{lenient_bool, lenient_text, parse_object};
use crate::prompts::{extraction_prompt, FIX_KEY_CODES, FIX_UNPARSABLE};

pub const DEFAULT_MAX_KEY_CODE_LINES: usize = 15;

const ELISION: &str = "# ...";

pub struct NodeAnalyzer {
    instruct: Arc<dyn LlmProvider>,
    think: Arc<dyn LlmProvider>,
    options: StreamOptions,
    max_key_code_lines: usize,
}

impl NodeAnalyzer {
    pub fn new(instruct: Arc<dyn LlmProvider>, think: Arc<dyn LlmProvider>, options: StreamOptions) -> Self {
        Self {
            instruct,
            think,
            options,
            max_key_code_lines: DEFAULT_MAX_KEY_CODE_LINES,
        }
    }

    pub fn with_max_key_code_lines(mut self, lines: usize) -> Self {
        self.max_key_code_lines = lines;
        self
    }

    /// Findings for `function` given its body and the path callees it reaches.
    #[instrument(skip_all, fields(function = %function, callees = callees.len()))]
    pub async fn analyze(
        &self,
        function: &FunctionId,
        body: &str,
        callees: &[FunctionId],
        sink: &FunctionId,
        attachment: Option<&Attachment>,
    ) -> Findings {
        let excerpt = extract_codes_before_callees(body, callees, sink);
        let targets: Vec<String> = callees.iter().map(ToString::to_string).collect();
        let mut content = vec![UserContent::Text {
            text: extraction_prompt(function, &excerpt, &targets),
        }];
        if let Some(attachment) = attachment {
            content.push(attachment.clone().into_content());
        }
        let mut context = LlmContext::single(None, UserMessage { content });

        let first = match complete(self.instruct.as_ref(), &context, &self.options).await {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "extraction request failed");
                return summary_only(format!("analysis unavailable: {err}"));
            }
        };
        let first_text = first.text_content();
        debug!(response = %first_text, "extraction response");

        let parsed = parse_object(&first_text);
        let fix = match &parsed {
            Err(_) => Some(FIX_UNPARSABLE),
            Ok(object) if key_code_lines(object) > self.max_key_code_lines => Some(FIX_KEY_CODES),
            Ok(_) => None,
        };
        let mut analysis = parsed.ok();

        if let Some(fix) = fix {
            warn!(reason = fix, "extraction response needs correction");
            context.messages.push(Message::Assistant(first));
            context.messages.push(Message::user_text(fix));
            match complete(self.think.as_ref(), &context, &self.options).await {
                Ok(message) => match parse_object(&message.text_content()) {
                    Ok(correction) => {
                        let mut merged = analysis.unwrap_or_default();
                        merged.extend(correction);
                        analysis = Some(merged);
                    }
                    Err(err) => warn!(error = %err, "correction is not parsable"),
                },
                Err(err) => warn!(error = %err, "correction request failed"),
            }
        }

        match analysis {
            Some(object) => findings_from(&object),
            None => {
                warn!("keeping raw extraction text as summary");
                summary_only(first_text.trim().to_string())
            }
        }
    }
}

/// Body up to and including the last line calling one of `callees`,
/// followed by an elision marker when lines were dropped. The whole body
/// when nothing matches.
pub fn extract_codes_before_callees(body: &str, callees: &[FunctionId], sink: &FunctionId) -> String {
    let targets: Vec<String> = callees
        .iter()
        .map(|callee| {
            if callee == sink {
                format!("{sink}(")
            } else {
                format!("{}(", callee.last_segment())
            }
        })
        .collect();
    let lines: Vec<&str> = body.split('\n').collect();
    let last = lines
        .iter()
        .rposition(|line| targets.iter().any(|t| line.contains(t.as_str())));
    match last {
        None => body.to_string(),
        Some(idx) if idx == lines.len() - 1 => body.to_string(),
        Some(idx) => {
            let mut kept = lines[..=idx].join("\n");
            kept.push('\n');
            kept.push_str(ELISION);
            kept
        }
    }
}

fn key_code_lines(object: &Map<String, Value>) -> usize {
    object
        .get("key_codes_in_function")
        .map(|v| lenient_text(v).lines().count())
        .unwrap_or(0)
}

fn flag(object: &Map<String, Value>, key: &str) -> bool {
    object.get(key).and_then(lenient_bool).unwrap_or(false)
}

fn text(object: &Map<String, Value>, key: &str) -> String {
    object.get(key).map(lenient_text).unwrap_or_default()
}

fn findings_from(object: &Map<String, Value>) -> Findings {
    let mut findings = Findings::new();
    let sanitizer = flag(object, "is_security_sanitizer");
    let taint = flag(object, "is_taint_propagation");
    if sanitizer {
        findings.insert(FindingKind::SecuritySanitizer, text(object, "security_sanitizer_analysis"));
    }
    if taint {
        findings.insert(FindingKind::TaintPropagation, text(object, "taint_propagation_analysis"));
    }
    if !sanitizer && !taint {
        let summary = text(object, "summary");
        let summary = if summary.is_empty() {
            Value::Object(object.clone()).to_string()
        } else {
            summary
        };
        findings.insert(FindingKind::Summary, summary);
    }
    let key_codes = text(object, "key_codes_in_function");
    if !key_codes.trim().is_empty() {
        findings.insert(FindingKind::KeyCodes, key_codes);
    }
    findings
}

fn summary_only(text: String) -> Findings {
    Findings::from([(FindingKind::Summary, text)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::errors::GatewayError;
    use aegis_llm::{MockProvider, MockResponse};

    const BODY: &str = "def load(req):\n    path = req.args['p']\n    check(path)\n    model = torch.load(path)\n    return model";

    fn analyzer(instruct: Vec<MockResponse>, think: Vec<MockResponse>) -> (NodeAnalyzer, Arc<MockProvider>, Arc<MockProvider>) {
        let instruct = Arc::new(MockProvider::named("instruct", instruct));
        let think = Arc::new(MockProvider::named("think", think));
        let analyzer = NodeAnalyzer::new(instruct.clone(), think.clone(), StreamOptions::default());
        (analyzer, instruct, think)
    }

    #[test]
    fn cuts_after_last_matching_call() {
        let sink = FunctionId::from("torch.load");
        let excerpt = extract_codes_before_callees(BODY, &[FunctionId::from("app.util.check"), sink.clone()], &sink);
        assert!(excerpt.ends_with("    model = torch.load(path)\n# ..."));
        assert!(!excerpt.contains("return model"));
    }

    #[test]
    fn callee_matched_by_last_segment() {
        let excerpt = extract_codes_before_callees(BODY, &[FunctionId::from("app.util.check")], &FunctionId::from("os.system"));
        assert!(excerpt.ends_with("    check(path)\n# ..."));
    }

    #[test]
    fn no_match_or_last_line_keeps_whole_body() {
        let sink = FunctionId::from("os.system");
        assert_eq!(extract_codes_before_callees(BODY, &[], &sink), BODY);
        let body = "def f(x):\n    os.system(x)";
        assert_eq!(extract_codes_before_callees(body, &[sink.clone()], &sink), body);
    }

    #[tokio::test]
    async fn structured_response_becomes_findings() {
        let (analyzer, instruct, think) = analyzer(
            vec![MockResponse::text(
                "```json\n{\"summary\": \"loads a model\", \"is_taint_propagation\": true,\n\
                 \"taint_propagation_analysis\": \"p flows into torch.load\",\n\
                 \"is_security_sanitizer\": false, \"security_sanitizer_analysis\": \"\",\n\
                 \"key_codes_in_function\": \"model = torch.load(path)\"}\n```",
            )],
            vec![],
        );
        let findings = analyzer
            .analyze(&"app.load".into(), BODY, &[], &"torch.load".into(), None)
            .await;
        assert_eq!(findings[&FindingKind::TaintPropagation], "p flows into torch.load");
        assert_eq!(findings[&FindingKind::KeyCodes], "model = torch.load(path)");
        assert!(!findings.contains_key(&FindingKind::Summary));
        assert_eq!(instruct.call_count(), 1);
        assert_eq!(think.call_count(), 0);
    }

    #[tokio::test]
    async fn long_key_codes_are_simplified_by_think() {
        let long = (0..20).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\\n");
        let (analyzer, _, think) = analyzer(
            vec![MockResponse::text(&format!(
                "{{\"summary\": \"helper\", \"key_codes_in_function\": \"{long}\"}}"
            ))],
            vec![MockResponse::text("{\"key_codes_in_function\": \"line3\\nline7\"}")],
        );
        let findings = analyzer
            .analyze(&"app.helper".into(), BODY, &[], &"torch.load".into(), None)
            .await;
        assert_eq!(findings[&FindingKind::Summary], "helper");
        assert_eq!(findings[&FindingKind::KeyCodes], "line3\nline7");

        let seen = think.contexts();
        assert_eq!(seen[0].messages.len(), 3);
        assert_eq!(seen[0].messages[2].text(), FIX_KEY_CODES);
    }

    #[tokio::test]
    async fn unparsable_twice_degrades_to_raw_summary() {
        let (analyzer, _, think) = analyzer(
            vec![MockResponse::text("it just loads a file")],
            vec![MockResponse::text("still prose")],
        );
        let findings = analyzer
            .analyze(&"app.f".into(), BODY, &[], &"torch.load".into(), None)
            .await;
        assert_eq!(findings, Findings::from([(FindingKind::Summary, "it just loads a file".to_string())]));
        assert_eq!(think.contexts()[0].messages[2].text(), FIX_UNPARSABLE);
    }

    #[tokio::test]
    async fn transport_failure_degrades() {
        let (analyzer, _, _) = analyzer(
            vec![MockResponse::Error(GatewayError::NetworkError("connection reset".into()))],
            vec![],
        );
        let findings = analyzer
            .analyze(&"app.f".into(), BODY, &[], &"torch.load".into(), None)
            .await;
        assert!(findings[&FindingKind::Summary].starts_with("analysis unavailable:"));
    }

    #[tokio::test]
    async fn attachment_is_sent_with_prompt() {
        let (analyzer, instruct, _) = analyzer(vec![MockResponse::text("{\"summary\": \"s\"}")], vec![]);
        let image = Attachment::Image { mime_type: "image/png".into(), data: "AA".into() };
        analyzer
            .analyze(&"app.f".into(), BODY, &[], &"torch.load".into(), Some(&image))
            .await;
        assert_eq!(instruct.contexts()[0].image_count(), 1);
    }
}
