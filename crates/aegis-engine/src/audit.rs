//! The audit control loop.
//!
//! An explicit state machine: `Reason` asks the reasoner for actions or a
//! judgment, `Act` dispatches requested actions, `Verify` runs the
//! verification gate on a judgment and `Done` returns it. Each `Reason`
//! counts as one step against the budget.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use aegis_core::context::LlmContext;
use aegis_core::messages::{Message, ToolCallBlock, UserContent, UserMessage};
use aegis_core::provider::{complete, LlmProvider, StreamOptions};
use aegis_store::{AuditEventKind, AuditEventRepo};

use crate::actions::{catalogue, describe, AuditAction};
use crate::error::EngineError;
use crate::parse::judgment_remark;
use crate::prompts::{GRAPH_MESSAGE, REJECTION_PREFIX, REPEATED_CALL_PREFIX, SYSTEM_PROMPT};
use crate::service::GraphMutationService;
use crate::session::{AuditSession, Verdict};
use crate::verify::{GateDecision, VerificationGate};

pub const DEFAULT_MAX_STEPS: u32 = 100;

#[derive(Clone, Debug)]
pub struct AuditConfig {
    pub max_steps: u32,
    /// Run extraction over unannotated nodes before the first step.
    pub annotate_on_start: bool,
    pub stream_options: StreamOptions,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            annotate_on_start: true,
            stream_options: StreamOptions::default(),
        }
    }
}

/// Result of a session that reached `Done`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditOutcome {
    pub verdict: Verdict,
    pub final_text: String,
    pub steps: u32,
}

#[derive(Debug)]
enum LoopState {
    Reason,
    Act(Vec<ToolCallBlock>),
    Verify(String),
    Done(String),
}

pub struct AuditLoop {
    instruct: Arc<dyn LlmProvider>,
    think: Arc<dyn LlmProvider>,
    gate: VerificationGate,
    service: GraphMutationService,
    config: AuditConfig,
    events: Option<AuditEventRepo>,
}

impl AuditLoop {
    pub fn new(
        instruct: Arc<dyn LlmProvider>,
        think: Arc<dyn LlmProvider>,
        gate: VerificationGate,
        service: GraphMutationService,
        config: AuditConfig,
    ) -> Self {
        Self {
            instruct,
            think,
            gate,
            service,
            config,
            events: None,
        }
    }

    /// Append every reasoning response, action outcome, rejection and
    /// verdict to the audit transcript.
    pub fn with_events(mut self, events: AuditEventRepo) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Drive `session` to a verified verdict.
    #[instrument(skip_all, fields(path_key = %session.key))]
    pub async fn run(&self, session: &mut AuditSession) -> Result<AuditOutcome, EngineError> {
        if self.config.annotate_on_start {
            self.annotate_nodes(session).await;
        }
        if let Err(err) = self.service.rerender(session, None).await {
            warn!(error = %err, "initial render failed");
        }

        let mut steps = 0u32;
        let mut state = LoopState::Reason;
        loop {
            state = match state {
                LoopState::Reason => {
                    if steps >= self.config.max_steps {
                        warn!(steps, "step budget exhausted");
                        self.record(session, AuditEventKind::Failure, json!({"reason": "budget_exhausted", "steps": steps}));
                        return Err(EngineError::BudgetExhausted { steps });
                    }
                    steps += 1;
                    self.reason(session, steps).await?
                }
                LoopState::Act(calls) => self.act(session, calls).await,
                LoopState::Verify(text) => self.verify(session, text).await?,
                LoopState::Done(final_text) => {
                    let verdict = session
                        .verdict
                        .clone()
                        .ok_or_else(|| EngineError::Internal("finished without a verdict".into()))?;
                    return Ok(AuditOutcome { verdict, final_text, steps });
                }
            };
        }
    }

    /// Extract findings for every node except the sink that has none yet.
    async fn annotate_nodes(&self, session: &mut AuditSession) {
        for node in session.graph.nodes_in_order() {
            if node == session.sink || session.annotations.has_any(&node) {
                continue;
            }
            let body = match self.service.resolver().function_body(&node) {
                Ok(body) => body,
                Err(err) => {
                    debug!(function = %node, error = %err, "no body to annotate");
                    continue;
                }
            };
            let callees = session.graph.callees_of(&node);
            let findings = self
                .service
                .analyzer()
                .analyze(&node, &body, &callees, &session.sink, None)
                .await;
            session.annotations.merge(&node, findings);
        }
    }

    fn context(&self, session: &AuditSession) -> LlmContext {
        LlmContext {
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            messages: session.history.clone(),
            tools: catalogue(),
        }
    }

    async fn reason(&self, session: &mut AuditSession, step: u32) -> Result<LoopState, EngineError> {
        let provider = if session.repeat_call {
            session.repeat_call = false;
            info!(step, "escalating to think model");
            &self.think
        } else {
            &self.instruct
        };

        // The current graph rides along with every request but is not kept
        // in history, so old renders never pile up.
        let mut context = self.context(session);
        let mut content = vec![UserContent::Text { text: GRAPH_MESSAGE.to_string() }];
        if let Some(artifact) = &session.last_artifact {
            content.push(artifact.clone().into_content());
        }
        context.messages.push(Message::User(UserMessage { content }));

        let response = complete(provider.as_ref(), &context, &self.config.stream_options).await?;
        let text = response.text_content();
        let calls: Vec<ToolCallBlock> = response.tool_calls().into_iter().cloned().collect();
        debug!(step, model = provider.model(), tool_calls = calls.len(), "reasoning response");
        self.record(
            session,
            AuditEventKind::Reasoning,
            json!({
                "step": step,
                "model": provider.model(),
                "text": text,
                "tool_calls": calls.iter().map(|c| json!({"name": c.name, "arguments": c.arguments})).collect::<Vec<_>>(),
            }),
        );
        session.history.push(Message::Assistant(response));

        if calls.is_empty() {
            Ok(LoopState::Verify(text))
        } else {
            Ok(LoopState::Act(calls))
        }
    }

    async fn act(&self, session: &mut AuditSession, calls: Vec<ToolCallBlock>) -> LoopState {
        for call in calls {
            let desc = describe(&call);
            let prior = prior_result(&session.history, &desc).map(str::to_string);
            let (text, is_error) = match prior {
                Some(prior) => {
                    warn!(action = %call.name, "repeated call");
                    session.repeat_call = true;
                    (format!("{REPEATED_CALL_PREFIX}{prior}"), false)
                }
                None => match AuditAction::from_call(&call) {
                    Err(reason) => {
                        warn!(action = %call.name, reason = %reason, "undecodable action");
                        session.repeat_call = true;
                        (format!("{desc} failed: {reason}"), true)
                    }
                    Ok(action) => {
                        let outcome = self.service.dispatch(session, action).await;
                        if outcome.is_error {
                            session.repeat_call = true;
                            (format!("{desc} failed: {}", outcome.content), true)
                        } else {
                            (format!("{desc} succeeded: {}", outcome.content), false)
                        }
                    }
                },
            };
            self.record(
                session,
                AuditEventKind::Action,
                json!({"name": call.name, "arguments": call.arguments, "result": text, "is_error": is_error}),
            );
            session.history.push(Message::tool_result(call.id.clone(), text, is_error));
        }
        LoopState::Reason
    }

    async fn verify(&self, session: &mut AuditSession, text: String) -> Result<LoopState, EngineError> {
        let remark = judgment_remark(&text);
        if let Err(err) = self.service.rerender(session, Some(&remark)).await {
            warn!(error = %err, "render of candidate judgment failed");
        }

        let context = self.context(session);
        match self.gate.verify(&context, session.last_artifact.as_ref()).await? {
            GateDecision::Rejected { feedback } => {
                warn!(feedback = %feedback, "conclusion rejected");
                self.record(session, AuditEventKind::Rejection, json!({"feedback": feedback}));
                session
                    .history
                    .push(Message::user_text(format!("{REJECTION_PREFIX}{feedback}")));
                Ok(LoopState::Reason)
            }
            GateDecision::Accepted { is_vulnerable, feedback } => {
                info!(is_vulnerable, "verdict accepted");
                let final_remark = format!(
                    "{remark}\n---\n### Double-check conclusion:\n{feedback}\n---\nIS_VULNERABLE: {is_vulnerable}"
                );
                self.record(
                    session,
                    AuditEventKind::Verdict,
                    json!({"is_vulnerable": is_vulnerable, "feedback": feedback, "judgment": text}),
                );
                session.verdict = Some(Verdict {
                    is_vulnerable,
                    confidence_narrative: text.clone(),
                    double_check_feedback: feedback,
                });
                if let Err(err) = self.service.rerender(session, Some(&final_remark)).await {
                    warn!(error = %err, "render of final verdict failed");
                }
                Ok(LoopState::Done(text))
            }
        }
    }

    fn record(&self, session: &AuditSession, kind: AuditEventKind, payload: serde_json::Value) {
        if let Some(events) = &self.events {
            if let Err(err) = events.append(&session.key, kind, payload) {
                warn!(error = %err, kind = %kind, "failed to append audit event");
            }
        }
    }
}

/// Result text of an earlier identical call, if any.
fn prior_result<'a>(history: &'a [Message], desc: &str) -> Option<&'a str> {
    history.iter().find_map(|message| match message {
        Message::ToolResult(result) => {
            let rest = result.text.strip_prefix(desc)?;
            (rest.starts_with(" succeeded: ") || rest.starts_with(" failed: "))
                .then_some(result.text.as_str())
        }
        _ => None,
    })
}
