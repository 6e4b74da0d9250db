use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use aegis_core::tools::ToolOutcome;
use aegis_graph::{AmendPlan, CompressPlan, ExtendPlan, FunctionId, MutationError, SourceResolver};

use crate::actions::AuditAction;
use crate::extraction::NodeAnalyzer;
use crate::render::{RenderError, Renderer};
use crate::session::AuditSession;
use crate::truncate::{truncate_output, DEFAULT_MAX_INSPECT};

/// Applies reasoner actions to a session. Mutations are validated in full
/// before anything is committed; failures come back as error outcomes and
/// leave the session untouched.
pub struct GraphMutationService {
    resolver: Arc<dyn SourceResolver>,
    analyzer: Arc<NodeAnalyzer>,
    renderer: Arc<dyn Renderer>,
    max_inspect_bytes: usize,
}

impl GraphMutationService {
    pub fn new(
        resolver: Arc<dyn SourceResolver>,
        analyzer: Arc<NodeAnalyzer>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            resolver,
            analyzer,
            renderer,
            max_inspect_bytes: DEFAULT_MAX_INSPECT,
        }
    }

    pub fn with_max_inspect_bytes(mut self, bytes: usize) -> Self {
        self.max_inspect_bytes = bytes;
        self
    }

    pub fn analyzer(&self) -> &NodeAnalyzer {
        &self.analyzer
    }

    pub fn resolver(&self) -> &dyn SourceResolver {
        self.resolver.as_ref()
    }

    #[instrument(skip_all, fields(path_key = %session.key, action = action.name()))]
    pub async fn dispatch(&self, session: &mut AuditSession, action: AuditAction) -> ToolOutcome {
        match action {
            AuditAction::AddNewFunction { function, callers } => {
                self.extend(session, &function, &callers).await
            }
            AuditAction::CompressCallChain {
                start_function,
                intermediate_functions,
                end_function,
                new_edge_label,
            } => {
                self.compress(
                    session,
                    &start_function,
                    &intermediate_functions,
                    &end_function,
                    &new_edge_label,
                )
                .await
            }
            AuditAction::UpdateFunctionNode { function, updates } => {
                self.amend(session, &function, &updates).await
            }
            AuditAction::InspectFunction { function } => self.inspect(&function),
            AuditAction::ListCallees { function } => self.list_callees(&function),
        }
    }

    pub async fn extend(
        &self,
        session: &mut AuditSession,
        suffix: &str,
        callers: &[FunctionId],
    ) -> ToolOutcome {
        let plan = match ExtendPlan::prepare(&session.graph, self.resolver.as_ref(), suffix, callers) {
            Ok(plan) => plan,
            Err(err) => return rejected(err),
        };
        let findings = self
            .analyzer
            .analyze(&plan.resolved, &plan.body, &[], &session.sink, session.last_artifact.as_ref())
            .await;
        if let Err(err) = plan.apply(&mut session.graph) {
            return rejected(err);
        }
        session.annotations.merge(&plan.resolved, findings);
        info!(function = %plan.resolved, edges = plan.new_edges.len(), "function added");

        let mut text = format!(
            "Successfully added function {} (matched from '{suffix}') to the call graph with callers: {}",
            plan.resolved,
            join(callers, ", ")
        );
        if plan.is_ambiguous() {
            warn!(suffix, candidates = plan.candidates.len(), "ambiguous function suffix");
            text.push_str(&format!(
                "\nWarning: '{suffix}' matched several functions ({}); picked {} as the lexicographically smallest.",
                join(&plan.candidates, ", "),
                plan.resolved
            ));
        }
        self.committed(session, text).await
    }

    pub async fn compress(
        &self,
        session: &mut AuditSession,
        start: &FunctionId,
        intermediates: &[FunctionId],
        end: &FunctionId,
        label: &str,
    ) -> ToolOutcome {
        let plan = match CompressPlan::prepare(&session.graph, start, intermediates, end, label) {
            Ok(plan) => plan,
            Err(err) => return rejected(err),
        };
        if let Err(err) = plan.apply(&mut session.graph) {
            return rejected(err);
        }
        info!(start = %start, end = %end, removed = plan.removed.len(), "call chain compressed");
        let text = format!(
            "Successfully compressed call chain: {start} -> [{}] -> {end} has been compressed to {start} -> {end}, new edge label: '{}'",
            join(intermediates, " -> "),
            plan.replacement.label
        );
        self.committed(session, text).await
    }

    pub async fn amend(
        &self,
        session: &mut AuditSession,
        function: &FunctionId,
        updates: &BTreeMap<String, String>,
    ) -> ToolOutcome {
        let plan = match AmendPlan::prepare(&session.graph, function, updates) {
            Ok(plan) => plan,
            Err(err) => return rejected(err),
        };
        plan.apply(&mut session.annotations);
        let keys = plan
            .updates
            .keys()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        info!(function = %function, keys = %keys, "function node updated");
        self.committed(session, format!("Successfully updated function {function}: {keys}"))
            .await
    }

    pub fn inspect(&self, function: &FunctionId) -> ToolOutcome {
        match self.resolver.function_body(function) {
            Ok(body) => ToolOutcome::ok(truncate_output(&body, self.max_inspect_bytes)),
            Err(err) => ToolOutcome::error(err.to_string()),
        }
    }

    pub fn list_callees(&self, function: &FunctionId) -> ToolOutcome {
        match self.resolver.callees_of(function) {
            Ok(callees) if callees.is_empty() => {
                ToolOutcome::ok(format!("{function} calls no known functions"))
            }
            Ok(callees) => ToolOutcome::ok(join(&callees, "\n")),
            Err(err) => ToolOutcome::error(err.to_string()),
        }
    }

    /// Render the session graph and remember the artifact for the next
    /// reasoning request.
    pub async fn rerender(
        &self,
        session: &mut AuditSession,
        remark: Option<&str>,
    ) -> Result<(), RenderError> {
        let artifact = self
            .renderer
            .render(&session.output_path, session.view(), remark)
            .await?;
        session.last_artifact = Some(artifact.attachment);
        Ok(())
    }

    async fn committed(&self, session: &mut AuditSession, text: String) -> ToolOutcome {
        match self.rerender(session, None).await {
            Ok(()) => ToolOutcome::ok(text),
            Err(err) => {
                warn!(path_key = %session.key, error = %err, "render after mutation failed");
                ToolOutcome::ok(format!("{text}\nWarning: the graph could not be re-rendered: {err}"))
            }
        }
    }
}

fn rejected(err: MutationError) -> ToolOutcome {
    warn!(code = err.code(), error = %err, "mutation rejected");
    ToolOutcome::error(err.report())
}

fn join(ids: &[FunctionId], sep: &str) -> String {
    ids.iter().map(FunctionId::as_str).collect::<Vec<_>>().join(sep)
}
