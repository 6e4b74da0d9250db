//! Validated graph mutations.
//!
//! Each operation is split into `prepare`, which checks every precondition
//! against the current graph without touching it, and `apply`, which commits
//! the prepared change. A failed `prepare` leaves the session state exactly
//! as it was.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::annotations::{AnnotationStore, FindingKind, Findings};
use crate::error::MutationError;
use crate::function::FunctionId;
use crate::graph::{CallEdge, CallGraph};
use crate::resolver::{ResolveError, SourceResolver};

/// A resolved new callee ready to be attached under its callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendPlan {
    pub resolved: FunctionId,
    /// Every distinct match; more than one means the pick was a tie-break.
    pub candidates: Vec<FunctionId>,
    pub body: String,
    pub new_edges: Vec<CallEdge>,
}

impl ExtendPlan {
    /// Resolve `suffix` among the real callees of `callers`.
    ///
    /// Among several distinct matches the lexicographically smallest name wins.
    pub fn prepare(
        graph: &CallGraph,
        resolver: &dyn SourceResolver,
        suffix: &str,
        callers: &[FunctionId],
    ) -> Result<Self, MutationError> {
        let missing: Vec<FunctionId> = callers
            .iter()
            .filter(|c| !graph.contains(c))
            .cloned()
            .collect();
        if callers.is_empty() || !missing.is_empty() {
            return Err(MutationError::UnknownCaller { missing });
        }

        let mut matches = BTreeSet::new();
        for caller in callers {
            match resolver.callees_of(caller) {
                Ok(callees) => matches.extend(callees.into_iter().filter(|c| c.has_suffix(suffix))),
                Err(err) => warn!(caller = %caller, error = %err, "callee lookup failed"),
            }
        }
        let candidates: Vec<FunctionId> = matches.into_iter().collect();
        let Some(resolved) = candidates.first().cloned() else {
            return Err(MutationError::UnresolvedFunction {
                suffix: suffix.to_string(),
                callers: callers.to_vec(),
            });
        };

        if graph.contains(&resolved) {
            return Err(MutationError::AlreadyPresent { function: resolved });
        }

        let body = match resolver.function_body(&resolved) {
            Ok(body) => body,
            Err(ResolveError::NotFound(_)) => {
                return Err(MutationError::NoSuchFunction { function: resolved })
            }
            Err(err @ ResolveError::Backend(_)) => {
                warn!(function = %resolved, error = %err, "body lookup failed");
                return Err(MutationError::NoSuchFunction { function: resolved });
            }
        };

        let mut new_edges: Vec<CallEdge> = Vec::with_capacity(callers.len());
        for caller in callers {
            let seen = new_edges.iter().any(|e| &e.caller == caller);
            if !seen && !graph.has_edge(caller, &resolved) {
                new_edges.push(CallEdge::calls(caller.clone(), resolved.clone()));
            }
        }

        Ok(Self {
            resolved,
            candidates,
            body,
            new_edges,
        })
    }

    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }

    pub fn apply(&self, graph: &mut CallGraph) -> Result<(), MutationError> {
        add_all(graph, &self.new_edges)
    }
}

/// A linear sub-chain to collapse into one labeled edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressPlan {
    pub removed: Vec<(FunctionId, FunctionId)>,
    pub replacement: CallEdge,
}

impl CompressPlan {
    pub fn prepare(
        graph: &CallGraph,
        start: &FunctionId,
        intermediates: &[FunctionId],
        end: &FunctionId,
        label: &str,
    ) -> Result<Self, MutationError> {
        if intermediates.is_empty() {
            return Err(MutationError::EmptyIntermediates);
        }

        let mut chain = Vec::with_capacity(intermediates.len() + 2);
        chain.push(start.clone());
        chain.extend(intermediates.iter().cloned());
        chain.push(end.clone());

        let mut missing: Vec<FunctionId> = Vec::new();
        for id in &chain {
            if !graph.contains(id) && !missing.contains(id) {
                missing.push(id.clone());
            }
        }
        if !missing.is_empty() {
            return Err(MutationError::UnknownFunction { missing });
        }

        for pair in chain.windows(2) {
            if !graph.has_edge(&pair[0], &pair[1]) {
                return Err(MutationError::BrokenChain {
                    caller: pair[0].clone(),
                    callee: pair[1].clone(),
                });
            }
        }

        for i in 1..chain.len() - 1 {
            let function = &chain[i];
            let callers = graph.callers_of(function);
            let callees = graph.callees_of(function);
            let linear = callers.len() == 1
                && callers[0] == chain[i - 1]
                && callees.len() == 1
                && callees[0] == chain[i + 1];
            if !linear {
                return Err(MutationError::NotLinear {
                    function: function.clone(),
                    callers,
                    callees,
                });
            }
        }

        if graph.has_edge(start, end) {
            return Err(MutationError::DuplicateEdge {
                caller: start.clone(),
                callee: end.clone(),
            });
        }

        let removed = chain
            .windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        let replacement = CallEdge::new(
            start.clone(),
            end.clone(),
            substitute_label(label, start, intermediates, end),
        );
        Ok(Self {
            removed,
            replacement,
        })
    }

    pub fn apply(&self, graph: &mut CallGraph) -> Result<(), MutationError> {
        let mut next = graph.clone();
        next.remove_edges(&self.removed);
        next.add_edge(self.replacement.clone())?;
        *graph = next;
        Ok(())
    }
}

fn substitute_label(
    label: &str,
    start: &FunctionId,
    intermediates: &[FunctionId],
    end: &FunctionId,
) -> String {
    let joined = intermediates
        .iter()
        .map(FunctionId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ");
    label
        .replace("{intermediate_functions}", &joined)
        .replace("{start_function}", start.as_str())
        .replace("{end_function}", end.as_str())
}

/// Checked findings for one function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmendPlan {
    pub function: FunctionId,
    pub updates: Findings,
}

impl AmendPlan {
    pub fn prepare(
        graph: &CallGraph,
        function: &FunctionId,
        updates: &BTreeMap<String, String>,
    ) -> Result<Self, MutationError> {
        if !graph.contains(function) {
            return Err(MutationError::UnknownFunction {
                missing: vec![function.clone()],
            });
        }

        let allowed = FindingKind::AMENDABLE
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if updates.is_empty() {
            return Err(MutationError::InvalidUpdate {
                reason: format!("updates must contain at least one of: {allowed}"),
                invalid_keys: Vec::new(),
            });
        }

        let mut parsed = Findings::new();
        let mut invalid_keys = Vec::new();
        for (key, text) in updates {
            match key.parse::<FindingKind>() {
                Ok(kind) if kind.is_amendable() => {
                    parsed.insert(kind, text.clone());
                }
                _ => invalid_keys.push(key.clone()),
            }
        }
        if !invalid_keys.is_empty() {
            return Err(MutationError::InvalidUpdate {
                reason: format!(
                    "unsupported keys [{}]; allowed: {allowed}",
                    invalid_keys.join(", ")
                ),
                invalid_keys,
            });
        }

        Ok(Self {
            function: function.clone(),
            updates: parsed,
        })
    }

    pub fn apply(&self, annotations: &mut AnnotationStore) {
        annotations.merge(&self.function, self.updates.clone());
    }
}

fn add_all(graph: &mut CallGraph, edges: &[CallEdge]) -> Result<(), MutationError> {
    if let Some(dup) = edges.iter().find(|e| graph.has_edge(&e.caller, &e.callee)) {
        return Err(MutationError::DuplicateEdge {
            caller: dup.caller.clone(),
            callee: dup.callee.clone(),
        });
    }
    for edge in edges {
        graph.add_edge(edge.clone())?;
    }
    Ok(())
}
