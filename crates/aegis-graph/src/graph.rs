use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::MutationError;
use crate::function::FunctionId;

fn default_label() -> String {
    "calls".to_string()
}

/// A directed call relationship with a free-text label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: FunctionId,
    pub callee: FunctionId,
    #[serde(default = "default_label")]
    pub label: String,
}

impl CallEdge {
    pub fn new(caller: impl Into<FunctionId>, callee: impl Into<FunctionId>, label: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            callee: callee.into(),
            label: label.into(),
        }
    }

    pub fn calls(caller: impl Into<FunctionId>, callee: impl Into<FunctionId>) -> Self {
        Self::new(caller, callee, default_label())
    }

    fn connects(&self, caller: &FunctionId, callee: &FunctionId) -> bool {
        &self.caller == caller && &self.callee == callee
    }
}

/// Ordered edge list of one audit session. The node set is derived: a
/// function is a node iff some edge mentions it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallGraph {
    edges: Vec<CallEdge>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an imported edge list. Repeated (caller, callee) pairs keep
    /// their first occurrence.
    pub fn from_edges(edges: impl IntoIterator<Item = CallEdge>) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            if !graph.has_edge(&edge.caller, &edge.callee) {
                graph.edges.push(edge);
            }
        }
        graph
    }

    pub fn edges(&self) -> &[CallEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn all_identifiers(&self) -> BTreeSet<FunctionId> {
        self.edges
            .iter()
            .flat_map(|e| [e.caller.clone(), e.callee.clone()])
            .collect()
    }

    pub fn contains(&self, id: &FunctionId) -> bool {
        self.edges.iter().any(|e| &e.caller == id || &e.callee == id)
    }

    /// Nodes in first-appearance order.
    pub fn nodes_in_order(&self) -> Vec<FunctionId> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for edge in &self.edges {
            for id in [&edge.caller, &edge.callee] {
                if seen.insert(id.clone()) {
                    out.push(id.clone());
                }
            }
        }
        out
    }

    pub fn callees_of(&self, id: &FunctionId) -> Vec<FunctionId> {
        self.edges
            .iter()
            .filter(|e| &e.caller == id)
            .map(|e| e.callee.clone())
            .collect()
    }

    pub fn callers_of(&self, id: &FunctionId) -> Vec<FunctionId> {
        self.edges
            .iter()
            .filter(|e| &e.callee == id)
            .map(|e| e.caller.clone())
            .collect()
    }

    pub fn has_edge(&self, caller: &FunctionId, callee: &FunctionId) -> bool {
        self.edges.iter().any(|e| e.connects(caller, callee))
    }

    pub fn add_edge(&mut self, edge: CallEdge) -> Result<(), MutationError> {
        if self.has_edge(&edge.caller, &edge.callee) {
            return Err(MutationError::DuplicateEdge {
                caller: edge.caller,
                callee: edge.callee,
            });
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Remove every edge whose (caller, callee) is listed. Absent pairs are ignored.
    pub fn remove_edges(&mut self, pairs: &[(FunctionId, FunctionId)]) -> usize {
        let before = self.edges.len();
        self.edges
            .retain(|e| !pairs.iter().any(|(caller, callee)| e.connects(caller, callee)));
        before - self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> FunctionId {
        FunctionId::from(s)
    }

    fn chain() -> CallGraph {
        CallGraph::from_edges([
            CallEdge::calls("main", "a"),
            CallEdge::calls("a", "b"),
            CallEdge::calls("a", "c"),
        ])
    }

    #[test]
    fn node_set_is_derived_from_edges() {
        let g = chain();
        let ids: Vec<_> = g.all_identifiers().into_iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "main"]);
        assert_eq!(g.nodes_in_order(), vec![id("main"), id("a"), id("b"), id("c")]);
    }

    #[test]
    fn neighbours_preserve_edge_order() {
        let g = chain();
        assert_eq!(g.callees_of(&id("a")), vec![id("b"), id("c")]);
        assert_eq!(g.callers_of(&id("a")), vec![id("main")]);
        assert!(g.callers_of(&id("main")).is_empty());
    }

    #[test]
    fn add_edge_rejects_duplicate_pair() {
        let mut g = chain();
        let err = g.add_edge(CallEdge::new("a", "b", "other label")).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_EDGE");
        assert_eq!(g.len(), 3);
        g.add_edge(CallEdge::calls("b", "a")).unwrap();
        assert_eq!(g.len(), 4);
    }

    #[test]
    fn removing_last_edge_drops_node() {
        let mut g = chain();
        let removed = g.remove_edges(&[(id("a"), id("c")), (id("x"), id("y"))]);
        assert_eq!(removed, 1);
        assert!(!g.contains(&id("c")));
        assert!(g.contains(&id("b")));
    }

    #[test]
    fn from_edges_drops_repeated_pairs() {
        let g = CallGraph::from_edges([CallEdge::calls("a", "b"), CallEdge::new("a", "b", "again")]);
        assert_eq!(g.len(), 1);
        assert_eq!(g.edges()[0].label, "calls");
    }

    #[test]
    fn edge_label_defaults_when_missing() {
        let edge: CallEdge = serde_json::from_str(r#"{"caller":"a","callee":"b"}"#).unwrap();
        assert_eq!(edge.label, "calls");
    }
}
