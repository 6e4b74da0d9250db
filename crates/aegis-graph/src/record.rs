use serde::{Deserialize, Serialize};

use crate::annotations::AnnotationStore;
use crate::function::FunctionId;
use crate::graph::{CallEdge, CallGraph};

/// Final verdict attached to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conclusion {
    pub is_vulnerable: bool,
}

/// One candidate attack path as persisted between runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    #[serde(rename = "entry_name", alias = "entry")]
    pub entry: FunctionId,
    #[serde(rename = "sink_name", alias = "sink")]
    pub sink: FunctionId,
    pub call_graph: Vec<CallEdge>,
    #[serde(default)]
    pub function_analysis_records: AnnotationStore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_check: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_result: Option<String>,
}

impl PathRecord {
    pub fn new(entry: impl Into<FunctionId>, sink: impl Into<FunctionId>, graph: &CallGraph) -> Self {
        Self {
            entry: entry.into(),
            sink: sink.into(),
            call_graph: graph.edges().to_vec(),
            function_analysis_records: AnnotationStore::new(),
            double_check: None,
            conclusion: None,
            audit_result: None,
        }
    }

    /// `"<entry>---<sink>"`.
    pub fn key(&self) -> String {
        path_key(&self.entry, &self.sink)
    }

    pub fn graph(&self) -> CallGraph {
        CallGraph::from_edges(self.call_graph.iter().cloned())
    }

    pub fn is_concluded(&self) -> bool {
        self.conclusion.is_some()
    }
}

pub fn path_key(entry: &FunctionId, sink: &FunctionId) -> String {
    format!("{entry}---{sink}")
}
