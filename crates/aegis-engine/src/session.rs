use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use aegis_core::context::Attachment;
use aegis_core::messages::Message;
use aegis_graph::{AnnotationStore, CallGraph, Conclusion, FunctionId, PathRecord};

use crate::render::{output_file_name, GraphView};

/// Accepted outcome of an audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_vulnerable: bool,
    /// The reasoner's final judgment text.
    pub confidence_narrative: String,
    pub double_check_feedback: String,
}

/// State of one attack-path audit. Owns its graph and annotations
/// exclusively; nothing here is shared between sessions.
#[derive(Clone, Debug)]
pub struct AuditSession {
    pub key: String,
    pub entry: FunctionId,
    pub sink: FunctionId,
    pub graph: CallGraph,
    pub annotations: AnnotationStore,
    pub history: Vec<Message>,
    /// Set by a repeated or failed action; the next reasoning step escalates.
    pub repeat_call: bool,
    pub verdict: Option<Verdict>,
    /// Base path for rendered artifacts, without extension.
    pub output_path: PathBuf,
    pub last_artifact: Option<Attachment>,
}

impl AuditSession {
    pub fn from_record(record: &PathRecord, output_dir: &Path) -> Self {
        let key = record.key();
        let graph = record.graph();
        for (role, id) in [("entry", &record.entry), ("sink", &record.sink)] {
            if !graph.contains(id) {
                warn!(path_key = %key, role, function = %id, "path endpoint is not a graph node");
            }
        }
        Self {
            output_path: output_dir.join(output_file_name(graph.len(), &key)),
            key,
            entry: record.entry.clone(),
            sink: record.sink.clone(),
            graph,
            annotations: record.function_analysis_records.clone(),
            history: Vec::new(),
            repeat_call: false,
            verdict: None,
            last_artifact: None,
        }
    }

    pub fn view(&self) -> GraphView<'_> {
        GraphView {
            entry: &self.entry,
            sink: &self.sink,
            graph: &self.graph,
            annotations: &self.annotations,
        }
    }

    /// Write the session's graph, annotations and verdict back into `record`.
    pub fn apply_to(&self, record: &mut PathRecord) {
        record.call_graph = self.graph.edges().to_vec();
        record.function_analysis_records = self.annotations.clone();
        if let Some(verdict) = &self.verdict {
            record.double_check = Some(verdict.double_check_feedback.clone());
            record.conclusion = Some(Conclusion { is_vulnerable: verdict.is_vulnerable });
            record.audit_result = Some(verdict.confidence_narrative.clone());
        }
    }

    pub fn is_done(&self) -> bool {
        self.verdict.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_graph::{CallEdge, FindingKind};

    fn record() -> PathRecord {
        let graph = CallGraph::from_edges([
            CallEdge::calls("app.<module>", "app.f1"),
            CallEdge::calls("app.f1", "pickle.loads"),
        ]);
        PathRecord::new("app.<module>", "pickle.loads", &graph)
    }

    #[test]
    fn builds_output_path_from_record() {
        let session = AuditSession::from_record(&record(), Path::new("out"));
        assert_eq!(session.key, "app.<module>---pickle.loads");
        assert_eq!(session.output_path, Path::new("out").join("2__app._module_---pickle.loads"));
        assert!(!session.repeat_call);
        assert!(!session.is_done());
    }

    #[test]
    fn apply_writes_graph_and_verdict() {
        let mut rec = record();
        let mut session = AuditSession::from_record(&rec, Path::new("out"));
        session.annotations.set(&"app.f1".into(), FindingKind::Summary, "reads body");
        session.graph.add_edge(CallEdge::calls("app.f1", "app.f2")).unwrap();

        session.apply_to(&mut rec);
        assert_eq!(rec.call_graph.len(), 3);
        assert!(rec.conclusion.is_none());

        session.verdict = Some(Verdict {
            is_vulnerable: true,
            confidence_narrative: "body reaches loads".into(),
            double_check_feedback: "confirmed".into(),
        });
        session.apply_to(&mut rec);
        assert_eq!(rec.conclusion, Some(Conclusion { is_vulnerable: true }));
        assert_eq!(rec.double_check.as_deref(), Some("confirmed"));
        assert_eq!(rec.audit_result.as_deref(), Some("body reaches loads"));
        assert_eq!(
            rec.function_analysis_records.finding(&"app.f1".into(), FindingKind::Summary),
            Some("reads body")
        );
    }
}
