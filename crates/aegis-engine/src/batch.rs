use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use aegis_graph::PathRecord;
use aegis_store::RecordRepo;

use crate::audit::{AuditLoop, AuditOutcome};
use crate::error::EngineError;
use crate::session::AuditSession;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub concluded: usize,
    pub vulnerable: usize,
    /// Sessions that ended without a verdict; their records stay pending.
    pub failed: usize,
    /// Records not started because the batch was cancelled.
    pub skipped: usize,
}

/// Audits stored records, several sessions at a time. Each session owns
/// its own graph; only the audit loop's collaborators are shared.
pub struct BatchAuditor {
    audit: Arc<AuditLoop>,
    records: Arc<RecordRepo>,
    output_dir: PathBuf,
    max_concurrent: usize,
}

impl BatchAuditor {
    pub fn new(audit: Arc<AuditLoop>, records: Arc<RecordRepo>, output_dir: PathBuf) -> Self {
        Self {
            audit,
            records,
            output_dir,
            max_concurrent: 1,
        }
    }

    pub fn with_max_concurrent(mut self, sessions: usize) -> Self {
        self.max_concurrent = sessions.max(1);
        self
    }

    /// Audit every pending record, smallest graphs first. Cancellation stops
    /// new sessions from starting; running ones finish.
    #[instrument(skip_all, fields(max_concurrent = self.max_concurrent))]
    pub async fn run_pending(&self, cancel: CancellationToken) -> Result<BatchSummary, EngineError> {
        let pending = self.records.pending()?;
        let total = pending.len();
        info!(total, "auditing pending records");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut summary = BatchSummary::default();

        for (started, (key, record)) in pending.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    summary.skipped = total - started;
                    warn!(skipped = summary.skipped, "batch cancelled");
                    break;
                }
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|e| EngineError::Internal(format!("semaphore closed: {e}")))?
                }
            };
            let audit = Arc::clone(&self.audit);
            let records = Arc::clone(&self.records);
            let output_dir = self.output_dir.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = audit_record(&audit, &records, &output_dir, &key, record).await;
                (key, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(outcome))) => {
                    info!(path_key = %key, is_vulnerable = outcome.verdict.is_vulnerable, steps = outcome.steps, "record concluded");
                    summary.concluded += 1;
                    if outcome.verdict.is_vulnerable {
                        summary.vulnerable += 1;
                    }
                }
                Ok((key, Err(err))) => {
                    error!(path_key = %key, error = %err, "audit session failed, record left pending");
                    summary.failed += 1;
                }
                Err(err) => {
                    error!(error = %err, "audit task panicked");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Audit one record by key, concluded or not.
    pub async fn run_one(&self, key: &str) -> Result<AuditOutcome, EngineError> {
        let record = self
            .records
            .get(key)?
            .ok_or_else(|| EngineError::Internal(format!("no record stored under {key}")))?;
        audit_record(&self.audit, &self.records, &self.output_dir, key, record).await
    }
}

/// Run one session and persist its verdict as soon as it is known.
async fn audit_record(
    audit: &AuditLoop,
    records: &RecordRepo,
    output_dir: &std::path::Path,
    key: &str,
    mut record: PathRecord,
) -> Result<AuditOutcome, EngineError> {
    let mut session = AuditSession::from_record(&record, output_dir);
    let outcome = audit.run(&mut session).await?;
    session.apply_to(&mut record);
    records.save(key, &record)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use aegis_core::provider::StreamOptions;
    use aegis_graph::{CallEdge, CallGraph, InMemoryResolver};
    use aegis_llm::{MockProvider, MockResponse};
    use aegis_store::Database;

    use crate::audit::AuditConfig;
    use crate::extraction::NodeAnalyzer;
    use crate::render::DotRenderer;
    use crate::service::GraphMutationService;
    use crate::verify::VerificationGate;

    const JUDGMENT: &str = r#"{"external_input_taint_analysis": "argv is unpickled", "is_vulnerable": true}"#;
    const ACCEPT: &str = r#"{"is_accurate_and_complete": true, "feedback": "ok", "is_vulnerable": true}"#;

    fn auditor(
        instruct: Vec<MockResponse>,
        verifier: Vec<MockResponse>,
        dir: &std::path::Path,
    ) -> (BatchAuditor, Arc<RecordRepo>, Arc<MockProvider>) {
        let instruct = Arc::new(MockProvider::named("instruct", instruct));
        let service = GraphMutationService::new(
            Arc::new(InMemoryResolver::new().with_call("app.cli", "app.helper")),
            Arc::new(NodeAnalyzer::new(
                Arc::new(MockProvider::new(vec![])),
                Arc::new(MockProvider::new(vec![])),
                StreamOptions::default(),
            )),
            Arc::new(DotRenderer::default()),
        );
        let audit = AuditLoop::new(
            instruct.clone(),
            Arc::new(MockProvider::named("think", vec![])),
            VerificationGate::new(Arc::new(MockProvider::named("verifier", verifier)), StreamOptions::default()),
            service,
            AuditConfig {
                max_steps: 1,
                annotate_on_start: false,
                stream_options: StreamOptions::default(),
            },
        );
        let records = Arc::new(RecordRepo::new(Database::in_memory().unwrap()));
        let small = PathRecord::new(
            "app.main",
            "pickle.loads",
            &CallGraph::from_edges([CallEdge::calls("app.main", "pickle.loads")]),
        );
        let large = PathRecord::new(
            "app.cli",
            "torch.load",
            &CallGraph::from_edges([
                CallEdge::calls("app.cli", "app.helper"),
                CallEdge::calls("app.helper", "torch.load"),
            ]),
        );
        records.save(&small.key(), &small).unwrap();
        records.save(&large.key(), &large).unwrap();
        let batch = BatchAuditor::new(Arc::new(audit), records.clone(), dir.to_path_buf());
        (batch, records, instruct)
    }

    #[tokio::test]
    async fn concludes_what_it_can_and_leaves_failures_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (batch, records, _) = auditor(
            vec![
                MockResponse::text(JUDGMENT),
                MockResponse::tool_call("list_callees", json!({"function": "app.cli"})),
            ],
            vec![MockResponse::text(ACCEPT)],
            dir.path(),
        );

        let summary = batch.run_pending(CancellationToken::new()).await.unwrap();
        assert_eq!(
            summary,
            BatchSummary { concluded: 1, vulnerable: 1, failed: 1, skipped: 0 }
        );

        let done = records.get("app.main---pickle.loads").unwrap().unwrap();
        assert!(done.conclusion.unwrap().is_vulnerable);
        assert_eq!(done.double_check.as_deref(), Some("ok"));
        assert_eq!(done.audit_result.as_deref(), Some(JUDGMENT));

        let pending: Vec<String> = records.pending().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(pending, ["app.cli---torch.load"]);
    }

    #[tokio::test]
    async fn cancelled_batch_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (batch, _, instruct) = auditor(vec![], vec![], dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = batch.run_pending(cancel).await.unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(instruct.call_count(), 0);
    }

    #[tokio::test]
    async fn run_one_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let (batch, _, _) = auditor(vec![], vec![], dir.path());
        let err = batch.run_one("nope---nothing").await.unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
    }
}
