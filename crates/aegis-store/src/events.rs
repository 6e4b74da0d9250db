use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// What happened at one step of an audit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Reasoning,
    Action,
    Rejection,
    Verdict,
    Failure,
}

impl AuditEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Action => "action",
            Self::Rejection => "rejection",
            Self::Verdict => "verdict",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reasoning" => Ok(Self::Reasoning),
            "action" => Ok(Self::Action),
            "rejection" => Ok(Self::Rejection),
            "verdict" => Ok(Self::Verdict),
            "failure" => Ok(Self::Failure),
            other => Err(format!("unknown audit event kind: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditEventRow {
    pub path_key: String,
    /// 1-based position within the path's log.
    pub sequence: i64,
    pub kind: AuditEventKind,
    pub payload: Value,
    pub timestamp: String,
}

/// Append-only trail of audit steps, one sequence per path key.
pub struct AuditEventRepo {
    db: Database,
}

impl AuditEventRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, payload), fields(path_key = %path_key, kind = %kind))]
    pub fn append(
        &self,
        path_key: &str,
        kind: AuditEventKind,
        payload: Value,
    ) -> Result<AuditEventRow, StoreError> {
        let raw = serde_json::to_string(&payload)?;
        let timestamp = Utc::now().to_rfc3339();
        let sequence = self.db.with_tx(|tx| {
            let sequence: i64 = tx.query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM audit_events WHERE path_key = ?1",
                [path_key],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO audit_events (path_key, sequence, kind, payload, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![path_key, sequence, kind.as_str(), raw, timestamp],
            )?;
            Ok(sequence)
        })?;
        Ok(AuditEventRow {
            path_key: path_key.to_string(),
            sequence,
            kind,
            payload,
            timestamp,
        })
    }

    pub fn list(&self, path_key: &str) -> Result<Vec<AuditEventRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT path_key, sequence, kind, payload, timestamp FROM audit_events
                 WHERE path_key = ?1 ORDER BY sequence ASC",
            )?;
            let mut rows = stmt.query([path_key])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let kind: String = row_helpers::get(row, 2, "audit_events", "kind")?;
                let payload: String = row_helpers::get(row, 3, "audit_events", "payload")?;
                out.push(AuditEventRow {
                    path_key: row_helpers::get(row, 0, "audit_events", "path_key")?,
                    sequence: row_helpers::get(row, 1, "audit_events", "sequence")?,
                    kind: row_helpers::parse_enum(&kind, "audit_events", "kind")?,
                    payload: row_helpers::parse_json(&payload, "audit_events", "payload")?,
                    timestamp: row_helpers::get(row, 4, "audit_events", "timestamp")?,
                });
            }
            Ok(out)
        })
    }

    pub fn count(&self, path_key: &str) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM audit_events WHERE path_key = ?1",
                [path_key],
                |row| row.get(0),
            )?)
        })
    }
}
