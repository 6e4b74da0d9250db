use std::collections::BTreeMap;
use std::path::Path;

use aegis_graph::{sinks, Conclusion, PathRecord};
use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{info, instrument};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Counts reported by an import.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Keys skipped because the stored record already has a conclusion.
    pub kept_concluded: usize,
    pub seeded_sinks: usize,
}

/// Latest-revision overview of one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordStatus {
    pub key: String,
    pub revision: i64,
    pub edge_count: i64,
    pub conclusion: Option<Conclusion>,
}

/// Append-only store of attack-path records. Every save adds a revision;
/// reads see the latest revision per key.
pub struct RecordRepo {
    db: Database,
}

const LATEST: &str = "SELECT r.path_key, r.revision, r.edge_count, r.record FROM path_records r
     WHERE r.revision = (SELECT MAX(revision) FROM path_records WHERE path_key = r.path_key)";

impl RecordRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a new revision of `key`. Returns the revision number.
    #[instrument(skip(self, record), fields(path_key = %key))]
    pub fn save(&self, key: &str, record: &PathRecord) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(record)?;
        self.db.with_conn(|conn| insert_revision(conn, key, record, &payload))
    }

    pub fn get(&self, key: &str) -> Result<Option<PathRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT record FROM path_records WHERE path_key = ?1
                 ORDER BY revision DESC LIMIT 1",
            )?;
            let mut rows = stmt.query([key])?;
            match rows.next()? {
                Some(row) => {
                    let raw: String = row_helpers::get(row, 0, "path_records", "record")?;
                    Ok(Some(row_helpers::parse_json(&raw, "path_records", "record")?))
                }
                None => Ok(None),
            }
        })
    }

    /// Latest revision of every record, ordered by key.
    pub fn latest(&self) -> Result<Vec<(String, PathRecord)>, StoreError> {
        self.query_records(&format!("{LATEST} ORDER BY r.path_key"))
    }

    /// Records still lacking a conclusion, smallest graphs first.
    pub fn pending(&self) -> Result<Vec<(String, PathRecord)>, StoreError> {
        self.query_records(&format!(
            "{LATEST} AND r.concluded = 0 ORDER BY r.edge_count ASC, r.path_key ASC"
        ))
    }

    pub fn status(&self) -> Result<Vec<RecordStatus>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{LATEST} ORDER BY r.path_key"))?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let raw: String = row_helpers::get(row, 3, "path_records", "record")?;
                let record: PathRecord = row_helpers::parse_json(&raw, "path_records", "record")?;
                out.push(RecordStatus {
                    key: row_helpers::get(row, 0, "path_records", "path_key")?,
                    revision: row_helpers::get(row, 1, "path_records", "revision")?,
                    edge_count: row_helpers::get(row, 2, "path_records", "edge_count")?,
                    conclusion: record.conclusion,
                });
            }
            Ok(out)
        })
    }

    /// Import records from a JSON object keyed by path key.
    pub fn import_json(&self, path: &Path) -> Result<ImportSummary, StoreError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Io(format!("read {}: {e}", path.display())))?;
        let records: BTreeMap<String, PathRecord> = serde_json::from_str(&text)?;
        let summary = self.import_records(records)?;
        info!(
            path = %path.display(),
            imported = summary.imported,
            kept_concluded = summary.kept_concluded,
            "records imported"
        );
        Ok(summary)
    }

    pub fn import_records(
        &self,
        records: BTreeMap<String, PathRecord>,
    ) -> Result<ImportSummary, StoreError> {
        self.db.with_tx(|tx| {
            let mut summary = ImportSummary::default();
            for (key, mut record) in records {
                let concluded: bool = tx
                    .query_row(
                        "SELECT concluded FROM path_records WHERE path_key = ?1
                         ORDER BY revision DESC LIMIT 1",
                        [&key],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or(false);
                if concluded {
                    summary.kept_concluded += 1;
                    continue;
                }
                if sinks::seed(&mut record) {
                    summary.seeded_sinks += 1;
                }
                let payload = serde_json::to_string(&record)?;
                insert_revision(tx, &key, &record, &payload)?;
                summary.imported += 1;
            }
            Ok(summary)
        })
    }

    /// Write the latest revision of every record as one JSON object.
    pub fn export_json(&self, path: &Path) -> Result<usize, StoreError> {
        let records: BTreeMap<String, PathRecord> = self.latest()?.into_iter().collect();
        let text = serde_json::to_string_pretty(&records)?;
        std::fs::write(path, text)
            .map_err(|e| StoreError::Io(format!("write {}: {e}", path.display())))?;
        Ok(records.len())
    }

    fn query_records(&self, sql: &str) -> Result<Vec<(String, PathRecord)>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let key: String = row_helpers::get(row, 0, "path_records", "path_key")?;
                let raw: String = row_helpers::get(row, 3, "path_records", "record")?;
                out.push((key, row_helpers::parse_json(&raw, "path_records", "record")?));
            }
            Ok(out)
        })
    }
}

fn insert_revision(
    conn: &rusqlite::Connection,
    key: &str,
    record: &PathRecord,
    payload: &str,
) -> Result<i64, StoreError> {
    let revision: i64 = conn.query_row(
        "SELECT COALESCE(MAX(revision), 0) + 1 FROM path_records WHERE path_key = ?1",
        [key],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO path_records (path_key, revision, edge_count, concluded, record, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            key,
            revision,
            record.call_graph.len() as i64,
            record.is_concluded(),
            payload,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(revision)
}
