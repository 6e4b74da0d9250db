use std::path::{Path, PathBuf};

use aegis_graph::{FunctionId, ResolveError, SourceResolver};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::Database;
use crate::error::StoreError;
use crate::module_code;
use crate::row_helpers;

/// One function known to the static analyser.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub name: String,
    #[serde(default)]
    pub module_path: Option<PathBuf>,
    /// 1-based first line of the definition.
    #[serde(default)]
    pub start_line: Option<i64>,
    #[serde(default)]
    pub total_lines: Option<i64>,
    /// Inline body; wins over the file location when present.
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEntry {
    pub caller: String,
    pub callee: String,
}

#[derive(Debug, Default, Deserialize)]
struct IndexFile {
    #[serde(default)]
    functions: Vec<FunctionEntry>,
    #[serde(default)]
    calls: Vec<CallEntry>,
}

/// SQLite-backed view of the analysed codebase.
#[derive(Clone)]
pub struct SourceIndex {
    db: Database,
}

impl SourceIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn upsert_function(&self, entry: &FunctionEntry) -> Result<(), StoreError> {
        self.db.with_conn(|conn| insert_function(conn, entry))
    }

    pub fn add_call(&self, caller: &str, callee: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| insert_call(conn, caller, callee))
    }

    /// Load `{functions: [...], calls: [...]}`. Returns (functions, calls) written.
    pub fn import_json(&self, path: &Path) -> Result<(usize, usize), StoreError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Io(format!("read {}: {e}", path.display())))?;
        let index: IndexFile = serde_json::from_str(&text)?;
        let counts = self.db.with_tx(|tx| {
            for f in &index.functions {
                insert_function(tx, f)?;
            }
            for c in &index.calls {
                insert_call(tx, &c.caller, &c.callee)?;
            }
            Ok((index.functions.len(), index.calls.len()))
        })?;
        info!(path = %path.display(), functions = counts.0, calls = counts.1, "source index imported");
        Ok(counts)
    }

    fn lookup(&self, name: &str) -> Result<Option<FunctionEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, module_path, start_line, total_lines, body FROM functions WHERE name = ?1",
            )?;
            let entry = stmt
                .query_row([name], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })
                .optional()?;
            Ok(entry.map(|(name, module_path, start_line, total_lines, body)| FunctionEntry {
                name,
                module_path: module_path.map(PathBuf::from),
                start_line,
                total_lines,
                body,
            }))
        })
    }

    fn callees(&self, caller: &str) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT callee FROM calls WHERE caller = ?1 ORDER BY rowid")?;
            let mut rows = stmt.query([caller])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_helpers::get(row, 0, "calls", "callee")?);
            }
            Ok(out)
        })
    }
}

fn insert_function(conn: &rusqlite::Connection, entry: &FunctionEntry) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO functions (name, module_path, start_line, total_lines, body)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
            module_path = excluded.module_path,
            start_line = excluded.start_line,
            total_lines = excluded.total_lines,
            body = excluded.body",
        rusqlite::params![
            entry.name,
            entry.module_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            entry.start_line,
            entry.total_lines,
            entry.body,
        ],
    )?;
    Ok(())
}

fn insert_call(conn: &rusqlite::Connection, caller: &str, callee: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO calls (caller, callee) VALUES (?1, ?2)",
        [caller, callee],
    )?;
    Ok(())
}

/// Lines `[start, start + total)` of a file, 1-based.
fn read_lines(path: &Path, start: i64, total: i64) -> Option<String> {
    if start < 1 || total < 1 {
        return None;
    }
    let text = std::fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = text.lines().collect();
    let begin = usize::try_from(start - 1).ok()?;
    let end = begin.checked_add(usize::try_from(total).ok()?)?;
    if end > lines.len() {
        return None;
    }
    Some(lines[begin..end].join("\n"))
}

impl SourceResolver for SourceIndex {
    fn function_body(&self, function: &FunctionId) -> Result<String, ResolveError> {
        let entry = self
            .lookup(function.as_str())
            .map_err(|e| ResolveError::Backend(e.to_string()))?
            .ok_or_else(|| ResolveError::NotFound(function.clone()))?;

        let body = match (entry.body, entry.module_path, entry.start_line, entry.total_lines) {
            (Some(body), ..) => body,
            (None, Some(path), Some(start), Some(total)) => read_lines(&path, start, total).ok_or_else(|| {
                debug!(function = %function, path = %path.display(), "source lines unavailable");
                ResolveError::NotFound(function.clone())
            })?,
            _ => return Err(ResolveError::NotFound(function.clone())),
        };
        if module_code::is_module_level(function.as_str()) {
            return Ok(module_code::executable_statements(&body));
        }
        Ok(body)
    }

    fn callees_of(&self, caller: &FunctionId) -> Result<Vec<FunctionId>, ResolveError> {
        self.callees(caller.as_str())
            .map(|names| names.into_iter().map(FunctionId::from).collect())
            .map_err(|e| ResolveError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SourceIndex {
        SourceIndex::new(Database::in_memory().unwrap())
    }

    #[test]
    fn inline_body_and_callees() {
        let idx = index();
        idx.upsert_function(&FunctionEntry {
            name: "app.f".into(),
            module_path: None,
            start_line: None,
            total_lines: None,
            body: Some("def f():\n    g()".into()),
        })
        .unwrap();
        idx.add_call("app.f", "app.g").unwrap();
        idx.add_call("app.f", "app.h").unwrap();
        idx.add_call("app.f", "app.g").unwrap();

        assert_eq!(idx.function_body(&"app.f".into()).unwrap(), "def f():\n    g()");
        assert_eq!(
            idx.callees_of(&"app.f".into()).unwrap(),
            vec![FunctionId::from("app.g"), FunctionId::from("app.h")]
        );
        assert!(idx.callees_of(&"app.z".into()).unwrap().is_empty());
    }

    #[test]
    fn body_read_from_module_file() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("loader.py");
        std::fs::write(&module, "import torch\n\ndef load(p):\n    return torch.load(p)\n").unwrap();

        let idx = index();
        idx.upsert_function(&FunctionEntry {
            name: "loader.load".into(),
            module_path: Some(module.clone()),
            start_line: Some(3),
            total_lines: Some(2),
            body: None,
        })
        .unwrap();
        idx.upsert_function(&FunctionEntry {
            name: "loader.broken".into(),
            module_path: Some(module),
            start_line: Some(4),
            total_lines: Some(10),
            body: None,
        })
        .unwrap();

        assert_eq!(
            idx.function_body(&"loader.load".into()).unwrap(),
            "def load(p):\n    return torch.load(p)"
        );
        assert!(matches!(
            idx.function_body(&"loader.broken".into()),
            Err(ResolveError::NotFound(_))
        ));
        assert!(matches!(
            idx.function_body(&"loader.unknown".into()),
            Err(ResolveError::NotFound(_))
        ));
    }

    #[test]
    fn import_json_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "functions": [{"name": "a.main", "body": "def main(): run()"}],
                "calls": [{"caller": "a.main", "callee": "a.run"}]
            })
            .to_string(),
        )
        .unwrap();

        let idx = index();
        assert_eq!(idx.import_json(&path).unwrap(), (1, 1));
        assert_eq!(idx.callees_of(&"a.main".into()).unwrap(), vec![FunctionId::from("a.run")]);
    }

    #[test]
    fn module_entry_keeps_only_top_level_code() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("main.py");
        std::fs::write(
            &module,
            "import os\n\ndef helper(x):\n    os.system(x)\n\nclass C:\n    pass\n\nname = input()\nhelper(name)\n",
        )
        .unwrap();

        let idx = index();
        idx.upsert_function(&FunctionEntry {
            name: "app.main.<module>".into(),
            module_path: Some(module),
            start_line: Some(1),
            total_lines: Some(10),
            body: None,
        })
        .unwrap();

        let body = idx.function_body(&"app.main.<module>".into()).unwrap();
        assert_eq!(body, "name = input()\nhelper(name)");
        assert!(!body.contains("def helper"));
        assert!(!body.contains("import os"));
    }
}
