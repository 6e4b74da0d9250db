/// SQL DDL for the aegis database.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS path_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path_key TEXT NOT NULL,
    revision INTEGER NOT NULL,
    edge_count INTEGER NOT NULL,
    concluded INTEGER NOT NULL DEFAULT 0,
    record TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (path_key, revision)
);

CREATE TABLE IF NOT EXISTS functions (
    name TEXT PRIMARY KEY,
    module_path TEXT,
    start_line INTEGER,
    total_lines INTEGER,
    body TEXT
);

CREATE TABLE IF NOT EXISTS calls (
    caller TEXT NOT NULL,
    callee TEXT NOT NULL,
    PRIMARY KEY (caller, callee)
);

CREATE TABLE IF NOT EXISTS audit_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path_key TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_key_rev ON path_records(path_key, revision);
CREATE INDEX IF NOT EXISTS idx_calls_caller ON calls(caller);
CREATE INDEX IF NOT EXISTS idx_audit_events_key_seq ON audit_events(path_key, sequence);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
