use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    get(row, idx, table, column)
}

/// Deserialize a JSON text column, returning CorruptRow on failure.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AuditEventKind;

    #[test]
    fn parse_enum_success() {
        let kind: AuditEventKind = parse_enum("verdict", "audit_events", "kind").unwrap();
        assert_eq!(kind, AuditEventKind::Verdict);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<AuditEventKind, _> = parse_enum("INVALID", "audit_events", "kind");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "audit_events", column: "kind", .. })
        ));
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<serde_json::Value, _> = parse_json("not json", "path_records", "record");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "path_records", column: "record", .. })
        ));
    }
}
