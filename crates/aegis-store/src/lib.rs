pub mod database;
pub mod error;
pub mod events;
pub mod module_code;
pub mod records;
pub mod row_helpers;
pub mod schema;
pub mod source_index;

pub use database::Database;
pub use error::StoreError;
pub use events::{AuditEventKind, AuditEventRepo, AuditEventRow};
pub use records::{ImportSummary, RecordRepo, RecordStatus};
pub use source_index::SourceIndex;
