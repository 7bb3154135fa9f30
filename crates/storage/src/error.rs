/// All errors that can be returned by a ReportStorage implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another snapshot modified
    /// the report concurrently. The expected version was not found.
    #[error("concurrent conflict on report {report_id}: expected version {expected_version}")]
    ConcurrentConflict {
        report_id: String,
        expected_version: i64,
    },

    /// No report with the given id.
    #[error("report not found: {report_id}")]
    ReportNotFound { report_id: String },

    /// A record with this id already exists.
    #[error("record already exists: {id}")]
    AlreadyExists { id: String },

    /// Dead-letter record not found.
    #[error("dead letter not found: {id}")]
    DeadLetterNotFound { id: String },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
