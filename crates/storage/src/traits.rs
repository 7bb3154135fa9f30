use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{
    AuditPage, AuditQuery, AuditRecord, DeadLetterRecord, NotificationRecord, ReportFilter,
    ReportRecord,
};

/// The storage trait for report workflow backends.
///
/// A `ReportStorage` implementation provides durable, transactional storage
/// for reports, audit entries, notifications and dead letters.
///
/// ## Snapshot Semantics
///
/// All mutating workflow operations take `&mut Self::Snapshot`, a type
/// representing an in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, nothing it staged may
/// become visible.
///
/// ## OCC Conflict Detection
///
/// `update_report` is conditional on `version = expected_version`. A
/// mismatch, detected either at the call or at commit, returns
/// `Err(StorageError::ConcurrentConflict { .. })`.
///
/// ## Append-only records
///
/// Audit entries are never updated or deleted. Notifications are only ever
/// mutated to set `read_at`. Dead letters are only ever mutated to set
/// `resolved_at`.
#[async_trait]
pub trait ReportStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Report operations (within snapshot) ───────────────────────────────────

    /// Insert a new report.
    ///
    /// Returns `Err(StorageError::AlreadyExists)` if the id is taken.
    async fn insert_report(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ReportRecord,
    ) -> Result<(), StorageError>;

    /// Read a report as seen from inside the snapshot, including its own
    /// staged writes.
    async fn get_report_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        report_id: &str,
    ) -> Result<ReportRecord, StorageError>;

    /// Replace a report, conditional on its stored version matching
    /// `expected_version`. The stored version becomes `expected_version + 1`
    /// regardless of `record.version`.
    ///
    /// Returns the new version number on success.
    async fn update_report(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ReportRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    // ── Recording operations (within snapshot) ────────────────────────────────

    /// Append an audit entry. The backend assigns `sequence`; the stored
    /// entry is returned.
    async fn append_audit(
        &self,
        snapshot: &mut Self::Snapshot,
        record: AuditRecord,
    ) -> Result<AuditRecord, StorageError>;

    /// Insert a notification, idempotent on
    /// `(report_id, type, recipient_id, audit_entry_id)`.
    ///
    /// When a notification with the same key already exists (committed or
    /// staged in this snapshot) nothing is written and the existing record
    /// is returned.
    async fn insert_notification(
        &self,
        snapshot: &mut Self::Snapshot,
        record: NotificationRecord,
    ) -> Result<NotificationRecord, StorageError>;

    /// Insert a dead-letter record for a notification that could not be
    /// created.
    async fn insert_dead_letter(
        &self,
        snapshot: &mut Self::Snapshot,
        record: DeadLetterRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    /// Read a report's committed state.
    ///
    /// Returns `Err(StorageError::ReportNotFound)` if the report does not exist.
    async fn get_report(&self, report_id: &str) -> Result<ReportRecord, StorageError>;

    /// List reports matching the filter, ordered by creation time.
    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<ReportRecord>, StorageError>;

    /// Query audit entries, newest first (`created_at`, then `sequence`).
    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage, StorageError>;

    /// List a recipient's notifications, newest first.
    async fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
    ) -> Result<Vec<NotificationRecord>, StorageError>;

    /// Set `read_at` on the given unread notifications. Unknown ids and
    /// already-read notifications are skipped.
    ///
    /// Returns the number of notifications updated.
    async fn mark_notifications_read(
        &self,
        ids: &[String],
        read_at: OffsetDateTime,
    ) -> Result<usize, StorageError>;

    /// Set `read_at` on all of a recipient's unread notifications, optionally
    /// only those created at or before `before`.
    ///
    /// Returns the number of notifications updated.
    async fn mark_all_read(
        &self,
        recipient_id: &str,
        before: Option<OffsetDateTime>,
        read_at: OffsetDateTime,
    ) -> Result<usize, StorageError>;

    /// Count a recipient's unread notifications.
    async fn unread_count(&self, recipient_id: &str) -> Result<usize, StorageError>;

    /// List dead letters, oldest first.
    async fn list_dead_letters(
        &self,
        pending_only: bool,
    ) -> Result<Vec<DeadLetterRecord>, StorageError>;

    /// Mark a dead letter as resolved.
    async fn resolve_dead_letter(
        &self,
        id: &str,
        resolved_at: OffsetDateTime,
    ) -> Result<(), StorageError>;
}
