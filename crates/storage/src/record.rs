use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The canonical stored form of a report.
///
/// `status` is kept as its wire string; the engine owns the closed status
/// type and converts on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: String,
    pub status: String,
    pub reporter_id: String,
    pub description: String,
    pub category_id: Option<String>,
    pub department_id: Option<String>,
    pub assigned_officer_ids: Vec<String>,
    pub photos_before: Vec<String>,
    pub photos_after: Vec<String>,
    pub misroute_reason: Option<String>,
    /// Status held before a soft delete, used by restore.
    pub status_before_delete: Option<String>,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Before/after values of a single field inside an audit diff.
///
/// Values are plain JSON so that historical entries stay accurate after
/// the report itself changes or is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub before: serde_json::Value,
    pub after: serde_json::Value,
}

/// Field name -> change.
pub type AuditDiff = BTreeMap<String, FieldChange>;

/// An immutable audit entry. Never updated or deleted once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    /// Monotonic insertion sequence, assigned by the backend on append.
    /// Breaks ordering ties between entries with identical timestamps.
    pub sequence: u64,
    pub report_id: String,
    pub actor_id: String,
    pub actor_role: String,
    pub action: String,
    pub diff: AuditDiff,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A delivery record for one recipient about one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub payload: serde_json::Value,
    pub report_id: String,
    /// The audit entry whose transition triggered this notification.
    pub audit_entry_id: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl NotificationRecord {
    /// Idempotency key: re-dispatching the same key is a no-op.
    pub fn dedup_key(&self) -> (&str, &str, &str, &str) {
        (
            &self.report_id,
            &self.notification_type,
            &self.recipient_id,
            &self.audit_entry_id,
        )
    }
}

/// A notification that could not be created after all dispatch attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: String,
    pub audit_entry_id: String,
    pub report_id: String,
    pub recipient_id: String,
    pub notification_type: String,
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
}

/// Filters for listing reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub status: Option<String>,
    pub reporter_id: Option<String>,
    /// Only reports with this officer in `assigned_officer_ids`.
    pub officer_id: Option<String>,
    /// Statuses to leave out of the result (applied after `status`).
    pub exclude_statuses: Vec<String>,
}

/// Filters and pagination for audit queries. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub report_id: Option<String>,
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub page: usize,
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            report_id: None,
            actor_id: None,
            action: None,
            page: 1,
            limit: 20,
        }
    }
}

/// One page of audit entries, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
    pub entries: Vec<AuditRecord>,
    pub page: usize,
    pub limit: usize,
    /// Total entries matching the filters, across all pages.
    pub total: usize,
}
