//! Audit recorder: append-only history of every accepted mutation.

use std::sync::Arc;

use civic_storage::{AuditDiff, AuditPage, AuditQuery, AuditRecord, FieldChange, ReportStorage};
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::error::WorkflowError;
use crate::report::Report;
use crate::status::Actor;

pub const ACTION_CREATED: &str = "created";
pub const ACTION_STATUS_CHANGED: &str = "status_changed";
pub const ACTION_ASSIGNED: &str = "assigned";
pub const ACTION_MISROUTED: &str = "misrouted";
pub const ACTION_FORCE_CLOSED: &str = "force_closed";
pub const ACTION_DELETED: &str = "deleted";
pub const ACTION_RESTORED: &str = "restored";

/// Upper bound on `AuditQuery::limit`.
pub const MAX_PAGE_SIZE: usize = 100;

/// Audit entries are stored records; once appended they never change.
pub type AuditEntry = AuditRecord;

pub struct AuditRecorder<S> {
    storage: Arc<S>,
}

impl<S: ReportStorage> AuditRecorder<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Append one entry inside the caller's snapshot, so it commits or rolls
    /// back together with the mutation it describes.
    pub async fn append(
        &self,
        snapshot: &mut S::Snapshot,
        report_id: &str,
        actor: &Actor,
        action: &str,
        diff: AuditDiff,
        at: OffsetDateTime,
    ) -> Result<AuditEntry, WorkflowError> {
        let entry = AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            sequence: 0,
            report_id: report_id.to_string(),
            actor_id: actor.id.clone(),
            actor_role: actor.role.as_str().to_string(),
            action: action.to_string(),
            diff,
            created_at: at,
        };
        Ok(self.storage.append_audit(snapshot, entry).await?)
    }

    /// Page through entries, newest first.
    pub async fn query(&self, query: &AuditQuery) -> Result<AuditPage, WorkflowError> {
        let mut bounded = query.clone();
        bounded.page = bounded.page.max(1);
        bounded.limit = bounded.limit.clamp(1, MAX_PAGE_SIZE);
        Ok(self.storage.query_audit(&bounded).await?)
    }
}

/// Field-level diff between two versions of a report.
///
/// Covers the fields a transition or restore may change; `version` and
/// timestamps are implied by the entry itself.
pub fn diff_reports(before: &Report, after: &Report) -> AuditDiff {
    let mut diff = AuditDiff::new();
    record_change(&mut diff, "status", json!(before.status), json!(after.status));
    record_change(
        &mut diff,
        "assigned_officer_ids",
        json!(before.assigned_officer_ids),
        json!(after.assigned_officer_ids),
    );
    record_change(
        &mut diff,
        "photos_after",
        json!(before.photos_after),
        json!(after.photos_after),
    );
    record_change(
        &mut diff,
        "misroute_reason",
        json!(before.misroute_reason),
        json!(after.misroute_reason),
    );
    record_change(
        &mut diff,
        "category_id",
        json!(before.category_id),
        json!(after.category_id),
    );
    record_change(
        &mut diff,
        "department_id",
        json!(before.department_id),
        json!(after.department_id),
    );
    diff
}

/// Diff for a newly created report: every initial field against null.
pub fn creation_diff(report: &Report) -> AuditDiff {
    let mut diff = AuditDiff::new();
    record_change(&mut diff, "status", Value::Null, json!(report.status));
    record_change(&mut diff, "reporter_id", Value::Null, json!(report.reporter_id));
    record_change(&mut diff, "description", Value::Null, json!(report.description));
    record_change(&mut diff, "category_id", Value::Null, json!(report.category_id));
    record_change(&mut diff, "department_id", Value::Null, json!(report.department_id));
    record_change(&mut diff, "photos_before", json!([]), json!(report.photos_before));
    diff
}

fn record_change(diff: &mut AuditDiff, field: &str, before: Value, after: Value) {
    if before != after {
        diff.insert(field.to_string(), FieldChange { before, after });
    }
}
