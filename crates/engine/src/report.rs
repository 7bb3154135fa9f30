//! The report domain type and the payload a transition may carry.

use std::collections::BTreeSet;

use civic_storage::{ReportRecord, StorageError};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::WorkflowError;
use crate::status::{Actor, Role, Status};
use crate::validator::TransitionPlan;

/// A unit of citizen-reported work.
///
/// `status` only changes through `WorkflowService`, after the transition
/// validator has accepted the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub status: Status,
    pub reporter_id: String,
    pub description: String,
    pub category_id: Option<String>,
    pub department_id: Option<String>,
    pub assigned_officer_ids: BTreeSet<String>,
    pub photos_before: Vec<String>,
    pub photos_after: Vec<String>,
    pub misroute_reason: Option<String>,
    pub status_before_delete: Option<Status>,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Optional field changes supplied alongside a transition request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionExtra {
    /// Replaces the assigned officer set when present.
    pub assigned_officer_ids: Option<Vec<String>>,
    /// Appended to `photos_after` (already-uploaded object URLs).
    pub photos_after: Vec<String>,
    /// Required when moving to `misrouted`.
    pub misroute_reason: Option<String>,
    pub category_id: Option<String>,
    pub department_id: Option<String>,
}

impl TransitionExtra {
    /// The trimmed misroute reason, if one with content was supplied.
    pub fn misroute_reason(&self) -> Option<&str> {
        self.misroute_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Whether the request touches who or what the report is routed to.
    pub fn changes_routing(&self) -> bool {
        self.assigned_officer_ids.is_some()
            || self.category_id.is_some()
            || self.department_id.is_some()
    }

    /// Whether any supplied after-photo URL is blank.
    pub fn has_blank_photo(&self) -> bool {
        self.photos_after.iter().any(|url| url.trim().is_empty())
    }
}

impl Report {
    pub fn from_record(record: ReportRecord) -> Result<Self, WorkflowError> {
        let status = parse_stored_status(&record.id, &record.status)?;
        let status_before_delete = record
            .status_before_delete
            .as_deref()
            .map(|s| parse_stored_status(&record.id, s))
            .transpose()?;

        Ok(Report {
            id: record.id,
            status,
            reporter_id: record.reporter_id,
            description: record.description,
            category_id: record.category_id,
            department_id: record.department_id,
            assigned_officer_ids: record.assigned_officer_ids.into_iter().collect(),
            photos_before: record.photos_before,
            photos_after: record.photos_after,
            misroute_reason: record.misroute_reason,
            status_before_delete,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    pub fn to_record(&self) -> ReportRecord {
        ReportRecord {
            id: self.id.clone(),
            status: self.status.as_str().to_string(),
            reporter_id: self.reporter_id.clone(),
            description: self.description.clone(),
            category_id: self.category_id.clone(),
            department_id: self.department_id.clone(),
            assigned_officer_ids: self.assigned_officer_ids.iter().cloned().collect(),
            photos_before: self.photos_before.clone(),
            photos_after: self.photos_after.clone(),
            misroute_reason: self.misroute_reason.clone(),
            status_before_delete: self.status_before_delete.map(|s| s.as_str().to_string()),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn is_assigned_to(&self, officer_id: &str) -> bool {
        self.assigned_officer_ids.contains(officer_id)
    }

    /// The report as it will look once `plan` is applied with `extra`.
    ///
    /// `version` is left untouched; the store assigns the next version.
    pub(crate) fn transitioned(
        &self,
        plan: &TransitionPlan,
        actor: &Actor,
        extra: &TransitionExtra,
        now: OffsetDateTime,
    ) -> Report {
        let mut next = self.clone();
        next.status = plan.to;
        next.updated_at = now;

        match &extra.assigned_officer_ids {
            Some(ids) => next.assigned_officer_ids = ids.iter().cloned().collect(),
            // An officer taking an unassigned report claims it.
            None if plan.to == Status::Assigned
                && actor.role == Role::Officer
                && next.assigned_officer_ids.is_empty() =>
            {
                next.assigned_officer_ids.insert(actor.id.clone());
            }
            None => {}
        }

        for url in extra.photos_after.iter().map(|u| u.trim()) {
            if !url.is_empty() && !next.photos_after.iter().any(|p| p == url) {
                next.photos_after.push(url.to_string());
            }
        }

        if plan.to == Status::Misrouted {
            next.misroute_reason = extra.misroute_reason().map(str::to_string);
        }
        if let Some(category_id) = &extra.category_id {
            next.category_id = Some(category_id.clone());
        }
        if let Some(department_id) = &extra.department_id {
            next.department_id = Some(department_id.clone());
        }
        if plan.to == Status::Deleted {
            next.status_before_delete = Some(self.status);
        }
        next
    }
}

fn parse_stored_status(report_id: &str, raw: &str) -> Result<Status, WorkflowError> {
    raw.parse().map_err(|_| {
        WorkflowError::Storage(StorageError::Backend(format!(
            "report {} has unrecognised stored status '{}'",
            report_id, raw
        )))
    })
}
