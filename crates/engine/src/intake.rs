//! Report intake: turning a citizen's draft into a `submitted` report.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::collab::{Classification, UploadedPhoto};
use crate::error::WorkflowError;
use crate::report::Report;
use crate::status::Status;

/// Input for a new report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportDraft {
    pub description: String,
    /// Only honoured for admins filing on behalf of a reporter.
    pub reporter_id: Option<String>,
    pub category_id: Option<String>,
    pub department_id: Option<String>,
    /// Photos already uploaded to object storage.
    pub photos_before: Vec<UploadedPhoto>,
}

/// Build the initial report. An explicit category wins over the classifier,
/// whose suggestion is only taken at or above `min_confidence`.
pub(crate) fn build_report(
    id: String,
    reporter_id: String,
    draft: ReportDraft,
    classification: Option<&Classification>,
    min_confidence: f64,
    now: OffsetDateTime,
) -> Result<Report, WorkflowError> {
    let description = draft.description.trim();
    if description.is_empty() {
        return Err(WorkflowError::Invalid(
            "report description must not be empty".into(),
        ));
    }
    if draft.photos_before.iter().any(|p| p.url.trim().is_empty()) {
        return Err(WorkflowError::Invalid("photo url must not be empty".into()));
    }

    let category_id = draft.category_id.or_else(|| {
        classification
            .filter(|c| c.is_confident(min_confidence))
            .map(|c| c.category_id.clone())
    });

    Ok(Report {
        id,
        status: Status::Submitted,
        reporter_id,
        description: description.to_string(),
        category_id,
        department_id: draft.department_id,
        assigned_officer_ids: BTreeSet::new(),
        photos_before: draft.photos_before.into_iter().map(|p| p.url).collect(),
        photos_after: Vec::new(),
        misroute_reason: None,
        status_before_delete: None,
        version: 1,
        created_at: now,
        updated_at: now,
    })
}
