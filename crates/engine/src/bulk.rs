//! Bulk operation coordinator.

use std::collections::HashSet;

use civic_storage::ReportStorage;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ErrorKind, WorkflowError};
use crate::report::{Report, TransitionExtra};
use crate::status::{Actor, Status};
use crate::workflow::WorkflowService;

/// Per-id outcome of a bulk transition. Every distinct input id appears
/// exactly once, in either `updated` or `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkResult {
    pub updated: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub id: String,
    pub reason: ErrorKind,
    pub message: String,
}

impl<S: ReportStorage> WorkflowService<S> {
    /// Apply the same transition to many reports, independently.
    ///
    /// Items are last-write-wins: no expected version is checked, and an
    /// item that loses a concurrent commit is retried once against the
    /// fresh version. No item's error aborts the batch.
    pub async fn bulk_apply(&self, ids: &[String], to: Status, actor: &Actor) -> BulkResult {
        let mut seen = HashSet::new();
        let mut result = BulkResult::default();

        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match self.bulk_item(id, to, actor).await {
                Ok(_) => result.updated.push(id.clone()),
                Err(WorkflowError::DispatchFailure { message, .. }) => {
                    // The transition is committed; only its notification is queued.
                    warn!(report_id = %id, error = %message, "bulk item applied with pending notification");
                    result.updated.push(id.clone());
                }
                Err(e) => result.failed.push(BulkFailure {
                    id: id.clone(),
                    reason: e.kind(),
                    message: e.to_string(),
                }),
            }
        }

        info!(
            to = %to,
            actor_id = %actor.id,
            updated = result.updated.len(),
            failed = result.failed.len(),
            "bulk transition finished"
        );
        result
    }

    async fn bulk_item(&self, id: &str, to: Status, actor: &Actor) -> Result<Report, WorkflowError> {
        match self
            .apply_transition(id, to, actor, None, TransitionExtra::default())
            .await
        {
            Err(WorkflowError::VersionConflict { .. }) => {
                self.apply_transition(id, to, actor, None, TransitionExtra::default())
                    .await
            }
            other => other,
        }
    }
}
