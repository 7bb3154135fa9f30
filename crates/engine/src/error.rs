use std::fmt;

use civic_storage::StorageError;
use serde::{Deserialize, Serialize};

use crate::report::Report;

/// Why the validator (or the workflow gate in front of it) refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenyReason {
    /// The requested edge does not exist in the transition graph.
    InvalidTransition,
    /// The actor's role or relation to the report does not permit the edge.
    Unauthorized,
    /// The edge exists and is permitted, but its payload requirements are unmet.
    PreconditionFailed,
    /// The caller's expected version is stale.
    VersionConflict,
    NotFound,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::InvalidTransition => "InvalidTransition",
            DenyReason::Unauthorized => "Unauthorized",
            DenyReason::PreconditionFailed => "PreconditionFailed",
            DenyReason::VersionConflict => "VersionConflict",
            DenyReason::NotFound => "NotFound",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed refusal. Routine outcome, not an exceptional failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub reason: DenyReason,
    pub message: String,
}

impl Denial {
    pub fn new(reason: DenyReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl std::error::Error for Denial {}

/// Stable machine-readable error category, shared by the HTTP layer and
/// `BulkResult.failed[].reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    InvalidTransition,
    PreconditionFailed,
    VersionConflict,
    DispatchFailure,
    StorageFailure,
    UnknownNotificationType,
    Invalid,
}

impl From<DenyReason> for ErrorKind {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::InvalidTransition => ErrorKind::InvalidTransition,
            DenyReason::Unauthorized => ErrorKind::Unauthorized,
            DenyReason::PreconditionFailed => ErrorKind::PreconditionFailed,
            DenyReason::VersionConflict => ErrorKind::VersionConflict,
            DenyReason::NotFound => ErrorKind::NotFound,
        }
    }
}

/// All errors surfaced by the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("report not found: {report_id}")]
    NotFound { report_id: String },

    #[error("{0}")]
    Denied(Denial),

    /// Stale `expected_version`, or a concurrent writer won the commit.
    #[error("version conflict on report {report_id}: expected version {expected}")]
    VersionConflict { report_id: String, expected: i64 },

    /// The transition and its audit entry are committed, but the follow-up
    /// notification could not be created. A dead letter has been queued.
    #[error(
        "report {} moved to {} but notification dispatch failed: {message}",
        .report.id,
        .report.status
    )]
    DispatchFailure {
        report: Box<Report>,
        audit_entry_id: String,
        message: String,
    },

    #[error("unknown notification type '{0}'")]
    UnknownNotificationType(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::Denied(denial) => denial.reason.into(),
            WorkflowError::VersionConflict { .. } => ErrorKind::VersionConflict,
            WorkflowError::DispatchFailure { .. } => ErrorKind::DispatchFailure,
            WorkflowError::UnknownNotificationType(_) => ErrorKind::UnknownNotificationType,
            WorkflowError::Invalid(_) => ErrorKind::Invalid,
            WorkflowError::Storage(_) => ErrorKind::StorageFailure,
        }
    }

    pub(crate) fn denied(reason: DenyReason, message: impl Into<String>) -> Self {
        WorkflowError::Denied(Denial::new(reason, message))
    }
}

impl From<Denial> for WorkflowError {
    fn from(denial: Denial) -> Self {
        WorkflowError::Denied(denial)
    }
}

impl From<StorageError> for WorkflowError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ReportNotFound { report_id } => WorkflowError::NotFound { report_id },
            StorageError::ConcurrentConflict {
                report_id,
                expected_version,
            } => WorkflowError::VersionConflict {
                report_id,
                expected: expected_version,
            },
            other => WorkflowError::Storage(other),
        }
    }
}
