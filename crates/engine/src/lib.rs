//! Report lifecycle workflow engine.
//!
//! Moves citizen reports through a fixed status graph. Every transition is
//! checked by the `TransitionValidator` against the acting principal's role,
//! persisted together with an immutable audit entry, and followed by the
//! notifications the closed type registry prescribes. `WorkflowService` is
//! the single entry point for mutations; storage is pluggable through
//! `civic_storage::ReportStorage`.

pub mod audit;
pub mod bulk;
pub mod collab;
pub mod error;
pub mod intake;
pub mod notify;
pub mod policy;
pub mod registry;
pub mod report;
pub mod status;
pub mod validator;
pub mod workflow;

pub use audit::{AuditEntry, AuditRecorder};
pub use bulk::{BulkFailure, BulkResult};
pub use collab::{Classification, Classifier, CollaboratorError, UploadedPhoto};
pub use error::{Denial, DenyReason, ErrorKind, WorkflowError};
pub use intake::ReportDraft;
pub use notify::{Notification, NotificationDispatcher, RedeliveryReport};
pub use policy::{ListingPolicy, WorkflowPolicy};
pub use registry::{NotificationType, REGISTRY_VERSION};
pub use report::{Report, TransitionExtra};
pub use status::{Actor, Role, Status};
pub use validator::{EdgeSummary, TransitionValidator};
pub use workflow::{ReportQuery, WorkflowService};
