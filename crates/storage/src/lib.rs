pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage};
pub use record::{
    AuditDiff, AuditPage, AuditQuery, AuditRecord, DeadLetterRecord, FieldChange,
    NotificationRecord, ReportFilter, ReportRecord,
};
pub use traits::ReportStorage;
