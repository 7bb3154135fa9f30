//! Notification dispatcher.
//!
//! Creates notification records for accepted transitions and tracks their
//! read state. Dispatch is idempotent per triggering audit entry, so a
//! retried dispatch never produces a second row for the same
//! `(report, type, recipient)`.

use std::sync::Arc;

use civic_storage::{DeadLetterRecord, NotificationRecord, ReportStorage, StorageError};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::error::WorkflowError;
use crate::registry::NotificationType;

pub type Notification = NotificationRecord;

/// A notification that still has to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNotification {
    pub notification_type: NotificationType,
    pub recipient_id: String,
    pub report_id: String,
    pub audit_entry_id: String,
    pub payload: Value,
}

/// Outcome of replaying dead letters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedeliveryReport {
    pub redelivered: Vec<String>,
    pub still_failing: Vec<String>,
}

pub struct NotificationDispatcher<S> {
    storage: Arc<S>,
    attempts: u32,
}

impl<S: ReportStorage> NotificationDispatcher<S> {
    pub fn new(storage: Arc<S>, attempts: u32) -> Self {
        Self {
            storage,
            attempts: attempts.max(1),
        }
    }

    /// Create one notification in its own snapshot.
    ///
    /// Re-dispatching the same `(report, type, recipient, audit entry)`
    /// returns the existing record.
    pub async fn dispatch(&self, pending: &PendingNotification) -> Result<Notification, StorageError> {
        let record = NotificationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id: pending.recipient_id.clone(),
            notification_type: pending.notification_type.as_str().to_string(),
            payload: pending.payload.clone(),
            report_id: pending.report_id.clone(),
            audit_entry_id: pending.audit_entry_id.clone(),
            read_at: None,
            created_at: OffsetDateTime::now_utc(),
        };

        let mut snapshot = self.storage.begin_snapshot().await?;
        match self.storage.insert_notification(&mut snapshot, record).await {
            Ok(stored) => {
                self.storage.commit_snapshot(snapshot).await?;
                Ok(stored)
            }
            Err(e) => {
                if let Err(abort) = self.storage.abort_snapshot(snapshot).await {
                    warn!(error = %abort, "abort failed");
                }
                Err(e)
            }
        }
    }

    /// Dispatch with up to the configured number of attempts.
    ///
    /// On exhaustion returns the last error and the number of attempts made.
    pub(crate) async fn dispatch_with_retry(
        &self,
        pending: &PendingNotification,
    ) -> Result<Notification, (StorageError, u32)> {
        let mut attempt = 1;
        loop {
            match self.dispatch(pending).await {
                Ok(notification) => return Ok(notification),
                Err(e) if attempt < self.attempts => {
                    warn!(
                        report_id = %pending.report_id,
                        notification_type = %pending.notification_type,
                        attempt,
                        error = %e,
                        "notification dispatch failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    /// Park a notification that could not be created.
    pub(crate) async fn dead_letter(
        &self,
        pending: &PendingNotification,
        cause: &StorageError,
        attempts: u32,
    ) -> Result<DeadLetterRecord, StorageError> {
        let record = DeadLetterRecord {
            id: uuid::Uuid::new_v4().to_string(),
            audit_entry_id: pending.audit_entry_id.clone(),
            report_id: pending.report_id.clone(),
            recipient_id: pending.recipient_id.clone(),
            notification_type: pending.notification_type.as_str().to_string(),
            payload: pending.payload.clone(),
            error: cause.to_string(),
            attempts,
            created_at: OffsetDateTime::now_utc(),
            resolved_at: None,
        };
        let mut snapshot = self.storage.begin_snapshot().await?;
        if let Err(e) = self
            .storage
            .insert_dead_letter(&mut snapshot, record.clone())
            .await
        {
            if let Err(abort) = self.storage.abort_snapshot(snapshot).await {
                warn!(error = %abort, "abort failed");
            }
            return Err(e);
        }
        self.storage.commit_snapshot(snapshot).await?;
        Ok(record)
    }

    /// Replay every pending dead letter. Dispatch is idempotent, so a dead
    /// letter whose notification was in fact written is resolved without a
    /// duplicate.
    pub async fn redeliver_dead_letters(&self) -> Result<RedeliveryReport, WorkflowError> {
        let mut report = RedeliveryReport::default();
        for dead_letter in self.storage.list_dead_letters(true).await? {
            let notification_type = match dead_letter.notification_type.parse::<NotificationType>() {
                Ok(t) => t,
                Err(e) => {
                    error!(dead_letter_id = %dead_letter.id, error = %e, "dead letter has an unregistered type");
                    report.still_failing.push(dead_letter.id);
                    continue;
                }
            };
            let pending = PendingNotification {
                notification_type,
                recipient_id: dead_letter.recipient_id.clone(),
                report_id: dead_letter.report_id.clone(),
                audit_entry_id: dead_letter.audit_entry_id.clone(),
                payload: dead_letter.payload.clone(),
            };
            match self.dispatch(&pending).await {
                Ok(_) => {
                    self.storage
                        .resolve_dead_letter(&dead_letter.id, OffsetDateTime::now_utc())
                        .await?;
                    report.redelivered.push(dead_letter.id);
                }
                Err(e) => {
                    warn!(dead_letter_id = %dead_letter.id, error = %e, "redelivery failed");
                    report.still_failing.push(dead_letter.id);
                }
            }
        }
        if !report.redelivered.is_empty() || !report.still_failing.is_empty() {
            info!(
                redelivered = report.redelivered.len(),
                still_failing = report.still_failing.len(),
                "dead letter redelivery finished"
            );
        }
        Ok(report)
    }

    pub async fn dead_letters(&self, pending_only: bool) -> Result<Vec<DeadLetterRecord>, WorkflowError> {
        Ok(self.storage.list_dead_letters(pending_only).await?)
    }

    pub async fn list(&self, recipient_id: &str, unread_only: bool) -> Result<Vec<Notification>, WorkflowError> {
        Ok(self.storage.list_notifications(recipient_id, unread_only).await?)
    }

    /// Returns the number of notifications that went from unread to read.
    pub async fn mark_read(&self, ids: &[String]) -> Result<usize, WorkflowError> {
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(self
            .storage
            .mark_notifications_read(ids, OffsetDateTime::now_utc())
            .await?)
    }

    /// Returns the number of notifications that went from unread to read.
    pub async fn mark_all_read(
        &self,
        recipient_id: &str,
        before: Option<OffsetDateTime>,
    ) -> Result<usize, WorkflowError> {
        Ok(self
            .storage
            .mark_all_read(recipient_id, before, OffsetDateTime::now_utc())
            .await?)
    }

    pub async fn unread_count(&self, recipient_id: &str) -> Result<usize, WorkflowError> {
        Ok(self.storage.unread_count(recipient_id).await?)
    }
}
