//! In-memory `ReportStorage` backend.
//!
//! Snapshots stage every write locally; nothing is visible to readers until
//! `commit_snapshot`, which re-validates staged report versions against the
//! committed state and applies all staged writes under one lock. Dropping or
//! aborting a snapshot discards its writes.
//!
//! No row locks are taken: concurrent snapshots on the same report race, and
//! the loser gets `ConcurrentConflict` at commit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::record::{
    AuditPage, AuditQuery, AuditRecord, DeadLetterRecord, NotificationRecord, ReportFilter,
    ReportRecord,
};
use crate::traits::ReportStorage;

/// Shared in-memory store. Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
    sequence: Arc<AtomicU64>,
}

#[derive(Default)]
struct MemoryInner {
    reports: BTreeMap<String, ReportRecord>,
    audit: Vec<AuditRecord>,
    notifications: Vec<NotificationRecord>,
    dead_letters: Vec<DeadLetterRecord>,
}

struct StagedReport {
    record: ReportRecord,
    /// Committed version this write was based on. `None` for inserts.
    base_version: Option<i64>,
}

/// Pending writes of one in-memory transaction.
#[derive(Default)]
pub struct MemorySnapshot {
    reports: BTreeMap<String, StagedReport>,
    audit: Vec<AuditRecord>,
    notifications: Vec<NotificationRecord>,
    dead_letters: Vec<DeadLetterRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;

        // Validate every staged report write before applying any of them.
        for (id, staged) in &snapshot.reports {
            match (staged.base_version, inner.reports.get(id)) {
                (None, Some(_)) => return Err(StorageError::AlreadyExists { id: id.clone() }),
                (Some(_), None) => {
                    return Err(StorageError::ReportNotFound {
                        report_id: id.clone(),
                    })
                }
                (Some(base), Some(current)) if current.version != base => {
                    return Err(StorageError::ConcurrentConflict {
                        report_id: id.clone(),
                        expected_version: base,
                    })
                }
                _ => {}
            }
        }

        for (id, staged) in snapshot.reports {
            inner.reports.insert(id, staged.record);
        }
        inner.audit.extend(snapshot.audit);
        for notification in snapshot.notifications {
            let duplicate = inner
                .notifications
                .iter()
                .any(|n| n.dedup_key() == notification.dedup_key());
            if !duplicate {
                inner.notifications.push(notification);
            }
        }
        inner.dead_letters.extend(snapshot.dead_letters);
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn insert_report(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ReportRecord,
    ) -> Result<(), StorageError> {
        let exists = snapshot.reports.contains_key(&record.id)
            || self.inner.lock().await.reports.contains_key(&record.id);
        if exists {
            return Err(StorageError::AlreadyExists { id: record.id });
        }
        snapshot.reports.insert(
            record.id.clone(),
            StagedReport {
                record,
                base_version: None,
            },
        );
        Ok(())
    }

    async fn get_report_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        report_id: &str,
    ) -> Result<ReportRecord, StorageError> {
        if let Some(staged) = snapshot.reports.get(report_id) {
            return Ok(staged.record.clone());
        }
        self.get_report(report_id).await
    }

    async fn update_report(
        &self,
        snapshot: &mut MemorySnapshot,
        mut record: ReportRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let (current_version, base_version) = match snapshot.reports.get(&record.id) {
            Some(staged) => (staged.record.version, staged.base_version),
            None => {
                let inner = self.inner.lock().await;
                let current =
                    inner
                        .reports
                        .get(&record.id)
                        .ok_or_else(|| StorageError::ReportNotFound {
                            report_id: record.id.clone(),
                        })?;
                (current.version, Some(current.version))
            }
        };

        if current_version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                report_id: record.id,
                expected_version,
            });
        }

        let new_version = expected_version + 1;
        record.version = new_version;
        snapshot.reports.insert(
            record.id.clone(),
            StagedReport {
                record,
                base_version,
            },
        );
        Ok(new_version)
    }

    async fn append_audit(
        &self,
        snapshot: &mut MemorySnapshot,
        mut record: AuditRecord,
    ) -> Result<AuditRecord, StorageError> {
        record.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        snapshot.audit.push(record.clone());
        Ok(record)
    }

    async fn insert_notification(
        &self,
        snapshot: &mut MemorySnapshot,
        record: NotificationRecord,
    ) -> Result<NotificationRecord, StorageError> {
        if let Some(existing) = snapshot
            .notifications
            .iter()
            .find(|n| n.dedup_key() == record.dedup_key())
        {
            return Ok(existing.clone());
        }
        {
            let inner = self.inner.lock().await;
            if let Some(existing) = inner
                .notifications
                .iter()
                .find(|n| n.dedup_key() == record.dedup_key())
            {
                return Ok(existing.clone());
            }
        }
        snapshot.notifications.push(record.clone());
        Ok(record)
    }

    async fn insert_dead_letter(
        &self,
        snapshot: &mut MemorySnapshot,
        record: DeadLetterRecord,
    ) -> Result<(), StorageError> {
        snapshot.dead_letters.push(record);
        Ok(())
    }

    async fn get_report(&self, report_id: &str) -> Result<ReportRecord, StorageError> {
        let inner = self.inner.lock().await;
        inner
            .reports
            .get(report_id)
            .cloned()
            .ok_or_else(|| StorageError::ReportNotFound {
                report_id: report_id.to_string(),
            })
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<ReportRecord>, StorageError> {
        let inner = self.inner.lock().await;
        let mut reports: Vec<ReportRecord> = inner
            .reports
            .values()
            .filter(|r| filter.status.as_ref().map_or(true, |s| &r.status == s))
            .filter(|r| {
                filter
                    .reporter_id
                    .as_ref()
                    .map_or(true, |id| &r.reporter_id == id)
            })
            .filter(|r| {
                filter
                    .officer_id
                    .as_ref()
                    .map_or(true, |id| r.assigned_officer_ids.contains(id))
            })
            .filter(|r| !filter.exclude_statuses.contains(&r.status))
            .cloned()
            .collect();
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(reports)
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage, StorageError> {
        let inner = self.inner.lock().await;
        let mut matching: Vec<&AuditRecord> = inner
            .audit
            .iter()
            .filter(|e| query.report_id.as_ref().map_or(true, |id| &e.report_id == id))
            .filter(|e| query.actor_id.as_ref().map_or(true, |id| &e.actor_id == id))
            .filter(|e| query.action.as_ref().map_or(true, |a| &e.action == a))
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence.cmp(&a.sequence))
        });

        let page = query.page.max(1);
        let limit = query.limit.max(1);
        let total = matching.len();
        let entries = matching
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .cloned()
            .collect();

        Ok(AuditPage {
            entries,
            page,
            limit,
            total,
        })
    }

    async fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
    ) -> Result<Vec<NotificationRecord>, StorageError> {
        let inner = self.inner.lock().await;
        let mut notifications: Vec<NotificationRecord> = inner
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .filter(|n| !unread_only || n.read_at.is_none())
            .cloned()
            .collect();
        // Stable sort on a reversed insertion order keeps ties newest-first.
        notifications.reverse();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn mark_notifications_read(
        &self,
        ids: &[String],
        read_at: OffsetDateTime,
    ) -> Result<usize, StorageError> {
        let mut inner = self.inner.lock().await;
        let mut updated = 0;
        for notification in inner.notifications.iter_mut() {
            if notification.read_at.is_none() && ids.contains(&notification.id) {
                notification.read_at = Some(read_at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn mark_all_read(
        &self,
        recipient_id: &str,
        before: Option<OffsetDateTime>,
        read_at: OffsetDateTime,
    ) -> Result<usize, StorageError> {
        let mut inner = self.inner.lock().await;
        let mut updated = 0;
        for notification in inner.notifications.iter_mut() {
            if notification.recipient_id == recipient_id
                && notification.read_at.is_none()
                && before.map_or(true, |cutoff| notification.created_at <= cutoff)
            {
                notification.read_at = Some(read_at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn unread_count(&self, recipient_id: &str) -> Result<usize, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id && n.read_at.is_none())
            .count())
    }

    async fn list_dead_letters(
        &self,
        pending_only: bool,
    ) -> Result<Vec<DeadLetterRecord>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .dead_letters
            .iter()
            .filter(|d| !pending_only || d.resolved_at.is_none())
            .cloned()
            .collect())
    }

    async fn resolve_dead_letter(
        &self,
        id: &str,
        resolved_at: OffsetDateTime,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        let dead_letter = inner
            .dead_letters
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StorageError::DeadLetterNotFound { id: id.to_string() })?;
        if dead_letter.resolved_at.is_none() {
            dead_letter.resolved_at = Some(resolved_at);
        }
        Ok(())
    }
}
