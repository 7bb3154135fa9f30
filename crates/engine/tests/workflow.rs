//! End-to-end workflow tests against a storage backend with injectable faults.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use civic_engine::audit::{ACTION_FORCE_CLOSED, ACTION_RESTORED, ACTION_STATUS_CHANGED};
use civic_engine::{
    Actor, DenyReason, ErrorKind, ListingPolicy, NotificationType, Report, ReportDraft, Role,
    Status, TransitionExtra, WorkflowError, WorkflowPolicy, WorkflowService,
};
use civic_storage::{
    AuditPage, AuditQuery, AuditRecord, DeadLetterRecord, MemorySnapshot, MemoryStorage,
    NotificationRecord, ReportFilter, ReportRecord, ReportStorage, StorageError,
};
use serde_json::json;
use time::OffsetDateTime;

// ──────────────────────────────────────────────
// Fault-injecting storage
// ──────────────────────────────────────────────

#[derive(Default)]
struct FaultyStorage {
    inner: MemoryStorage,
    fail_audit: AtomicBool,
    /// Number of upcoming notification inserts that fail.
    notification_failures: AtomicU32,
}

impl FaultyStorage {
    fn fail_next_notifications(&self, n: u32) {
        self.notification_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReportStorage for FaultyStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        self.inner.begin_snapshot().await
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        self.inner.commit_snapshot(snapshot).await
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        self.inner.abort_snapshot(snapshot).await
    }

    async fn insert_report(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ReportRecord,
    ) -> Result<(), StorageError> {
        self.inner.insert_report(snapshot, record).await
    }

    async fn get_report_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        report_id: &str,
    ) -> Result<ReportRecord, StorageError> {
        self.inner.get_report_for_update(snapshot, report_id).await
    }

    async fn update_report(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ReportRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        self.inner
            .update_report(snapshot, record, expected_version)
            .await
    }

    async fn append_audit(
        &self,
        snapshot: &mut MemorySnapshot,
        record: AuditRecord,
    ) -> Result<AuditRecord, StorageError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("audit log unavailable".into()));
        }
        self.inner.append_audit(snapshot, record).await
    }

    async fn insert_notification(
        &self,
        snapshot: &mut MemorySnapshot,
        record: NotificationRecord,
    ) -> Result<NotificationRecord, StorageError> {
        let injected = self
            .notification_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Backend("notification table locked".into()));
        }
        self.inner.insert_notification(snapshot, record).await
    }

    async fn insert_dead_letter(
        &self,
        snapshot: &mut MemorySnapshot,
        record: DeadLetterRecord,
    ) -> Result<(), StorageError> {
        self.inner.insert_dead_letter(snapshot, record).await
    }

    async fn get_report(&self, report_id: &str) -> Result<ReportRecord, StorageError> {
        self.inner.get_report(report_id).await
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<ReportRecord>, StorageError> {
        self.inner.list_reports(filter).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage, StorageError> {
        self.inner.query_audit(query).await
    }

    async fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
    ) -> Result<Vec<NotificationRecord>, StorageError> {
        self.inner.list_notifications(recipient_id, unread_only).await
    }

    async fn mark_notifications_read(
        &self,
        ids: &[String],
        read_at: OffsetDateTime,
    ) -> Result<usize, StorageError> {
        self.inner.mark_notifications_read(ids, read_at).await
    }

    async fn mark_all_read(
        &self,
        recipient_id: &str,
        before: Option<OffsetDateTime>,
        read_at: OffsetDateTime,
    ) -> Result<usize, StorageError> {
        self.inner.mark_all_read(recipient_id, before, read_at).await
    }

    async fn unread_count(&self, recipient_id: &str) -> Result<usize, StorageError> {
        self.inner.unread_count(recipient_id).await
    }

    async fn list_dead_letters(
        &self,
        pending_only: bool,
    ) -> Result<Vec<DeadLetterRecord>, StorageError> {
        self.inner.list_dead_letters(pending_only).await
    }

    async fn resolve_dead_letter(
        &self,
        id: &str,
        resolved_at: OffsetDateTime,
    ) -> Result<(), StorageError> {
        self.inner.resolve_dead_letter(id, resolved_at).await
    }
}

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

const REPORTER: &str = "citizen-1";

fn reporter() -> Actor {
    Actor::new(REPORTER, Role::Reporter)
}

fn officer(id: &str) -> Actor {
    Actor::new(id, Role::Officer)
}

fn admin() -> Actor {
    Actor::new("admin-1", Role::Admin)
}

fn superadmin() -> Actor {
    Actor::new("root", Role::Superadmin)
}

fn setup() -> (Arc<FaultyStorage>, WorkflowService<FaultyStorage>) {
    let storage = Arc::new(FaultyStorage::default());
    let svc = WorkflowService::new(
        storage.clone(),
        WorkflowPolicy::default(),
        ListingPolicy::default(),
    );
    (storage, svc)
}

async fn submitted(svc: &WorkflowService<FaultyStorage>) -> Report {
    let draft = ReportDraft {
        description: "pothole outside the school gate".into(),
        ..ReportDraft::default()
    };
    svc.create_report(&reporter(), draft, None).await.unwrap()
}

async fn step(
    svc: &WorkflowService<FaultyStorage>,
    report: &Report,
    to: Status,
    actor: &Actor,
    extra: TransitionExtra,
) -> Report {
    svc.apply_transition(&report.id, to, actor, Some(report.version), extra)
        .await
        .unwrap()
}

/// A report assigned to officer `o1`.
async fn assigned(svc: &WorkflowService<FaultyStorage>) -> Report {
    let report = submitted(svc).await;
    let extra = TransitionExtra {
        assigned_officer_ids: Some(vec!["o1".into()]),
        department_id: Some("roads".into()),
        ..TransitionExtra::default()
    };
    step(svc, &report, Status::Assigned, &admin(), extra).await
}

async fn in_progress(svc: &WorkflowService<FaultyStorage>) -> Report {
    let report = assigned(svc).await;
    step(svc, &report, Status::InProgress, &officer("o1"), TransitionExtra::default()).await
}

async fn verified(svc: &WorkflowService<FaultyStorage>) -> Report {
    let report = in_progress(svc).await;
    let extra = TransitionExtra {
        photos_after: vec!["url1".into()],
        ..TransitionExtra::default()
    };
    let report = step(svc, &report, Status::AwaitingVerification, &officer("o1"), extra).await;
    step(svc, &report, Status::Verified, &admin(), TransitionExtra::default()).await
}

async fn history(svc: &WorkflowService<FaultyStorage>, report_id: &str) -> Vec<AuditRecord> {
    svc.audit()
        .query(&AuditQuery {
            report_id: Some(report_id.to_string()),
            limit: 100,
            ..AuditQuery::default()
        })
        .await
        .unwrap()
        .entries
}

async fn notifications_for(
    svc: &WorkflowService<FaultyStorage>,
    report_id: &str,
) -> Vec<NotificationRecord> {
    svc.notifications()
        .list(REPORTER, false)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.report_id == report_id)
        .collect()
}

fn denial_reason(err: WorkflowError) -> DenyReason {
    match err {
        WorkflowError::Denied(denial) => denial.reason,
        other => panic!("expected a denial, got {:?}", other),
    }
}

// ──────────────────────────────────────────────
// Scenarios
// ──────────────────────────────────────────────

#[tokio::test]
async fn officer_cannot_skip_assignment() {
    let (_, svc) = setup();
    let report = submitted(&svc).await;
    let err = svc
        .apply_transition(&report.id, Status::InProgress, &officer("o1"), None, TransitionExtra::default())
        .await
        .unwrap_err();
    assert_eq!(denial_reason(err), DenyReason::InvalidTransition);
}

#[tokio::test]
async fn unassigned_officer_cannot_start_work() {
    let (_, svc) = setup();
    let report = assigned(&svc).await;
    let err = svc
        .apply_transition(&report.id, Status::InProgress, &officer("o2"), None, TransitionExtra::default())
        .await
        .unwrap_err();
    assert_eq!(denial_reason(err), DenyReason::Unauthorized);
}

#[tokio::test]
async fn assigned_officer_cannot_reroute_while_starting_work() {
    let (_, svc) = setup();
    let report = assigned(&svc).await;
    let attempts = [
        TransitionExtra {
            assigned_officer_ids: Some(vec!["o9".into()]),
            ..TransitionExtra::default()
        },
        TransitionExtra {
            assigned_officer_ids: Some(vec![]),
            ..TransitionExtra::default()
        },
        TransitionExtra {
            department_id: Some("parks".into()),
            ..TransitionExtra::default()
        },
    ];
    for extra in attempts {
        let err = svc
            .apply_transition(&report.id, Status::InProgress, &officer("o1"), Some(report.version), extra)
            .await
            .unwrap_err();
        assert_eq!(denial_reason(err), DenyReason::PreconditionFailed);
    }

    let unchanged = svc.get_report(&report.id).await.unwrap();
    assert_eq!(unchanged, report);
    assert_eq!(history(&svc, &report.id).await.len(), 2);
}

#[tokio::test]
async fn blank_after_photo_is_rejected() {
    let (_, svc) = setup();
    let report = in_progress(&svc).await;
    let err = svc
        .apply_transition(
            &report.id,
            Status::AwaitingVerification,
            &officer("o1"),
            None,
            TransitionExtra {
                photos_after: vec!["".into()],
                ..TransitionExtra::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(denial_reason(err), DenyReason::PreconditionFailed);
    let unchanged = svc.get_report(&report.id).await.unwrap();
    assert_eq!(unchanged.status, Status::InProgress);
    assert!(unchanged.photos_after.is_empty());
}

#[tokio::test]
async fn completion_with_photos_audits_and_notifies_reporter() {
    let (_, svc) = setup();
    let report = assigned(&svc).await;
    let with_photo = TransitionExtra {
        photos_after: vec!["url1".into()],
        ..TransitionExtra::default()
    };
    let report = step(&svc, &report, Status::InProgress, &officer("o1"), with_photo).await;
    assert_eq!(report.photos_after, vec!["url1"]);
    let audit_before = history(&svc, &report.id).await.len();
    let notified_before = notifications_for(&svc, &report.id).await.len();

    let done = step(
        &svc,
        &report,
        Status::AwaitingVerification,
        &officer("o1"),
        TransitionExtra::default(),
    )
    .await;
    assert_eq!(done.status, Status::AwaitingVerification);

    let entries = history(&svc, &report.id).await;
    assert_eq!(entries.len(), audit_before + 1);
    assert_eq!(entries[0].action, ACTION_STATUS_CHANGED);
    assert_eq!(entries[0].actor_id, "o1");
    assert_eq!(entries[0].diff["status"].after, json!("awaiting_verification"));

    let notes = notifications_for(&svc, &report.id).await;
    assert_eq!(notes.len(), notified_before + 1);
    assert_eq!(notes[0].notification_type, NotificationType::AwaitingVerification.as_str());
    assert_eq!(notes[0].recipient_id, REPORTER);
    assert_eq!(notes[0].audit_entry_id, entries[0].id);
}

#[tokio::test]
async fn stale_version_after_close_conflicts() {
    let (_, svc) = setup();
    let report = verified(&svc).await;
    let stale = report.version;

    let closed = svc
        .apply_transition(&report.id, Status::Closed, &admin(), Some(stale), TransitionExtra::default())
        .await
        .unwrap();
    assert_eq!(closed.status, Status::Closed);

    let err = svc
        .apply_transition(&report.id, Status::Closed, &admin(), Some(stale), TransitionExtra::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionConflict);
    assert_eq!(svc.get_report(&report.id).await.unwrap().version, closed.version);
}

#[tokio::test]
async fn every_transition_bumps_version_once_and_audits_new_status() {
    let (_, svc) = setup();
    let mut report = submitted(&svc).await;
    let path = [
        (Status::Assigned, admin(), TransitionExtra {
            assigned_officer_ids: Some(vec!["o1".into()]),
            ..TransitionExtra::default()
        }),
        (Status::InProgress, officer("o1"), TransitionExtra::default()),
        (Status::Misrouted, officer("o1"), TransitionExtra {
            misroute_reason: Some("water main, not roads".into()),
            ..TransitionExtra::default()
        }),
        (Status::Assigned, admin(), TransitionExtra {
            assigned_officer_ids: Some(vec!["o3".into()]),
            department_id: Some("water".into()),
            ..TransitionExtra::default()
        }),
        (Status::InProgress, officer("o3"), TransitionExtra::default()),
    ];

    for (to, actor, extra) in path {
        let next = step(&svc, &report, to, &actor, extra).await;
        assert_eq!(next.version, report.version + 1);
        let entries = history(&svc, &report.id).await;
        assert_eq!(entries[0].diff["status"].after, json!(to));
        report = next;
    }
    assert!(report.is_assigned_to("o3"));
    assert!(!report.is_assigned_to("o1"));
    assert_eq!(report.misroute_reason.as_deref(), Some("water main, not roads"));
}

#[tokio::test]
async fn misroute_notifies_with_reason() {
    let (_, svc) = setup();
    let report = in_progress(&svc).await;
    let extra = TransitionExtra {
        misroute_reason: Some("  belongs to parks  ".into()),
        ..TransitionExtra::default()
    };
    step(&svc, &report, Status::Misrouted, &officer("o1"), extra).await;

    let notes = notifications_for(&svc, &report.id).await;
    assert_eq!(notes[0].notification_type, "report.misrouted");
    assert_eq!(notes[0].payload, json!({"reason": "belongs to parks"}));
}

#[tokio::test]
async fn force_close_is_logged_and_flagged() {
    let (_, svc) = setup();
    let report = in_progress(&svc).await;
    step(&svc, &report, Status::Closed, &admin(), TransitionExtra::default()).await;

    assert_eq!(history(&svc, &report.id).await[0].action, ACTION_FORCE_CLOSED);
    let notes = notifications_for(&svc, &report.id).await;
    assert_eq!(notes[0].notification_type, "report.closed");
    assert_eq!(notes[0].payload, json!({"forced": true}));
}

#[tokio::test]
async fn start_of_work_is_an_explicit_no_op_for_notifications() {
    let (_, svc) = setup();
    let report = assigned(&svc).await;
    let before = notifications_for(&svc, &report.id).await.len();
    step(&svc, &report, Status::InProgress, &officer("o1"), TransitionExtra::default()).await;
    assert_eq!(notifications_for(&svc, &report.id).await.len(), before);
}

#[tokio::test]
async fn officer_verification_requires_policy() {
    let storage = Arc::new(FaultyStorage::default());
    let lenient = WorkflowService::new(
        storage,
        WorkflowPolicy {
            officer_may_verify: true,
            ..WorkflowPolicy::default()
        },
        ListingPolicy::default(),
    );
    let (_, strict) = setup();

    for (svc, allowed) in [(&lenient, true), (&strict, false)] {
        let report = in_progress(svc).await;
        let extra = TransitionExtra {
            photos_after: vec!["url1".into()],
            ..TransitionExtra::default()
        };
        let report = step(svc, &report, Status::AwaitingVerification, &officer("o1"), extra).await;
        let result = svc
            .apply_transition(&report.id, Status::Verified, &officer("o1"), None, TransitionExtra::default())
            .await;
        assert_eq!(result.is_ok(), allowed);
    }
}

// ──────────────────────────────────────────────
// Unit of work and failure handling
// ──────────────────────────────────────────────

#[tokio::test]
async fn audit_failure_rolls_back_the_transition() {
    let (storage, svc) = setup();
    let report = submitted(&svc).await;

    storage.fail_audit.store(true, Ordering::SeqCst);
    let err = svc
        .apply_transition(&report.id, Status::Assigned, &admin(), Some(report.version), TransitionExtra::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    storage.fail_audit.store(false, Ordering::SeqCst);

    let stored = svc.get_report(&report.id).await.unwrap();
    assert_eq!(stored.status, Status::Submitted);
    assert_eq!(stored.version, report.version);
    assert_eq!(history(&svc, &report.id).await.len(), 1);
    assert!(notifications_for(&svc, &report.id).await.is_empty());

    // The same request succeeds once the audit log is back.
    step(&svc, &report, Status::Assigned, &admin(), TransitionExtra::default()).await;
}

#[tokio::test]
async fn transient_dispatch_failure_is_retried() {
    let (storage, svc) = setup();
    let report = submitted(&svc).await;

    storage.fail_next_notifications(2);
    step(&svc, &report, Status::Assigned, &admin(), TransitionExtra::default()).await;

    assert_eq!(notifications_for(&svc, &report.id).await.len(), 1);
    assert!(svc.notifications().dead_letters(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_dispatch_keeps_transition_and_queues_dead_letter() {
    let (storage, svc) = setup();
    let report = submitted(&svc).await;

    storage.fail_next_notifications(u32::MAX);
    let err = svc
        .apply_transition(&report.id, Status::Assigned, &admin(), Some(report.version), TransitionExtra::default())
        .await
        .unwrap_err();
    storage.fail_next_notifications(0);

    let (committed, audit_entry_id) = match err {
        WorkflowError::DispatchFailure { report, audit_entry_id, .. } => (report, audit_entry_id),
        other => panic!("expected DispatchFailure, got {:?}", other),
    };
    assert_eq!(committed.status, Status::Assigned);
    assert_eq!(svc.get_report(&report.id).await.unwrap().status, Status::Assigned);
    assert_eq!(history(&svc, &report.id).await[0].id, audit_entry_id);
    assert!(notifications_for(&svc, &report.id).await.is_empty());

    let parked = svc.notifications().dead_letters(true).await.unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].attempts, WorkflowPolicy::default().dispatch_attempts);
    assert_eq!(parked[0].audit_entry_id, audit_entry_id);

    let replay = svc.notifications().redeliver_dead_letters().await.unwrap();
    assert_eq!(replay.redelivered.len(), 1);
    assert!(replay.still_failing.is_empty());

    let notes = notifications_for(&svc, &report.id).await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].audit_entry_id, audit_entry_id);

    // Nothing left to replay, and replaying never duplicates.
    let again = svc.notifications().redeliver_dead_letters().await.unwrap();
    assert!(again.redelivered.is_empty());
    assert_eq!(notifications_for(&svc, &report.id).await.len(), 1);
}

// ──────────────────────────────────────────────
// Delete / restore
// ──────────────────────────────────────────────

#[tokio::test]
async fn restore_returns_report_to_previous_status() {
    let (_, svc) = setup();
    let report = in_progress(&svc).await;
    let deleted = step(&svc, &report, Status::Deleted, &superadmin(), TransitionExtra::default()).await;
    assert_eq!(deleted.status_before_delete, Some(Status::InProgress));
    let notified = notifications_for(&svc, &report.id).await.len();

    let err = svc.restore(&report.id, &admin(), None).await.unwrap_err();
    assert_eq!(denial_reason(err), DenyReason::Unauthorized);

    let restored = svc
        .restore(&report.id, &superadmin(), Some(deleted.version))
        .await
        .unwrap();
    assert_eq!(restored.status, Status::InProgress);
    assert_eq!(restored.version, deleted.version + 1);
    assert_eq!(restored.status_before_delete, None);
    assert_eq!(history(&svc, &report.id).await[0].action, ACTION_RESTORED);
    assert_eq!(notifications_for(&svc, &report.id).await.len(), notified);

    let err = svc.restore(&report.id, &superadmin(), None).await.unwrap_err();
    assert_eq!(denial_reason(err), DenyReason::InvalidTransition);
}

#[tokio::test]
async fn deleted_report_history_stays_queryable() {
    let (_, svc) = setup();
    let report = assigned(&svc).await;
    step(&svc, &report, Status::Deleted, &superadmin(), TransitionExtra::default()).await;

    let entries = history(&svc, &report.id).await;
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].diff["status"].after, json!("submitted"));
}

// ──────────────────────────────────────────────
// Bulk and read state
// ──────────────────────────────────────────────

#[tokio::test]
async fn bulk_collects_ineligible_items() {
    let (_, svc) = setup();
    let a = submitted(&svc).await;
    let b = in_progress(&svc).await;
    let c = submitted(&svc).await;
    let ids = vec![a.id.clone(), b.id.clone(), c.id.clone()];

    let result = svc.bulk_apply(&ids, Status::Assigned, &admin()).await;
    assert_eq!(result.updated, vec![a.id.clone(), c.id.clone()]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].id, b.id);
    assert_eq!(result.failed[0].reason, ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn bulk_counts_dispatch_failures_as_updated() {
    let (storage, svc) = setup();
    let a = submitted(&svc).await;
    storage.fail_next_notifications(u32::MAX);
    let result = svc.bulk_apply(&[a.id.clone()], Status::Assigned, &admin()).await;
    storage.fail_next_notifications(0);

    assert_eq!(result.updated, vec![a.id]);
    assert_eq!(svc.notifications().dead_letters(true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn read_state_tracks_unread_notifications() {
    let (_, svc) = setup();
    let first = assigned(&svc).await;
    let second = assigned(&svc).await;
    step(&svc, &second, Status::Closed, &admin(), TransitionExtra::default()).await;

    let dispatcher = svc.notifications();
    assert_eq!(dispatcher.unread_count(REPORTER).await.unwrap(), 3);

    let first_note = notifications_for(&svc, &first.id).await.remove(0);
    assert_eq!(dispatcher.mark_read(&[first_note.id.clone()]).await.unwrap(), 1);
    assert_eq!(dispatcher.mark_read(&[first_note.id]).await.unwrap(), 0);
    assert_eq!(dispatcher.unread_count(REPORTER).await.unwrap(), 2);

    assert_eq!(dispatcher.mark_all_read(REPORTER, None).await.unwrap(), 2);
    assert_eq!(dispatcher.unread_count(REPORTER).await.unwrap(), 0);
    assert!(dispatcher.list(REPORTER, true).await.unwrap().is_empty());
}
