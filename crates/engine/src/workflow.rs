//! Workflow service: the façade every mutation goes through.
//!
//! `apply_transition` is the only path that changes a report's status. It
//! loads the report, checks the caller's expected version, asks the
//! validator, then writes the updated report and its audit entry in one
//! storage snapshot. Notifications are created after that snapshot commits,
//! idempotently per audit entry; if they cannot be created the transition
//! stays committed, a dead letter is queued and `DispatchFailure` is
//! returned.

use std::sync::Arc;

use civic_storage::{ReportFilter, ReportStorage};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::audit::{creation_diff, diff_reports, AuditEntry, AuditRecorder, ACTION_CREATED, ACTION_RESTORED};
use crate::collab::Classification;
use crate::error::WorkflowError;
use crate::intake::{self, ReportDraft};
use crate::notify::{NotificationDispatcher, PendingNotification};
use crate::policy::{ListingPolicy, WorkflowPolicy};
use crate::registry::NotificationType;
use crate::report::{Report, TransitionExtra};
use crate::status::{Actor, Status};
use crate::validator::{TransitionPlan, TransitionValidator};

/// Filters for listing reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReportQuery {
    pub status: Option<Status>,
    pub reporter_id: Option<String>,
    pub officer_id: Option<String>,
}

pub struct WorkflowService<S> {
    storage: Arc<S>,
    validator: TransitionValidator,
    audit: AuditRecorder<S>,
    notifications: NotificationDispatcher<S>,
    policy: WorkflowPolicy,
    listing: ListingPolicy,
}

impl<S: ReportStorage> WorkflowService<S> {
    pub fn new(storage: Arc<S>, policy: WorkflowPolicy, listing: ListingPolicy) -> Self {
        Self {
            validator: TransitionValidator::new(policy.officer_may_verify),
            audit: AuditRecorder::new(storage.clone()),
            notifications: NotificationDispatcher::new(storage.clone(), policy.dispatch_attempts),
            storage,
            policy,
            listing,
        }
    }

    pub fn validator(&self) -> &TransitionValidator {
        &self.validator
    }

    pub fn audit(&self) -> &AuditRecorder<S> {
        &self.audit
    }

    pub fn notifications(&self) -> &NotificationDispatcher<S> {
        &self.notifications
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub async fn get_report(&self, report_id: &str) -> Result<Report, WorkflowError> {
        Report::from_record(self.storage.get_report(report_id).await?)
    }

    /// Reports matching `query`, oldest first. Deleted reports only appear
    /// when the listing policy includes them or the query asks for them.
    pub async fn list_reports(&self, query: &ReportQuery) -> Result<Vec<Report>, WorkflowError> {
        let mut filter = ReportFilter {
            status: query.status.map(|s| s.as_str().to_string()),
            reporter_id: query.reporter_id.clone(),
            officer_id: query.officer_id.clone(),
            exclude_statuses: Vec::new(),
        };
        if !self.listing.include_deleted && query.status != Some(Status::Deleted) {
            filter.exclude_statuses.push(Status::Deleted.as_str().to_string());
        }
        self.storage
            .list_reports(&filter)
            .await?
            .into_iter()
            .map(Report::from_record)
            .collect()
    }

    /// Statuses `actor` may currently move the report to.
    pub async fn allowed_transitions(
        &self,
        report_id: &str,
        actor: &Actor,
    ) -> Result<Vec<Status>, WorkflowError> {
        let report = self.get_report(report_id).await?;
        Ok(self.validator.allowed_targets(&report, actor))
    }

    /// File a new report in `submitted`.
    pub async fn create_report(
        &self,
        actor: &Actor,
        draft: ReportDraft,
        classification: Option<&Classification>,
    ) -> Result<Report, WorkflowError> {
        let reporter_id = self
            .validator
            .authorize_creation(actor, draft.reporter_id.as_deref())?;
        let report = intake::build_report(
            uuid::Uuid::new_v4().to_string(),
            reporter_id,
            draft,
            classification,
            self.policy.classifier_min_confidence,
            OffsetDateTime::now_utc(),
        )?;

        let mut snapshot = self.storage.begin_snapshot().await?;
        let staged = self.stage_creation(&mut snapshot, &report, actor).await;
        self.finish(snapshot, staged).await?;

        info!(
            report_id = %report.id,
            reporter_id = %report.reporter_id,
            actor_id = %actor.id,
            "report created"
        );
        Ok(report)
    }

    /// Move a report to `to`.
    ///
    /// `expected_version`, when given, must equal the stored version.
    /// Returns the updated report, or `DispatchFailure` carrying it when the
    /// transition committed but its notifications could not be created.
    pub async fn apply_transition(
        &self,
        report_id: &str,
        to: Status,
        actor: &Actor,
        expected_version: Option<i64>,
        extra: TransitionExtra,
    ) -> Result<Report, WorkflowError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let staged = self
            .stage_transition(&mut snapshot, report_id, to, actor, expected_version, &extra)
            .await;
        let (report, plan, entry) = self.finish(snapshot, staged).await?;

        info!(
            report_id = %report.id,
            from = %plan.from,
            to = %plan.to,
            action = plan.action,
            actor_id = %actor.id,
            version = report.version,
            "transition applied"
        );

        self.notify(&report, plan.from, &entry).await?;
        Ok(report)
    }

    /// Bring a soft-deleted report back to the status it held before deletion.
    pub async fn restore(
        &self,
        report_id: &str,
        actor: &Actor,
        expected_version: Option<i64>,
    ) -> Result<Report, WorkflowError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let staged = self
            .stage_restore(&mut snapshot, report_id, actor, expected_version)
            .await;
        let report = self.finish(snapshot, staged).await?;

        info!(
            report_id = %report.id,
            status = %report.status,
            actor_id = %actor.id,
            "report restored"
        );
        Ok(report)
    }

    // ── Staging (inside a snapshot) ───────────────────────────────────────────

    async fn load_for_update(
        &self,
        snapshot: &mut S::Snapshot,
        report_id: &str,
        expected_version: Option<i64>,
    ) -> Result<Report, WorkflowError> {
        let current = Report::from_record(
            self.storage
                .get_report_for_update(snapshot, report_id)
                .await?,
        )?;
        if let Some(expected) = expected_version {
            if expected != current.version {
                debug!(
                    report_id,
                    expected,
                    actual = current.version,
                    "stale expected version"
                );
                return Err(WorkflowError::VersionConflict {
                    report_id: report_id.to_string(),
                    expected,
                });
            }
        }
        Ok(current)
    }

    async fn stage_creation(
        &self,
        snapshot: &mut S::Snapshot,
        report: &Report,
        actor: &Actor,
    ) -> Result<(), WorkflowError> {
        self.storage
            .insert_report(snapshot, report.to_record())
            .await?;
        self.audit
            .append(
                snapshot,
                &report.id,
                actor,
                ACTION_CREATED,
                creation_diff(report),
                report.created_at,
            )
            .await?;
        Ok(())
    }

    async fn stage_transition(
        &self,
        snapshot: &mut S::Snapshot,
        report_id: &str,
        to: Status,
        actor: &Actor,
        expected_version: Option<i64>,
        extra: &TransitionExtra,
    ) -> Result<(Report, TransitionPlan, AuditEntry), WorkflowError> {
        let current = self
            .load_for_update(snapshot, report_id, expected_version)
            .await?;

        let plan = self
            .validator
            .validate(&current, to, actor, extra)
            .map_err(|denial| {
                debug!(
                    report_id,
                    from = %current.status,
                    to = %to,
                    actor_id = %actor.id,
                    reason = %denial.reason,
                    "transition denied"
                );
                WorkflowError::from(denial)
            })?;

        let now = OffsetDateTime::now_utc();
        let mut next = current.transitioned(&plan, actor, extra, now);
        let diff = diff_reports(&current, &next);
        next.version = self
            .storage
            .update_report(snapshot, next.to_record(), current.version)
            .await?;
        let entry = self
            .audit
            .append(snapshot, &next.id, actor, plan.action, diff, now)
            .await?;
        Ok((next, plan, entry))
    }

    async fn stage_restore(
        &self,
        snapshot: &mut S::Snapshot,
        report_id: &str,
        actor: &Actor,
        expected_version: Option<i64>,
    ) -> Result<Report, WorkflowError> {
        let current = self
            .load_for_update(snapshot, report_id, expected_version)
            .await?;
        let target = self.validator.validate_restore(&current, actor)?;

        let now = OffsetDateTime::now_utc();
        let mut next = current.clone();
        next.status = target;
        next.status_before_delete = None;
        next.updated_at = now;
        let diff = diff_reports(&current, &next);
        next.version = self
            .storage
            .update_report(snapshot, next.to_record(), current.version)
            .await?;
        self.audit
            .append(snapshot, &next.id, actor, ACTION_RESTORED, diff, now)
            .await?;
        Ok(next)
    }

    /// Commit the snapshot if staging succeeded, otherwise abort it.
    async fn finish<T>(
        &self,
        snapshot: S::Snapshot,
        staged: Result<T, WorkflowError>,
    ) -> Result<T, WorkflowError> {
        match staged {
            Ok(value) => {
                if let Err(e) = self.storage.commit_snapshot(snapshot).await {
                    warn!(error = %e, "commit failed, nothing applied");
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = self.storage.abort_snapshot(snapshot).await {
                    warn!(error = %abort, "abort failed");
                }
                if matches!(e, WorkflowError::Storage(_)) {
                    warn!(error = %e, "storage failure, snapshot rolled back");
                }
                Err(e)
            }
        }
    }

    // ── Notifications (after commit) ──────────────────────────────────────────

    async fn notify(&self, report: &Report, from: Status, entry: &AuditEntry) -> Result<(), WorkflowError> {
        let Some(notification_type) = NotificationType::for_transition(report.status) else {
            debug!(report_id = %report.id, status = %report.status, "no notification for this transition");
            return Ok(());
        };

        let payload = notification_type.payload(report, from);
        let mut failures = Vec::new();
        for recipient_id in notification_type.recipients(report) {
            let pending = PendingNotification {
                notification_type,
                recipient_id,
                report_id: report.id.clone(),
                audit_entry_id: entry.id.clone(),
                payload: payload.clone(),
            };
            let Err((cause, attempts)) = self.notifications.dispatch_with_retry(&pending).await else {
                continue;
            };

            error!(
                report_id = %report.id,
                audit_entry_id = %entry.id,
                notification_type = %notification_type,
                recipient_id = %pending.recipient_id,
                attempts,
                error = %cause,
                "transition committed but notification could not be created"
            );
            match self.notifications.dead_letter(&pending, &cause, attempts).await {
                Ok(dead_letter) => {
                    warn!(dead_letter_id = %dead_letter.id, "notification queued for redelivery");
                    failures.push(cause.to_string());
                }
                Err(e) => {
                    error!(
                        report_id = %report.id,
                        audit_entry_id = %entry.id,
                        error = %e,
                        "dead letter could not be stored"
                    );
                    failures.push(format!("{}; dead letter not stored: {}", cause, e));
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }
        Err(WorkflowError::DispatchFailure {
            report: Box::new(report.clone()),
            audit_entry_id: entry.id.clone(),
            message: failures.join("; "),
        })
    }
}
