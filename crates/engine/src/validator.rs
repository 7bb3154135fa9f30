//! Transition validator.
//!
//! Pure decision function over the report lifecycle graph. Given a report,
//! a requested status and the acting principal it answers Allow (with the
//! audit action to record) or Deny with an enumerated reason. It never
//! touches storage.
//!
//! Checks run in a fixed order:
//! 1. Edge existence (`InvalidTransition`, independent of role)
//! 2. Role and officer relation (`Unauthorized`)
//! 3. Routing changes: officer set, category and department only move on an
//!    admin's transition into `assigned` (`PreconditionFailed` on other
//!    edges, `Unauthorized` for non-admins)
//! 4. Payload preconditions (`PreconditionFailed`)

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::audit::{
    ACTION_ASSIGNED, ACTION_DELETED, ACTION_FORCE_CLOSED, ACTION_MISROUTED, ACTION_STATUS_CHANGED,
};
use crate::error::{Denial, DenyReason};
use crate::report::{Report, TransitionExtra};
use crate::status::{Actor, Role, Status};

// ──────────────────────────────────────────────
// Transition table
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Source {
    Is(Status),
    AnyNonTerminal,
    /// Every status except `deleted` itself.
    AnyLive,
}

impl Source {
    fn matches(self, status: Status) -> bool {
        match self {
            Source::Is(s) => s == status,
            Source::AnyNonTerminal => !status.is_terminal(),
            Source::AnyLive => status != Status::Deleted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    PhotosAfterRequired,
    MisrouteReasonRequired,
}

#[derive(Debug)]
struct Rule {
    from: Source,
    to: Status,
    roles: &'static [Role],
    /// Officers must be in `assigned_officer_ids`.
    assigned_only: bool,
    /// Officer access additionally requires `officer_may_verify`.
    officer_by_policy: bool,
    precondition: Option<Precondition>,
    action: &'static str,
}

const STAFF: &[Role] = &[Role::Officer, Role::Admin, Role::Superadmin];
const ADMINS: &[Role] = &[Role::Admin, Role::Superadmin];
const SUPERADMIN: &[Role] = &[Role::Superadmin];

/// Rules are tried in order; the first one that authorizes the actor wins.
const RULES: &[Rule] = &[
    Rule {
        from: Source::Is(Status::Submitted),
        to: Status::Assigned,
        roles: STAFF,
        assigned_only: false,
        officer_by_policy: false,
        precondition: None,
        action: ACTION_ASSIGNED,
    },
    Rule {
        from: Source::Is(Status::Submitted),
        to: Status::Deleted,
        roles: ADMINS,
        assigned_only: false,
        officer_by_policy: false,
        precondition: None,
        action: ACTION_DELETED,
    },
    Rule {
        from: Source::Is(Status::Assigned),
        to: Status::InProgress,
        roles: STAFF,
        assigned_only: true,
        officer_by_policy: false,
        precondition: None,
        action: ACTION_STATUS_CHANGED,
    },
    Rule {
        from: Source::Is(Status::InProgress),
        to: Status::AwaitingVerification,
        roles: STAFF,
        assigned_only: true,
        officer_by_policy: false,
        precondition: Some(Precondition::PhotosAfterRequired),
        action: ACTION_STATUS_CHANGED,
    },
    Rule {
        from: Source::Is(Status::InProgress),
        to: Status::Misrouted,
        roles: STAFF,
        assigned_only: true,
        officer_by_policy: false,
        precondition: Some(Precondition::MisrouteReasonRequired),
        action: ACTION_MISROUTED,
    },
    Rule {
        from: Source::Is(Status::Misrouted),
        to: Status::Assigned,
        roles: ADMINS,
        assigned_only: false,
        officer_by_policy: false,
        precondition: None,
        action: ACTION_ASSIGNED,
    },
    Rule {
        from: Source::Is(Status::AwaitingVerification),
        to: Status::Verified,
        roles: STAFF,
        assigned_only: true,
        officer_by_policy: true,
        precondition: None,
        action: ACTION_STATUS_CHANGED,
    },
    Rule {
        from: Source::Is(Status::Verified),
        to: Status::Closed,
        roles: ADMINS,
        assigned_only: false,
        officer_by_policy: false,
        precondition: None,
        action: ACTION_STATUS_CHANGED,
    },
    Rule {
        from: Source::AnyNonTerminal,
        to: Status::Closed,
        roles: ADMINS,
        assigned_only: false,
        officer_by_policy: false,
        precondition: None,
        action: ACTION_FORCE_CLOSED,
    },
    Rule {
        from: Source::AnyLive,
        to: Status::Deleted,
        roles: SUPERADMIN,
        assigned_only: false,
        officer_by_policy: false,
        precondition: None,
        action: ACTION_DELETED,
    },
];

fn rules_for(from: Status, to: Status) -> impl Iterator<Item = &'static Rule> {
    RULES
        .iter()
        .filter(move |rule| rule.to == to && rule.from.matches(from))
}

// ──────────────────────────────────────────────
// Validator
// ──────────────────────────────────────────────

/// An accepted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: Status,
    pub to: Status,
    /// Audit action recorded for this transition.
    pub action: &'static str,
}

/// One edge of the graph as exposed to display layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeSummary {
    pub from: Status,
    pub to: Status,
    pub roles: Vec<Role>,
    pub assigned_officer_only: bool,
    pub preconditions: Vec<Precondition>,
}

#[derive(Debug, Clone, Default)]
pub struct TransitionValidator {
    officer_may_verify: bool,
}

impl TransitionValidator {
    pub fn new(officer_may_verify: bool) -> Self {
        Self { officer_may_verify }
    }

    /// Decide whether `actor` may move `report` to `to`.
    pub fn validate(
        &self,
        report: &Report,
        to: Status,
        actor: &Actor,
        extra: &TransitionExtra,
    ) -> Result<TransitionPlan, Denial> {
        let from = report.status;
        let mut candidates = rules_for(from, to).peekable();
        if candidates.peek().is_none() {
            return Err(Denial::new(
                DenyReason::InvalidTransition,
                format!("no transition from {} to {}", from, to),
            ));
        }

        let rule = candidates
            .find(|rule| self.authorizes(rule, report, actor))
            .ok_or_else(|| {
                Denial::new(
                    DenyReason::Unauthorized,
                    format!(
                        "{} '{}' may not move report {} from {} to {}",
                        actor.role, actor.id, report.id, from, to
                    ),
                )
            })?;

        check_routing(report, to, actor, extra)?;
        if extra.has_blank_photo() {
            return Err(Denial::new(
                DenyReason::PreconditionFailed,
                "after-photo URLs must not be blank",
            ));
        }
        if let Some(precondition) = rule.precondition {
            check_precondition(precondition, report, extra)?;
        }

        Ok(TransitionPlan {
            from,
            to,
            action: rule.action,
        })
    }

    /// Statuses `actor` could move `report` to, ignoring payload
    /// preconditions. Display layers use this instead of re-implementing
    /// the rules.
    pub fn allowed_targets(&self, report: &Report, actor: &Actor) -> Vec<Status> {
        Status::ALL
            .into_iter()
            .filter(|&to| rules_for(report.status, to).any(|rule| self.authorizes(rule, report, actor)))
            .collect()
    }

    /// Restore is not a transition: superadmin only, deleted reports only.
    /// Returns the status the report goes back to.
    pub fn validate_restore(&self, report: &Report, actor: &Actor) -> Result<Status, Denial> {
        if report.status != Status::Deleted {
            return Err(Denial::new(
                DenyReason::InvalidTransition,
                format!("report {} is {}, only deleted reports can be restored", report.id, report.status),
            ));
        }
        if actor.role != Role::Superadmin {
            return Err(Denial::new(
                DenyReason::Unauthorized,
                format!("{} '{}' may not restore reports", actor.role, actor.id),
            ));
        }
        Ok(report.status_before_delete.unwrap_or(Status::Submitted))
    }

    /// Who may file a report, and on whose behalf. Returns the reporter id.
    pub fn authorize_creation(
        &self,
        actor: &Actor,
        on_behalf_of: Option<&str>,
    ) -> Result<String, Denial> {
        match (actor.role, on_behalf_of) {
            (Role::Reporter, None) => Ok(actor.id.clone()),
            (Role::Reporter, Some(id)) if id == actor.id => Ok(actor.id.clone()),
            (Role::Reporter, Some(_)) => Err(Denial::new(
                DenyReason::Unauthorized,
                "reporters may only file reports for themselves",
            )),
            (Role::Admin | Role::Superadmin, target) => {
                Ok(target.unwrap_or(actor.id.as_str()).to_string())
            }
            (Role::Officer, _) => Err(Denial::new(
                DenyReason::Unauthorized,
                format!("officer '{}' may not file reports", actor.id),
            )),
        }
    }

    /// Source → set of targets, over every edge that exists for some role.
    pub fn edges() -> BTreeMap<Status, BTreeSet<Status>> {
        let mut edges = BTreeMap::new();
        for from in Status::ALL {
            let targets: BTreeSet<Status> = Status::ALL
                .into_iter()
                .filter(|&to| rules_for(from, to).next().is_some())
                .collect();
            edges.insert(from, targets);
        }
        edges
    }

    /// Every edge with the union of roles that may take it under this
    /// validator's policy.
    pub fn transition_table(&self) -> Vec<EdgeSummary> {
        let mut table = Vec::new();
        for (from, targets) in Self::edges() {
            for to in targets {
                let mut roles = Vec::new();
                let mut assigned_officer_only = false;
                let mut preconditions = Vec::new();
                for rule in rules_for(from, to) {
                    for &role in rule.roles {
                        if role == Role::Officer && rule.officer_by_policy && !self.officer_may_verify {
                            continue;
                        }
                        if role == Role::Officer && rule.assigned_only {
                            assigned_officer_only = true;
                        }
                        if !roles.contains(&role) {
                            roles.push(role);
                        }
                    }
                    if let Some(p) = rule.precondition {
                        preconditions.push(p);
                    }
                }
                table.push(EdgeSummary {
                    from,
                    to,
                    roles,
                    assigned_officer_only,
                    preconditions,
                });
            }
        }
        table
    }

    fn authorizes(&self, rule: &Rule, report: &Report, actor: &Actor) -> bool {
        if !rule.roles.contains(&actor.role) {
            return false;
        }
        if actor.role != Role::Officer {
            return true;
        }
        if rule.officer_by_policy && !self.officer_may_verify {
            return false;
        }
        !rule.assigned_only || report.is_assigned_to(&actor.id)
    }
}

/// Officer set, category and department only change on the way into
/// `assigned`, and only at an administrator's hand. Officers claim
/// unassigned reports implicitly instead.
fn check_routing(
    report: &Report,
    to: Status,
    actor: &Actor,
    extra: &TransitionExtra,
) -> Result<(), Denial> {
    if !extra.changes_routing() {
        return Ok(());
    }
    if to != Status::Assigned {
        return Err(Denial::new(
            DenyReason::PreconditionFailed,
            format!(
                "officers, category and department can only change on a transition to assigned, not {} -> {}",
                report.status, to
            ),
        ));
    }
    if !actor.role.is_administrative() {
        return Err(Denial::new(
            DenyReason::Unauthorized,
            format!("{} '{}' may not change the routing of report {}", actor.role, actor.id, report.id),
        ));
    }
    Ok(())
}

fn check_precondition(
    precondition: Precondition,
    report: &Report,
    extra: &TransitionExtra,
) -> Result<(), Denial> {
    match precondition {
        Precondition::PhotosAfterRequired => {
            let has_photo = report
                .photos_after
                .iter()
                .chain(&extra.photos_after)
                .any(|url| !url.trim().is_empty());
            if !has_photo {
                return Err(Denial::new(
                    DenyReason::PreconditionFailed,
                    "at least one after-photo is required before verification",
                ));
            }
        }
        Precondition::MisrouteReasonRequired => {
            if extra.misroute_reason().is_none() {
                return Err(Denial::new(
                    DenyReason::PreconditionFailed,
                    "a non-empty misroute reason is required",
                ));
            }
        }
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
