//! Closed notification type registry.
//!
//! The only place a transition is mapped to a notification type, its
//! recipients and its payload. Display layers may mirror the registry for
//! formatting but it stays the source of truth; an unknown type string is
//! an error here, never a silent fallback.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::WorkflowError;
use crate::report::Report;
use crate::status::Status;

/// Bumped whenever a type is added or a payload shape changes.
pub const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationType {
    #[serde(rename = "report.assigned")]
    Assigned,
    #[serde(rename = "report.misrouted")]
    Misrouted,
    #[serde(rename = "report.awaiting_verification")]
    AwaitingVerification,
    #[serde(rename = "report.verified")]
    Verified,
    #[serde(rename = "report.closed")]
    Closed,
}

/// Who receives a notification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Reporter,
}

/// A registry row as exposed to display layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub trigger: Status,
    pub audience: Audience,
}

impl NotificationType {
    pub const ALL: [NotificationType; 5] = [
        NotificationType::Assigned,
        NotificationType::Misrouted,
        NotificationType::AwaitingVerification,
        NotificationType::Verified,
        NotificationType::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::Assigned => "report.assigned",
            NotificationType::Misrouted => "report.misrouted",
            NotificationType::AwaitingVerification => "report.awaiting_verification",
            NotificationType::Verified => "report.verified",
            NotificationType::Closed => "report.closed",
        }
    }

    /// The notification a transition into `to` produces, if any.
    ///
    /// `None` is an explicit no-op: the transition is complete without
    /// notifying anyone.
    pub fn for_transition(to: Status) -> Option<NotificationType> {
        match to {
            Status::Assigned => Some(NotificationType::Assigned),
            Status::Misrouted => Some(NotificationType::Misrouted),
            Status::AwaitingVerification => Some(NotificationType::AwaitingVerification),
            Status::Verified => Some(NotificationType::Verified),
            Status::Closed => Some(NotificationType::Closed),
            Status::Submitted | Status::InProgress | Status::Deleted => None,
        }
    }

    pub fn trigger(self) -> Status {
        match self {
            NotificationType::Assigned => Status::Assigned,
            NotificationType::Misrouted => Status::Misrouted,
            NotificationType::AwaitingVerification => Status::AwaitingVerification,
            NotificationType::Verified => Status::Verified,
            NotificationType::Closed => Status::Closed,
        }
    }

    pub fn audience(self) -> Audience {
        match self {
            NotificationType::Assigned
            | NotificationType::Misrouted
            | NotificationType::AwaitingVerification
            | NotificationType::Verified
            | NotificationType::Closed => Audience::Reporter,
        }
    }

    pub fn recipients(self, report: &Report) -> Vec<String> {
        match self.audience() {
            Audience::Reporter => vec![report.reporter_id.clone()],
        }
    }

    /// Type-specific payload, built from the report after the transition.
    pub fn payload(self, report: &Report, from: Status) -> Value {
        match self {
            NotificationType::Assigned => json!({
                "officer_ids": report.assigned_officer_ids,
                "department_id": report.department_id,
            }),
            NotificationType::Misrouted => json!({
                "reason": report.misroute_reason,
            }),
            NotificationType::AwaitingVerification => json!({
                "photos_after": report.photos_after,
            }),
            NotificationType::Verified => json!({}),
            NotificationType::Closed => json!({
                "forced": from != Status::Verified,
            }),
        }
    }

    /// Human-readable message for a stored payload.
    pub fn format(self, payload: &Value) -> String {
        match self {
            NotificationType::Assigned => {
                let officers = payload
                    .get("officer_ids")
                    .and_then(|v| v.as_array())
                    .map(|a| a.len())
                    .unwrap_or(0);
                match officers {
                    0 => "Your report has been assigned".to_string(),
                    1 => "Your report has been assigned to an officer".to_string(),
                    n => format!("Your report has been assigned to {} officers", n),
                }
            }
            NotificationType::Misrouted => match payload.get("reason").and_then(|v| v.as_str()) {
                Some(reason) => format!("Your report is being rerouted: {}", reason),
                None => "Your report is being rerouted".to_string(),
            },
            NotificationType::AwaitingVerification => {
                "Work on your report is finished and awaiting verification".to_string()
            }
            NotificationType::Verified => "The fix for your report has been verified".to_string(),
            NotificationType::Closed => {
                if payload.get("forced").and_then(|v| v.as_bool()) == Some(true) {
                    "Your report was closed by an administrator".to_string()
                } else {
                    "Your report has been resolved and closed".to_string()
                }
            }
        }
    }

    pub fn entry(self) -> RegistryEntry {
        RegistryEntry {
            notification_type: self,
            trigger: self.trigger(),
            audience: self.audience(),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| WorkflowError::UnknownNotificationType(s.to_string()))
    }
}

/// Format a stored notification by its type string.
pub fn format_notification(notification_type: &str, payload: &Value) -> Result<String, WorkflowError> {
    Ok(notification_type.parse::<NotificationType>()?.format(payload))
}

/// All registry rows, in declaration order.
pub fn entries() -> Vec<RegistryEntry> {
    NotificationType::ALL.into_iter().map(NotificationType::entry).collect()
}
