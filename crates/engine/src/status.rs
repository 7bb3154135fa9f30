//! Closed status and role types, and the acting principal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Submitted,
    Assigned,
    InProgress,
    AwaitingVerification,
    Misrouted,
    Verified,
    Closed,
    Deleted,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::Submitted,
        Status::Assigned,
        Status::InProgress,
        Status::AwaitingVerification,
        Status::Misrouted,
        Status::Verified,
        Status::Closed,
        Status::Deleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Submitted => "submitted",
            Status::Assigned => "assigned",
            Status::InProgress => "in_progress",
            Status::AwaitingVerification => "awaiting_verification",
            Status::Misrouted => "misrouted",
            Status::Verified => "verified",
            Status::Closed => "closed",
            Status::Deleted => "deleted",
        }
    }

    /// Terminal statuses have no workflow edges of their own.
    pub fn is_terminal(self) -> bool {
        match self {
            Status::Closed | Status::Deleted => true,
            Status::Submitted
            | Status::Assigned
            | Status::InProgress
            | Status::AwaitingVerification
            | Status::Misrouted
            | Status::Verified => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised status or role string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Status {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseError {
                kind: "status",
                value: s.to_string(),
            })
    }
}

/// Role of the acting principal, as supplied by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reporter,
    Officer,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Reporter => "reporter",
            Role::Officer => "officer",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }

    /// Admins and superadmins.
    pub fn is_administrative(self) -> bool {
        matches!(self, Role::Admin | Role::Superadmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reporter" => Ok(Role::Reporter),
            "officer" => Ok(Role::Officer),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::Superadmin),
            other => Err(ParseError {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// The authenticated principal performing an operation.
///
/// Always passed explicitly; the engine holds no ambient actor state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}
