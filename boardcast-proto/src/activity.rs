//! Activity record types: the immutable audit trail of every mutation.

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictId;
use crate::task::{Timestamp, UserId};

/// What happened. Closed set, keyed by the recorder's description templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    TaskCreated,
    TaskUpdated,
    TaskMoved,
    TaskAssigned,
    TaskUnassigned,
    TaskCommented,
    TaskArchived,
    TaskDeleted,
    ConflictDetected,
    ConflictResolved,
    Login,
    Logout,
    Registered,
    PasswordChanged,
}

impl ActivityAction {
    /// Default category for records of this action.
    #[must_use]
    pub const fn category(self) -> ActivityCategory {
        match self {
            Self::TaskCreated
            | Self::TaskUpdated
            | Self::TaskMoved
            | Self::TaskAssigned
            | Self::TaskUnassigned
            | Self::TaskCommented
            | Self::TaskArchived
            | Self::TaskDeleted => ActivityCategory::Task,
            Self::ConflictDetected | Self::ConflictResolved => ActivityCategory::System,
            Self::Login | Self::Logout | Self::Registered | Self::PasswordChanged => {
                ActivityCategory::Security
            }
        }
    }

    /// Default severity for records of this action.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::TaskDeleted => Severity::High,
            Self::ConflictDetected | Self::ConflictResolved | Self::TaskArchived => {
                Severity::Medium
            }
            _ => Severity::Low,
        }
    }
}

/// Broad grouping of activity records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityCategory {
    Task,
    User,
    System,
    Security,
}

/// Severity of an activity record; the prune command only removes
/// low and medium records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One immutable entry in the activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    /// What happened.
    pub action: ActivityAction,
    /// Who did it.
    pub actor: UserId,
    /// What it happened to (a task id, a user id), if anything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Kind of the target (`"task"`, `"user"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_kind: Option<String>,
    /// Rendered description; consumers never re-derive it from templates.
    pub description: String,
    /// Changed fields before the mutation, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// Changed fields after the mutation, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    /// Broad grouping.
    pub category: ActivityCategory,
    /// Severity, drives retention.
    pub severity: Severity,
    /// Set on conflict records, linking detection and resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<ConflictId>,
    /// `false` for a detected-but-unresolved conflict, `true` otherwise.
    pub is_resolved: bool,
    /// When the record was created.
    pub created_at: Timestamp,
    /// Client address, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Client user agent, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}
