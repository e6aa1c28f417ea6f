//! Task data model for the Boardcast protocol.
//!
//! Defines the task record shared between server and clients, the input and
//! patch shapes used by mutation commands, and the validation limits the
//! server enforces. All types serialize to camelCase JSON.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// Maximum allowed task description length in characters.
pub const MAX_DESCRIPTION_LEN: usize = 1000;

/// Maximum number of tags on a task.
pub const MAX_TAGS: usize = 10;

/// Maximum allowed tag length in characters.
pub const MAX_TAG_LEN: usize = 50;

/// Maximum allowed comment length in characters.
pub const MAX_COMMENT_LEN: usize = 500;

/// Titles that collide with column names, rejected case-insensitively.
pub const RESERVED_TITLES: [&str; 3] = ["todo", "in progress", "done"];

/// Unique identifier for a task, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a user, issued by the external user directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wraps an externally issued user identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns this timestamp moved back by the given number of milliseconds,
    /// saturating at the epoch.
    #[must_use]
    pub const fn saturating_sub_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_sub(millis))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Board column a task lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not started.
    #[default]
    #[serde(rename = "todo")]
    Todo,
    /// Actively being worked on.
    #[serde(rename = "in-progress")]
    InProgress,
    /// Finished.
    #[serde(rename = "done")]
    Done,
}

impl TaskStatus {
    /// All columns in board order.
    pub const ALL: [Self; 3] = [Self::Todo, Self::InProgress, Self::Done];
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => write!(f, "todo"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

/// A comment on a task. Comments are append-only and orthogonal to the
/// version-checked fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Who wrote the comment.
    pub author: UserId,
    /// Comment body.
    pub text: String,
    /// When the comment was added.
    pub created_at: Timestamp,
}

/// A task on the board.
///
/// `version` starts at 1 and is bumped on every successful state-changing
/// mutation (update, move, assign, archive, sibling renumbering). Comment
/// additions do not bump it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier (UUID v7, time-ordered).
    pub id: TaskId,
    /// Title, unique case-insensitively among non-archived tasks.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Which column the task is in.
    pub status: TaskStatus,
    /// Priority level.
    pub priority: Priority,
    /// Current assignee, if any. Always an active user when set.
    #[serde(default)]
    pub assigned_to: Option<UserId>,
    /// Who created the task. Immutable.
    pub created_by: UserId,
    /// Optional due date. Must be in the future when written.
    #[serde(default)]
    pub due_date: Option<Timestamp>,
    /// Tag set: sorted, deduplicated.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ordinal within the task's column. Columns hold positions `0..n-1`.
    pub position: u32,
    /// Monotonic version counter; the basis for conflict detection.
    pub version: u64,
    /// When the task was created.
    pub created_at: Timestamp,
    /// When the task last changed.
    pub last_modified_at: Timestamp,
    /// Who last changed the task.
    pub last_modified_by: UserId,
    /// Soft-delete flag. Archived tasks are invisible to list/get.
    #[serde(default)]
    pub is_archived: bool,
    /// When the task was archived.
    #[serde(default)]
    pub archived_at: Option<Timestamp>,
    /// Who archived the task.
    #[serde(default)]
    pub archived_by: Option<UserId>,
    /// Ordered comment thread.
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// Input shape for `task.create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub assigned_to: Option<UserId>,
    #[serde(default)]
    pub due_date: Option<Timestamp>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Patch shape for `task.update`.
///
/// An absent field means "unchanged". For the two clearable fields
/// (`assignedTo`, `dueDate`) an explicit JSON `null` means "clear", which
/// the double `Option` distinguishes from absence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub assigned_to: Option<Option<UserId>>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<Timestamp>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Deserializes a field so that a present JSON `null` becomes `Some(None)`
/// (clear the value) while an absent field stays `None` (leave unchanged).
fn present_or_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TaskPatch {
    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assigned_to.is_none()
            && self.due_date.is_none()
            && self.tags.is_none()
    }
}

/// Returns `true` if the title equals a reserved column name, case-folded.
#[must_use]
pub fn is_reserved_title(title: &str) -> bool {
    let folded = title.trim().to_lowercase();
    RESERVED_TITLES.iter().any(|r| *r == folded)
}
