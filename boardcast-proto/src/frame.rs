//! Wire frames for the Boardcast protocol.
//!
//! Every message on the WebSocket is a JSON text frame of the shape
//! `{ "type": "<kind>", "id": "<optional correlation id>", "data": {...} }`.
//! Client-to-server kinds are [`ClientCommand`]; server-to-client kinds are
//! [`ServerEvent`]. Server-initiated frames omit `id`; a reply to a command
//! echoes the command's `id`.

use serde::{Deserialize, Serialize};

use crate::activity::ActivityRecord;
use crate::conflict::{ConflictId, ResolutionStrategy};
use crate::error::ErrorData;
use crate::task::{Comment, Priority, Task, TaskId, TaskInput, TaskPatch, TaskStatus, UserId};

/// Kinds of rooms a session can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// The singleton board room; every session is a member.
    Board,
    /// A per-task detail room.
    Task,
    /// A per-user room, joined automatically at handshake.
    User,
    /// The activity feed room.
    Activity,
}

/// Reference to a room in `room.join` / `room.leave`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_kind: RoomKind,
    /// Task or user id; absent for `board` and `activity`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Filter for `task.list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Tasks grouped by column, each sorted by `(position asc, createdAt desc)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub todo: Vec<Task>,
    #[serde(rename = "in-progress")]
    pub in_progress: Vec<Task>,
    pub done: Vec<Task>,
}

/// Position/version change of a sibling task during a move, delete, or
/// archive, carried on the corresponding event so clients re-render without
/// refetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reposition {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub position: u32,
    pub version: u64,
}

/// Client-to-server message kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Handshake. Must be the first frame on the connection.
    #[serde(rename = "auth")]
    Auth { token: String },

    #[serde(rename = "room.join")]
    RoomJoin(RoomRef),
    #[serde(rename = "room.leave")]
    RoomLeave(RoomRef),

    #[serde(rename = "edit.start")]
    #[serde(rename_all = "camelCase")]
    EditStart { task_id: TaskId, known_version: u64 },
    #[serde(rename = "edit.end")]
    #[serde(rename_all = "camelCase")]
    EditEnd { task_id: TaskId },

    #[serde(rename = "typing")]
    #[serde(rename_all = "camelCase")]
    Typing { task_id: TaskId, is_typing: bool },
    #[serde(rename = "cursor")]
    #[serde(rename_all = "camelCase")]
    Cursor { task_id: TaskId, position: u32 },

    #[serde(rename = "conflict.resolve")]
    #[serde(rename_all = "camelCase")]
    ConflictResolve {
        task_id: TaskId,
        conflict_id: ConflictId,
        strategy: ResolutionStrategy,
    },

    #[serde(rename = "task.list")]
    TaskList(TaskFilter),
    #[serde(rename = "task.create")]
    TaskCreate(TaskInput),
    #[serde(rename = "task.update")]
    #[serde(rename_all = "camelCase")]
    TaskUpdate {
        task_id: TaskId,
        patch: TaskPatch,
        #[serde(default)]
        known_version: Option<u64>,
    },
    #[serde(rename = "task.move")]
    #[serde(rename_all = "camelCase")]
    TaskMove {
        task_id: TaskId,
        to_status: TaskStatus,
        to_position: u32,
        known_version: u64,
    },
    #[serde(rename = "task.assign")]
    #[serde(rename_all = "camelCase")]
    TaskAssign {
        task_id: TaskId,
        #[serde(default)]
        assignee_id: Option<UserId>,
        known_version: u64,
    },
    #[serde(rename = "task.smartAssign")]
    #[serde(rename_all = "camelCase")]
    TaskSmartAssign { task_id: TaskId, known_version: u64 },
    #[serde(rename = "task.comment")]
    #[serde(rename_all = "camelCase")]
    TaskComment { task_id: TaskId, text: String },
    #[serde(rename = "task.archive")]
    #[serde(rename_all = "camelCase")]
    TaskArchive { task_id: TaskId },
    #[serde(rename = "task.delete")]
    #[serde(rename_all = "camelCase")]
    TaskDelete { task_id: TaskId },

    #[serde(rename = "activity.recent")]
    ActivityRecent {},
    /// Admin only: prune old low/medium activity records from the sink.
    #[serde(rename = "activity.prune")]
    ActivityPrune {
        #[serde(default)]
        days: Option<u32>,
    },
}

/// Server-to-client message kinds: command replies and room broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Handshake reply. Never broadcast.
    #[serde(rename = "session.ready")]
    #[serde(rename_all = "camelCase")]
    SessionReady { session_id: String, user_id: UserId },

    #[serde(rename = "task.list")]
    TaskList(BoardSnapshot),

    #[serde(rename = "task.created")]
    TaskCreated { task: Task },
    #[serde(rename = "task.updated")]
    TaskUpdated {
        task: Task,
        /// Changed fields before the mutation.
        before: serde_json::Value,
        /// Changed fields after the mutation.
        after: serde_json::Value,
        /// Siblings renumbered when the patch changed the status column.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        repositioned: Vec<Reposition>,
    },
    #[serde(rename = "task.moved")]
    #[serde(rename_all = "camelCase")]
    TaskMoved {
        task: Task,
        from_status: TaskStatus,
        to_status: TaskStatus,
        repositioned: Vec<Reposition>,
    },
    #[serde(rename = "task.assigned")]
    TaskAssigned { task: Task, assignee: UserId },
    #[serde(rename = "task.unassigned")]
    TaskUnassigned { task: Task },
    #[serde(rename = "task.commented")]
    TaskCommented { task: Task, comment: Comment },
    #[serde(rename = "task.archived")]
    TaskArchived { task: Task, repositioned: Vec<Reposition> },
    #[serde(rename = "task.deleted")]
    #[serde(rename_all = "camelCase")]
    TaskDeleted {
        task_id: TaskId,
        repositioned: Vec<Reposition>,
    },

    #[serde(rename = "edit.started")]
    #[serde(rename_all = "camelCase")]
    EditStarted { task_id: TaskId, editor: UserId },
    #[serde(rename = "edit.ended")]
    #[serde(rename_all = "camelCase")]
    EditEnded { task_id: TaskId, editor: UserId },
    #[serde(rename = "edit.contended")]
    #[serde(rename_all = "camelCase")]
    EditContended {
        task_id: TaskId,
        other_editor: UserId,
    },

    #[serde(rename = "typing")]
    #[serde(rename_all = "camelCase")]
    Typing {
        task_id: TaskId,
        user: UserId,
        is_typing: bool,
    },
    #[serde(rename = "cursor")]
    #[serde(rename_all = "camelCase")]
    Cursor {
        task_id: TaskId,
        user: UserId,
        position: u32,
    },

    /// Distinct users currently connected, sent to the board room whenever
    /// presence changes.
    #[serde(rename = "users.updated")]
    UsersUpdated { users: Vec<UserId> },

    #[serde(rename = "activity.new")]
    ActivityNew { record: ActivityRecord },
    #[serde(rename = "activity.recent")]
    ActivityRecent { activities: Vec<ActivityRecord> },
    #[serde(rename = "activity.pruned")]
    ActivityPruned { pruned: u64 },

    #[serde(rename = "conflict.detected")]
    ConflictDetected {
        conflict: Box<crate::conflict::ConflictDescriptor>,
    },
    #[serde(rename = "conflict.resolved")]
    #[serde(rename_all = "camelCase")]
    ConflictResolved {
        task_id: TaskId,
        conflict_id: ConflictId,
        strategy: ResolutionStrategy,
        task: Task,
    },

    #[serde(rename = "error")]
    Error(ErrorData),
}

/// A client-to-server frame: correlation id plus command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub command: ClientCommand,
}

impl ClientFrame {
    /// Wraps a command with no correlation id.
    #[must_use]
    pub const fn of(command: ClientCommand) -> Self {
        Self { id: None, command }
    }

    /// Wraps a command with a correlation id.
    #[must_use]
    pub fn correlated(id: impl Into<String>, command: ClientCommand) -> Self {
        Self {
            id: Some(id.into()),
            command,
        }
    }
}

/// A server-to-client frame: optional correlation id plus event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub event: ServerEvent,
}

impl ServerFrame {
    /// Builds a server-initiated frame (no correlation id).
    #[must_use]
    pub const fn broadcast(event: ServerEvent) -> Self {
        Self { id: None, event }
    }

    /// Builds a reply frame echoing the request's correlation id.
    #[must_use]
    pub fn reply(id: Option<String>, event: ServerEvent) -> Self {
        Self { id, event }
    }
}

/// Encodes a client frame as a JSON text frame.
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode_client(frame: &ClientFrame) -> Result<String, String> {
    serde_json::to_string(frame).map_err(|e| format!("frame encode error: {e}"))
}

/// Decodes a client frame from a JSON text frame.
///
/// # Errors
///
/// Returns an error string if deserialization fails.
pub fn decode_client(text: &str) -> Result<ClientFrame, String> {
    serde_json::from_str(text).map_err(|e| format!("frame decode error: {e}"))
}

/// Encodes a server frame as a JSON text frame.
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode_server(frame: &ServerFrame) -> Result<String, String> {
    serde_json::to_string(frame).map_err(|e| format!("frame encode error: {e}"))
}

/// Decodes a server frame from a JSON text frame.
///
/// # Errors
///
/// Returns an error string if deserialization fails.
pub fn decode_server(text: &str) -> Result<ServerFrame, String> {
    serde_json::from_str(text).map_err(|e| format!("frame decode error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn client_frame_wire_shape() {
        let frame = ClientFrame::correlated(
            "7",
            ClientCommand::TaskCreate(TaskInput {
                title: "Ship release".to_string(),
                ..TaskInput::default()
            }),
        );
        let value: serde_json::Value = serde_json::from_str(&encode_client(&frame).unwrap()).unwrap();
        assert_eq!(value["type"], "task.create");
        assert_eq!(value["id"], "7");
        assert_eq!(value["data"]["title"], "Ship release");
    }

    #[test]
    fn client_frame_round_trip() {
        let frame = ClientFrame::of(ClientCommand::EditStart {
            task_id: TaskId::new(),
            known_version: 3,
        });
        let text = encode_client(&frame).unwrap();
        assert_eq!(decode_client(&text).unwrap(), frame);
    }

    #[test]
    fn known_version_uses_camel_case() {
        let frame = ClientFrame::of(ClientCommand::TaskMove {
            task_id: TaskId::new(),
            to_status: TaskStatus::Done,
            to_position: 0,
            known_version: 4,
        });
        let value: serde_json::Value = serde_json::from_str(&encode_client(&frame).unwrap()).unwrap();
        assert_eq!(value["data"]["knownVersion"], 4);
        assert_eq!(value["data"]["toStatus"], "done");
    }

    #[test]
    fn server_frame_omits_absent_id() {
        let frame = ServerFrame::broadcast(ServerEvent::UsersUpdated {
            users: vec![UserId::from("u1")],
        });
        let value: serde_json::Value = serde_json::from_str(&encode_server(&frame).unwrap()).unwrap();
        assert_eq!(value["type"], "users.updated");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn error_frame_wire_shape() {
        let frame = ServerFrame::reply(
            Some("3".to_string()),
            ServerEvent::Error(ErrorData::new(ErrorCode::NotFound, "no such task")),
        );
        let value: serde_json::Value = serde_json::from_str(&encode_server(&frame).unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["id"], "3");
        assert_eq!(value["data"]["code"], "not-found");
    }

    #[test]
    fn board_snapshot_uses_dashed_column_key() {
        let snapshot = BoardSnapshot::default();
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.get("in-progress").is_some());
        assert!(value.get("in_progress").is_none());
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let result = decode_client(r#"{"type":"task.explode","data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(decode_client("not json").is_err());
        assert!(decode_server("").is_err());
    }

    #[test]
    fn assign_null_assignee_round_trips() {
        let frame = ClientFrame::of(ClientCommand::TaskAssign {
            task_id: TaskId::new(),
            assignee_id: None,
            known_version: 2,
        });
        let text = encode_client(&frame).unwrap();
        assert_eq!(decode_client(&text).unwrap(), frame);
    }

    #[test]
    fn conflict_resolve_strategy_wire_name() {
        let frame = ClientFrame::of(ClientCommand::ConflictResolve {
            task_id: TaskId::new(),
            conflict_id: ConflictId::new(),
            strategy: ResolutionStrategy::TakeTheirs,
        });
        let value: serde_json::Value = serde_json::from_str(&encode_client(&frame).unwrap()).unwrap();
        assert_eq!(value["data"]["strategy"], "take-theirs");
    }
}
