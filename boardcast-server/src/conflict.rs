//! Conflict detection, edit-session tracking, and resolution.
//!
//! Mutations that carry a `knownVersion` older than the task's current
//! version are rejected with a [`ConflictDescriptor`]. The controller
//! remembers each detection (the conflict base plus the client's patch) so
//! a later `merge` resolution can replay the client's intent, and tracks
//! the advisory per-task edit sessions. Edit locks are signals only; the
//! mutation path never consults them.

use std::collections::HashMap;

use boardcast_proto::conflict::{ConflictDescriptor, ConflictId};
use boardcast_proto::task::{Task, TaskId, TaskPatch, Timestamp, UserId};

use crate::rooms::SessionId;

/// Separator between the two sides when a merge keeps both description
/// edits.
pub const DESCRIPTION_MERGE_SEPARATOR: &str = "\n---\n";

/// Advisory "being edited by" marker for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub editor: UserId,
    pub session: SessionId,
    pub started_at: Timestamp,
}

/// Outcome of `edit.start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditStart {
    /// The caller now holds the edit session.
    Started,
    /// Someone else is already editing. Informational, not blocking.
    Contended {
        other_editor: UserId,
    },
}

/// A detected conflict awaiting resolution.
#[derive(Debug, Clone)]
pub struct PendingConflict {
    pub task_id: TaskId,
    pub client_version: u64,
    /// Server task state at detection time; the base for a three-way merge.
    pub base: Task,
    /// The client's rejected patch.
    pub patch: TaskPatch,
}

/// Tracks detected conflicts and advisory edit sessions.
#[derive(Default)]
pub struct ConflictController {
    pending: parking_lot::Mutex<HashMap<ConflictId, PendingConflict>>,
    editing: parking_lot::Mutex<HashMap<TaskId, EditSession>>,
}

impl ConflictController {
    /// Creates an empty controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects a stale write: if `known_version` is behind the task's
    /// current version, registers a pending conflict and returns its
    /// descriptor.
    pub fn check_version(
        &self,
        task: &Task,
        known_version: u64,
        patch: TaskPatch,
    ) -> Result<(), Box<ConflictDescriptor>> {
        if known_version >= task.version {
            return Ok(());
        }
        let descriptor = ConflictDescriptor {
            conflict_id: ConflictId::new(),
            client_version: known_version,
            server_version: task.version,
            server_task: task.clone(),
            last_modified_by: task.last_modified_by.clone(),
        };
        self.pending.lock().insert(
            descriptor.conflict_id.clone(),
            PendingConflict {
                task_id: task.id.clone(),
                client_version: known_version,
                base: task.clone(),
                patch,
            },
        );
        tracing::debug!(
            task_id = %task.id,
            conflict_id = %descriptor.conflict_id,
            client_version = known_version,
            server_version = task.version,
            "stale write detected"
        );
        Err(Box::new(descriptor))
    }

    /// Consumes a pending conflict, verifying it belongs to the given task.
    #[must_use]
    pub fn take(&self, conflict_id: &ConflictId, task_id: &TaskId) -> Option<PendingConflict> {
        let mut pending = self.pending.lock();
        if pending.get(conflict_id).is_some_and(|p| p.task_id == *task_id) {
            pending.remove(conflict_id)
        } else {
            None
        }
    }

    /// Marks a task as being edited. Refreshes the marker when the same
    /// user re-starts; reports contention when someone else holds it.
    pub fn start_edit(&self, task_id: &TaskId, editor: &UserId, session: SessionId) -> EditStart {
        let mut editing = self.editing.lock();
        if let Some(current) = editing.get(task_id)
            && current.editor != *editor
        {
            return EditStart::Contended {
                other_editor: current.editor.clone(),
            };
        }
        editing.insert(
            task_id.clone(),
            EditSession {
                editor: editor.clone(),
                session,
                started_at: Timestamp::now(),
            },
        );
        EditStart::Started
    }

    /// Clears the edit marker if this session holds it, returning the
    /// cleared session.
    pub fn end_edit(&self, task_id: &TaskId, session: SessionId) -> Option<EditSession> {
        let mut editing = self.editing.lock();
        if editing.get(task_id).is_some_and(|e| e.session == session) {
            editing.remove(task_id)
        } else {
            None
        }
    }

    /// Clears every edit marker held by a disconnecting session, returning
    /// the affected tasks and their editors.
    pub fn end_all_for(&self, session: SessionId) -> Vec<(TaskId, UserId)> {
        let mut editing = self.editing.lock();
        let cleared: Vec<(TaskId, UserId)> = editing
            .iter()
            .filter(|(_, e)| e.session == session)
            .map(|(task_id, e)| (task_id.clone(), e.editor.clone()))
            .collect();
        for (task_id, _) in &cleared {
            editing.remove(task_id);
        }
        cleared
    }

    /// Who is currently editing a task, if anyone.
    #[must_use]
    pub fn current_editor(&self, task_id: &TaskId) -> Option<EditSession> {
        self.editing.lock().get(task_id).cloned()
    }
}

/// Field-wise three-way merge of a rejected patch against the conflict
/// base and the current server state.
///
/// Per field: a side "changed" it if its value differs from the base. Only
/// one side changed ⇒ that side wins (an unchanged client field is simply
/// dropped from the patch, leaving the server value in place). Both
/// changed ⇒ the client wins for scalar fields, `tags` takes the union,
/// and `description` keeps both edits joined by
/// [`DESCRIPTION_MERGE_SEPARATOR`] when both are non-empty and differ.
///
/// The result is applied as a normal update with the current version.
#[must_use]
pub fn merge_patch(base: &Task, server: &Task, client: &TaskPatch) -> TaskPatch {
    let mut merged = TaskPatch::default();

    if let Some(title) = &client.title
        && *title != base.title
    {
        merged.title = Some(title.clone());
    }
    if let Some(status) = client.status
        && status != base.status
    {
        merged.status = Some(status);
    }
    if let Some(priority) = client.priority
        && priority != base.priority
    {
        merged.priority = Some(priority);
    }
    if let Some(assigned_to) = &client.assigned_to
        && *assigned_to != base.assigned_to
    {
        merged.assigned_to = Some(assigned_to.clone());
    }
    if let Some(due_date) = &client.due_date
        && *due_date != base.due_date
    {
        merged.due_date = Some(*due_date);
    }

    if let Some(client_tags) = &client.tags {
        let mut client_tags = client_tags.clone();
        client_tags.sort();
        client_tags.dedup();
        if client_tags != base.tags {
            let server_changed = server.tags != base.tags;
            if server_changed {
                let mut union: Vec<String> = server.tags.clone();
                union.extend(client_tags);
                union.sort();
                union.dedup();
                merged.tags = Some(union);
            } else {
                merged.tags = Some(client_tags);
            }
        }
    }

    if let Some(client_desc) = &client.description
        && *client_desc != base.description
    {
        let server_changed = server.description != base.description;
        if server_changed
            && !server.description.is_empty()
            && !client_desc.is_empty()
            && *client_desc != server.description
        {
            merged.description = Some(format!(
                "{}{DESCRIPTION_MERGE_SEPARATOR}{client_desc}",
                server.description
            ));
        } else {
            merged.description = Some(client_desc.clone());
        }
    }

    merged
}
