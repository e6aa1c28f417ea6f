//! Task service: authoritative CRUD for board tasks.
//!
//! Every mutation runs read-validate-persist under the task's own async
//! mutex so the version check is atomic per task; reads take no lock. Each
//! successful operation returns a [`Mutation`] bundling the new task state,
//! the event to fan out, the rooms it targets, and the activity draft —
//! the gateway replies, broadcasts, and records from it.

use std::collections::HashMap;
use std::sync::Arc;

use boardcast_proto::activity::ActivityAction;
use boardcast_proto::error::FieldIssue;
use boardcast_proto::frame::{BoardSnapshot, Reposition, ServerEvent, TaskFilter};
use boardcast_proto::task::{
    Comment, Task, TaskId, TaskInput, TaskPatch, TaskStatus, Timestamp, UserId, is_reserved_title,
};
use tokio::sync::Mutex;

use crate::activity::ActivityDraft;
use crate::assign::AssignmentEngine;
use crate::config::Limits;
use crate::conflict::ConflictController;
use crate::error::ServiceError;
use crate::rooms::RoomId;
use crate::store::{TaskStore, UserDirectory};

/// Result of a successful mutation: the state to reply with, the event to
/// fan out, and the activity to record.
#[derive(Debug)]
pub struct Mutation {
    pub task: Task,
    pub event: ServerEvent,
    pub rooms: Vec<RoomId>,
    pub activity: ActivityDraft,
}

/// Registry of per-task mutexes. Entries are never evicted; the map is
/// bounded by the number of tasks ever touched.
#[derive(Default)]
struct TaskLocks {
    inner: parking_lot::Mutex<HashMap<TaskId, Arc<Mutex<()>>>>,
}

impl TaskLocks {
    fn acquire(&self, id: &TaskId) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock();
        Arc::clone(locks.entry(id.clone()).or_default())
    }
}

/// Authoritative task CRUD with invariant enforcement.
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    users: Arc<dyn UserDirectory>,
    conflicts: Arc<ConflictController>,
    engine: AssignmentEngine,
    limits: Limits,
    locks: TaskLocks,
}

fn pos(idx: usize) -> u32 {
    u32::try_from(idx).unwrap_or(u32::MAX)
}

/// Sorts a column the way clients see it: position ascending, then newest
/// first.
fn sort_column(column: &mut [Task]) {
    column.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then(b.created_at.cmp(&a.created_at))
    });
}

/// Reassigns positions `0..n-1` along the column. Siblings whose position
/// changed get a version bump and are returned; `skip` (the task the caller
/// is already mutating) never gets the sibling bump.
fn renumber(column: &mut [Task], skip: Option<&TaskId>) -> Vec<Task> {
    let mut changed = Vec::new();
    for (idx, task) in column.iter_mut().enumerate() {
        let idx = pos(idx);
        if task.position != idx {
            task.position = idx;
            if skip != Some(&task.id) {
                task.version += 1;
                changed.push(task.clone());
            }
        }
    }
    changed
}

fn repositions(changed: &[Task]) -> Vec<Reposition> {
    changed
        .iter()
        .map(|t| Reposition {
            task_id: t.id.clone(),
            status: t.status,
            position: t.position,
            version: t.version,
        })
        .collect()
}

/// Canonical tag form: trimmed, sorted, deduplicated.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = tags.iter().map(|t| t.trim().to_string()).collect();
    tags.sort();
    tags.dedup();
    tags
}

const CHANGE_FIELDS: [&str; 7] = [
    "title",
    "description",
    "status",
    "priority",
    "assignedTo",
    "dueDate",
    "tags",
];

fn field_value(task: &Task, field: &str) -> serde_json::Value {
    let value = match field {
        "title" => serde_json::to_value(&task.title),
        "description" => serde_json::to_value(&task.description),
        "status" => serde_json::to_value(task.status),
        "priority" => serde_json::to_value(task.priority),
        "assignedTo" => serde_json::to_value(&task.assigned_to),
        "dueDate" => serde_json::to_value(task.due_date),
        "tags" => serde_json::to_value(&task.tags),
        _ => unreachable!("unknown change field"),
    };
    value.unwrap_or(serde_json::Value::Null)
}

/// Maps of only the fields that differ between two task states.
fn change_deltas(old: &Task, new: &Task) -> (serde_json::Value, serde_json::Value) {
    let mut before = serde_json::Map::new();
    let mut after = serde_json::Map::new();
    for field in CHANGE_FIELDS {
        let old_value = field_value(old, field);
        let new_value = field_value(new, field);
        if old_value != new_value {
            before.insert(field.to_string(), old_value);
            after.insert(field.to_string(), new_value);
        }
    }
    (before.into(), after.into())
}

impl TaskService {
    /// Creates a service over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn TaskStore>,
        users: Arc<dyn UserDirectory>,
        conflicts: Arc<ConflictController>,
        limits: Limits,
    ) -> Self {
        let engine = AssignmentEngine::new(Arc::clone(&store), Arc::clone(&users));
        Self {
            store,
            users,
            conflicts,
            engine,
            limits,
            locks: TaskLocks::default(),
        }
    }

    /// Every non-archived task.
    async fn live_tasks(&self) -> Result<Vec<Task>, ServiceError> {
        Ok(self
            .store
            .all()
            .await?
            .into_iter()
            .filter(|t| !t.is_archived)
            .collect())
    }

    /// The non-archived tasks of one column, in display order.
    async fn column(&self, status: TaskStatus) -> Result<Vec<Task>, ServiceError> {
        let mut column: Vec<Task> = self
            .live_tasks()
            .await?
            .into_iter()
            .filter(|t| t.status == status)
            .collect();
        sort_column(&mut column);
        Ok(column)
    }

    /// Lists non-archived tasks grouped by column, optionally filtered.
    pub async fn list(&self, filter: &TaskFilter) -> Result<BoardSnapshot, ServiceError> {
        let tasks = self.live_tasks().await?;
        let mut snapshot = BoardSnapshot::default();
        for task in tasks {
            if filter.status.is_some_and(|s| s != task.status) {
                continue;
            }
            if let Some(assignee) = &filter.assigned_to
                && task.assigned_to.as_ref() != Some(assignee)
            {
                continue;
            }
            if filter.priority.is_some_and(|p| p != task.priority) {
                continue;
            }
            match task.status {
                TaskStatus::Todo => snapshot.todo.push(task),
                TaskStatus::InProgress => snapshot.in_progress.push(task),
                TaskStatus::Done => snapshot.done.push(task),
            }
        }
        sort_column(&mut snapshot.todo);
        sort_column(&mut snapshot.in_progress);
        sort_column(&mut snapshot.done);
        Ok(snapshot)
    }

    /// Fetches one live task. Archived tasks are invisible.
    pub async fn get(&self, id: &TaskId) -> Result<Task, ServiceError> {
        match self.store.get(id).await? {
            Some(task) if !task.is_archived => Ok(task),
            _ => Err(ServiceError::NotFound),
        }
    }

    fn validate_title(&self, title: &str, issues: &mut Vec<FieldIssue>) {
        if title.is_empty() {
            issues.push(FieldIssue::new("title", "must not be empty"));
        } else if title.chars().count() > self.limits.max_title_len {
            issues.push(FieldIssue::new(
                "title",
                format!("must be at most {} characters", self.limits.max_title_len),
            ));
        }
    }

    fn validate_description(&self, description: &str, issues: &mut Vec<FieldIssue>) {
        if description.chars().count() > self.limits.max_description_len {
            issues.push(FieldIssue::new(
                "description",
                format!(
                    "must be at most {} characters",
                    self.limits.max_description_len
                ),
            ));
        }
    }

    fn validate_tags(&self, tags: &[String], issues: &mut Vec<FieldIssue>) {
        if tags.len() > self.limits.max_tags {
            issues.push(FieldIssue::new(
                "tags",
                format!("at most {} tags allowed", self.limits.max_tags),
            ));
        }
        if tags
            .iter()
            .any(|t| t.is_empty() || t.chars().count() > self.limits.max_tag_len)
        {
            issues.push(FieldIssue::new(
                "tags",
                format!(
                    "each tag must be 1 to {} characters",
                    self.limits.max_tag_len
                ),
            ));
        }
    }

    /// Due dates are only checked when a new value is written; an already
    /// stored date is allowed to drift into the past.
    fn validate_due_date(due: Timestamp, issues: &mut Vec<FieldIssue>) {
        if due <= Timestamp::now() {
            issues.push(FieldIssue::new("dueDate", "must be in the future"));
        }
    }

    /// Title invariant checks that are their own failure kinds rather than
    /// `Validation` issues.
    async fn check_title_invariants(
        &self,
        title: &str,
        exclude: Option<&TaskId>,
    ) -> Result<(), ServiceError> {
        if is_reserved_title(title) {
            return Err(ServiceError::ReservedTitle);
        }
        let folded = title.to_lowercase();
        let clash = self
            .live_tasks()
            .await?
            .iter()
            .any(|t| Some(&t.id) != exclude && t.title.to_lowercase() == folded);
        if clash {
            return Err(ServiceError::DuplicateTitle);
        }
        Ok(())
    }

    async fn check_assignee(&self, assignee: &UserId) -> Result<(), ServiceError> {
        match self.users.get(assignee).await? {
            Some(user) if user.is_active => Ok(()),
            _ => Err(ServiceError::InvalidAssignee),
        }
    }

    /// Creates a task at the end of its column with version 1.
    pub async fn create(&self, input: TaskInput, actor: &UserId) -> Result<Mutation, ServiceError> {
        let title = input.title.trim().to_string();
        let tags = normalize_tags(&input.tags);

        let mut issues = Vec::new();
        self.validate_title(&title, &mut issues);
        self.validate_description(&input.description, &mut issues);
        self.validate_tags(&tags, &mut issues);
        if let Some(due) = input.due_date {
            Self::validate_due_date(due, &mut issues);
        }
        if !issues.is_empty() {
            return Err(ServiceError::Validation(issues));
        }
        self.check_title_invariants(&title, None).await?;
        if let Some(assignee) = &input.assigned_to {
            self.check_assignee(assignee).await?;
        }

        let position = pos(self.column(input.status).await?.len());
        let now = Timestamp::now();
        let task = Task {
            id: TaskId::new(),
            title,
            description: input.description,
            status: input.status,
            priority: input.priority,
            assigned_to: input.assigned_to,
            created_by: actor.clone(),
            due_date: input.due_date,
            tags,
            position,
            version: 1,
            created_at: now,
            last_modified_at: now,
            last_modified_by: actor.clone(),
            is_archived: false,
            archived_at: None,
            archived_by: None,
            comments: Vec::new(),
        };
        self.store.put(task.clone()).await?;
        tracing::info!(task_id = %task.id, title = %task.title, actor = %actor, "task created");

        let mut activity = ActivityDraft::for_task(ActivityAction::TaskCreated, actor.clone(), &task);
        activity.after = Some(serde_json::json!({
            "title": task.title,
            "status": task.status,
        }));
        Ok(Mutation {
            event: ServerEvent::TaskCreated { task: task.clone() },
            rooms: vec![RoomId::Board],
            activity,
            task,
        })
    }

    /// Applies a patch under the version check, bumping the version and
    /// recording the changed-field deltas.
    pub async fn update(
        &self,
        id: &TaskId,
        patch: TaskPatch,
        actor: &UserId,
        known_version: Option<u64>,
    ) -> Result<Mutation, ServiceError> {
        let lock = self.locks.acquire(id);
        let _guard = lock.lock().await;

        let old = self.get(id).await?;
        if let Some(kv) = known_version {
            self.conflicts
                .check_version(&old, kv, patch.clone())
                .map_err(ServiceError::Conflict)?;
        }
        if patch.is_empty() {
            return Err(ServiceError::validation("patch", "no fields to update"));
        }

        let mut issues = Vec::new();
        let title = patch.title.as_ref().map(|t| t.trim().to_string());
        if let Some(title) = &title {
            self.validate_title(title, &mut issues);
        }
        if let Some(description) = &patch.description {
            self.validate_description(description, &mut issues);
        }
        let tags = patch.tags.as_ref().map(|t| normalize_tags(t));
        if let Some(tags) = &tags {
            self.validate_tags(tags, &mut issues);
        }
        if let Some(Some(due)) = patch.due_date {
            Self::validate_due_date(due, &mut issues);
        }
        if !issues.is_empty() {
            return Err(ServiceError::Validation(issues));
        }
        if let Some(title) = &title {
            self.check_title_invariants(title, Some(id)).await?;
        }
        if let Some(Some(assignee)) = &patch.assigned_to {
            self.check_assignee(assignee).await?;
        }

        let mut task = old.clone();
        if let Some(title) = title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(assigned_to) = patch.assigned_to {
            task.assigned_to = assigned_to;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        if let Some(tags) = tags {
            task.tags = tags;
        }

        // A status change through update moves the task to the end of the
        // target column and closes the gap it left behind.
        let mut changed_siblings = Vec::new();
        if let Some(new_status) = patch.status
            && new_status != old.status
        {
            let mut source: Vec<Task> = self
                .column(old.status)
                .await?
                .into_iter()
                .filter(|t| t.id != *id)
                .collect();
            changed_siblings = renumber(&mut source, None);
            task.position = pos(self.column(new_status).await?.len());
            task.status = new_status;
        }

        task.version += 1;
        task.last_modified_at = Timestamp::now();
        task.last_modified_by = actor.clone();

        for sibling in &changed_siblings {
            self.store.put(sibling.clone()).await?;
        }
        self.store.put(task.clone()).await?;

        let (before, after) = change_deltas(&old, &task);
        tracing::info!(task_id = %task.id, version = task.version, actor = %actor, "task updated");

        let mut activity = ActivityDraft::for_task(ActivityAction::TaskUpdated, actor.clone(), &task);
        activity.before = Some(before.clone());
        activity.after = Some(after.clone());
        Ok(Mutation {
            event: ServerEvent::TaskUpdated {
                task: task.clone(),
                before,
                after,
                repositioned: repositions(&changed_siblings),
            },
            rooms: vec![RoomId::Board, RoomId::Task(id.clone())],
            activity,
            task,
        })
    }

    /// Moves a task within or across columns, renumbering only the
    /// affected positions.
    pub async fn move_task(
        &self,
        id: &TaskId,
        to_status: TaskStatus,
        to_position: u32,
        actor: &UserId,
        known_version: u64,
    ) -> Result<Mutation, ServiceError> {
        let lock = self.locks.acquire(id);
        let _guard = lock.lock().await;

        let mut task = self.get(id).await?;
        self.conflicts
            .check_version(&task, known_version, TaskPatch::default())
            .map_err(ServiceError::Conflict)?;

        let from_status = task.status;
        let mut changed_siblings;

        if from_status == to_status {
            let mut column = self.column(from_status).await?;
            let original_len = column.len();
            let Some(current_index) = column.iter().position(|t| t.id == *id) else {
                return Err(ServiceError::NotFound);
            };
            let moved = column.remove(current_index);
            let target_index =
                (to_position as usize).min(original_len.saturating_sub(1));
            if target_index == current_index {
                // Same slot: nothing moves, nothing bumps.
                return Ok(Self::noop_move(moved, actor));
            }
            column.insert(target_index, moved);
            changed_siblings = renumber(&mut column, Some(id));
            task.position = pos(target_index);
        } else {
            let mut source: Vec<Task> = self
                .column(from_status)
                .await?
                .into_iter()
                .filter(|t| t.id != *id)
                .collect();
            changed_siblings = renumber(&mut source, None);

            let mut target = self.column(to_status).await?;
            let target_index = (to_position as usize).min(target.len());
            task.status = to_status;
            target.insert(target_index, task.clone());
            changed_siblings.extend(renumber(&mut target, Some(id)));
            task.position = pos(target_index);
        }

        task.version += 1;
        task.last_modified_at = Timestamp::now();
        task.last_modified_by = actor.clone();

        for sibling in &changed_siblings {
            self.store.put(sibling.clone()).await?;
        }
        self.store.put(task.clone()).await?;
        tracing::info!(
            task_id = %task.id,
            from = %from_status,
            to = %to_status,
            position = task.position,
            "task moved"
        );

        let mut activity = ActivityDraft::for_task(ActivityAction::TaskMoved, actor.clone(), &task);
        activity.to_status = Some(to_status);
        Ok(Mutation {
            event: ServerEvent::TaskMoved {
                task: task.clone(),
                from_status,
                to_status,
                repositioned: repositions(&changed_siblings),
            },
            rooms: vec![RoomId::Board, RoomId::Task(id.clone())],
            activity,
            task,
        })
    }

    /// A move that lands in the task's current slot changes nothing and
    /// bumps nothing.
    fn noop_move(task: Task, actor: &UserId) -> Mutation {
        let mut activity = ActivityDraft::for_task(ActivityAction::TaskMoved, actor.clone(), &task);
        activity.to_status = Some(task.status);
        Mutation {
            event: ServerEvent::TaskMoved {
                task: task.clone(),
                from_status: task.status,
                to_status: task.status,
                repositioned: Vec::new(),
            },
            rooms: vec![RoomId::Board, RoomId::Task(task.id.clone())],
            activity,
            task,
        }
    }

    /// Assigns or unassigns a task under the version check.
    pub async fn assign(
        &self,
        id: &TaskId,
        assignee: Option<UserId>,
        actor: &UserId,
        known_version: u64,
    ) -> Result<Mutation, ServiceError> {
        let lock = self.locks.acquire(id);
        let _guard = lock.lock().await;

        let mut task = self.get(id).await?;
        let patch = TaskPatch {
            assigned_to: Some(assignee.clone()),
            ..TaskPatch::default()
        };
        self.conflicts
            .check_version(&task, known_version, patch)
            .map_err(ServiceError::Conflict)?;
        if let Some(assignee) = &assignee {
            self.check_assignee(assignee).await?;
        }

        task.assigned_to = assignee.clone();
        task.version += 1;
        task.last_modified_at = Timestamp::now();
        task.last_modified_by = actor.clone();
        self.store.put(task.clone()).await?;
        tracing::info!(task_id = %task.id, assignee = ?assignee, actor = %actor, "task assignment changed");

        let (event, activity) = match assignee {
            Some(assignee) => {
                let mut draft =
                    ActivityDraft::for_task(ActivityAction::TaskAssigned, actor.clone(), &task);
                draft.assignee = Some(assignee.clone());
                (
                    ServerEvent::TaskAssigned {
                        task: task.clone(),
                        assignee,
                    },
                    draft,
                )
            }
            None => (
                ServerEvent::TaskUnassigned { task: task.clone() },
                ActivityDraft::for_task(ActivityAction::TaskUnassigned, actor.clone(), &task),
            ),
        };
        Ok(Mutation {
            event,
            rooms: vec![RoomId::Board, RoomId::Task(id.clone())],
            activity,
            task,
        })
    }

    /// Smart-Assign: delegates the choice to the assignment engine, then
    /// applies it as a normal assignment.
    pub async fn smart_assign(
        &self,
        id: &TaskId,
        actor: &UserId,
        known_version: u64,
    ) -> Result<Mutation, ServiceError> {
        let assignee = self.engine.pick().await?;
        self.assign(id, Some(assignee), actor, known_version).await
    }

    /// Appends a comment. Comments are orthogonal to the version-checked
    /// fields: no version bump.
    pub async fn comment(
        &self,
        id: &TaskId,
        text: String,
        actor: &UserId,
    ) -> Result<Mutation, ServiceError> {
        let lock = self.locks.acquire(id);
        let _guard = lock.lock().await;

        let mut task = self.get(id).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ServiceError::validation("text", "must not be empty"));
        }
        if text.chars().count() > self.limits.max_comment_len {
            return Err(ServiceError::validation(
                "text",
                format!("must be at most {} characters", self.limits.max_comment_len),
            ));
        }

        let comment = Comment {
            author: actor.clone(),
            text,
            created_at: Timestamp::now(),
        };
        task.comments.push(comment.clone());
        self.store.put(task.clone()).await?;

        let activity = ActivityDraft::for_task(ActivityAction::TaskCommented, actor.clone(), &task);
        Ok(Mutation {
            event: ServerEvent::TaskCommented {
                task: task.clone(),
                comment,
            },
            rooms: vec![RoomId::Board, RoomId::Task(id.clone())],
            activity,
            task,
        })
    }

    /// Soft-deletes a task. Only its creator or an admin may archive.
    pub async fn archive(&self, id: &TaskId, actor: &UserId) -> Result<Mutation, ServiceError> {
        let lock = self.locks.acquire(id);
        let _guard = lock.lock().await;

        let mut task = self.get(id).await?;
        self.authorize_removal(&task, actor).await?;

        let mut column: Vec<Task> = self
            .column(task.status)
            .await?
            .into_iter()
            .filter(|t| t.id != *id)
            .collect();
        let changed_siblings = renumber(&mut column, None);

        let now = Timestamp::now();
        task.is_archived = true;
        task.archived_at = Some(now);
        task.archived_by = Some(actor.clone());
        task.version += 1;
        task.last_modified_at = now;
        task.last_modified_by = actor.clone();

        for sibling in &changed_siblings {
            self.store.put(sibling.clone()).await?;
        }
        self.store.put(task.clone()).await?;
        tracing::info!(task_id = %task.id, actor = %actor, "task archived");

        let activity = ActivityDraft::for_task(ActivityAction::TaskArchived, actor.clone(), &task);
        Ok(Mutation {
            event: ServerEvent::TaskArchived {
                task: task.clone(),
                repositioned: repositions(&changed_siblings),
            },
            rooms: vec![RoomId::Board, RoomId::Task(id.clone())],
            activity,
            task,
        })
    }

    /// Hard-deletes a non-archived task. Only its creator or an admin.
    pub async fn delete(&self, id: &TaskId, actor: &UserId) -> Result<Mutation, ServiceError> {
        let lock = self.locks.acquire(id);
        let _guard = lock.lock().await;

        let task = self.get(id).await?;
        self.authorize_removal(&task, actor).await?;

        self.store.remove(id).await?;
        let mut column = self.column(task.status).await?;
        let changed_siblings = renumber(&mut column, None);
        for sibling in &changed_siblings {
            self.store.put(sibling.clone()).await?;
        }
        tracing::info!(task_id = %task.id, actor = %actor, "task deleted");

        let activity = ActivityDraft::for_task(ActivityAction::TaskDeleted, actor.clone(), &task);
        Ok(Mutation {
            event: ServerEvent::TaskDeleted {
                task_id: id.clone(),
                repositioned: repositions(&changed_siblings),
            },
            rooms: vec![RoomId::Board, RoomId::Task(id.clone())],
            activity,
            task,
        })
    }

    async fn authorize_removal(&self, task: &Task, actor: &UserId) -> Result<(), ServiceError> {
        if task.created_by == *actor {
            return Ok(());
        }
        match self.users.get(actor).await? {
            Some(user) if user.is_admin() => Ok(()),
            _ => Err(ServiceError::Forbidden),
        }
    }
}
