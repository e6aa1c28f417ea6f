//! Activity recording: the immutable audit trail of every mutation.
//!
//! Every successful mutation (and the auth events) produces exactly one
//! [`ActivityRecord`]. The recorder renders the description from a fixed
//! per-action template table, keeps the last `ring_size` records in a
//! rolling window feeding the `activity` room and the `activity.recent`
//! query, and forwards each record to the external sink fire-and-forget:
//! a sink failure is logged and never fails the user request.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use boardcast_proto::activity::{ActivityAction, ActivityRecord, Severity};
use boardcast_proto::conflict::{ConflictId, ResolutionStrategy};
use boardcast_proto::frame::ServerEvent;
use boardcast_proto::task::{Task, TaskId, TaskStatus, Timestamp, UserId};
use tokio::sync::RwLock;

use crate::error::ServiceError;
use crate::rooms::{Fanout, RoomId};

const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Errors from the activity sink backend.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink could not serve the request.
    #[error("activity sink unavailable: {0}")]
    Unavailable(String),
}

/// Append-only activity log, implemented by the external sink.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Appends one record.
    async fn append(&self, record: ActivityRecord) -> Result<(), SinkError>;

    /// Marks the conflict-detection record with this id as resolved.
    /// Returns `true` if a record was updated.
    async fn mark_resolved(&self, conflict_id: &ConflictId) -> Result<bool, SinkError>;

    /// Deletes records older than `cutoff` with severity low or medium.
    /// Returns the number deleted.
    async fn prune(&self, cutoff: Timestamp) -> Result<u64, SinkError>;
}

/// In-memory activity sink.
#[derive(Default)]
pub struct MemoryActivitySink {
    records: RwLock<Vec<ActivityRecord>>,
}

impl MemoryActivitySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record, oldest first.
    pub async fn records(&self) -> Vec<ActivityRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ActivitySink for MemoryActivitySink {
    async fn append(&self, record: ActivityRecord) -> Result<(), SinkError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn mark_resolved(&self, conflict_id: &ConflictId) -> Result<bool, SinkError> {
        let mut records = self.records.write().await;
        let mut updated = false;
        for record in records.iter_mut() {
            if record.action == ActivityAction::ConflictDetected
                && record.conflict_id.as_ref() == Some(conflict_id)
                && !record.is_resolved
            {
                record.is_resolved = true;
                updated = true;
            }
        }
        Ok(updated)
    }

    async fn prune(&self, cutoff: Timestamp) -> Result<u64, SinkError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.created_at >= cutoff || r.severity > Severity::Medium);
        Ok((before - records.len()) as u64)
    }
}

/// Everything a caller knows about a mutation; the recorder renders the
/// description and fills the per-action defaults.
#[derive(Debug, Clone)]
pub struct ActivityDraft {
    pub action: ActivityAction,
    pub actor: UserId,
    pub task_id: Option<TaskId>,
    /// Task title (or other subject) interpolated into the template.
    pub subject: String,
    pub to_status: Option<TaskStatus>,
    pub assignee: Option<UserId>,
    pub strategy: Option<ResolutionStrategy>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub conflict_id: Option<ConflictId>,
    pub is_resolved: bool,
}

impl ActivityDraft {
    /// Draft for a task-targeted action with no extra detail.
    #[must_use]
    pub fn for_task(action: ActivityAction, actor: UserId, task: &Task) -> Self {
        Self {
            action,
            actor,
            task_id: Some(task.id.clone()),
            subject: task.title.clone(),
            to_status: None,
            assignee: None,
            strategy: None,
            before: None,
            after: None,
            conflict_id: None,
            is_resolved: true,
        }
    }

    /// Draft for an auth event with no target.
    #[must_use]
    pub fn for_auth(action: ActivityAction, actor: UserId) -> Self {
        Self {
            action,
            actor,
            task_id: None,
            subject: String::new(),
            to_status: None,
            assignee: None,
            strategy: None,
            before: None,
            after: None,
            conflict_id: None,
            is_resolved: true,
        }
    }
}

/// Renders the description for a draft from the fixed template table.
fn describe(draft: &ActivityDraft) -> String {
    let actor = &draft.actor;
    let subject = &draft.subject;
    match draft.action {
        ActivityAction::TaskCreated => format!("{actor} created task \"{subject}\""),
        ActivityAction::TaskUpdated => format!("{actor} updated task \"{subject}\""),
        ActivityAction::TaskMoved => match draft.to_status {
            Some(status) => format!("{actor} moved task \"{subject}\" to {status}"),
            None => format!("{actor} moved task \"{subject}\""),
        },
        ActivityAction::TaskAssigned => match &draft.assignee {
            Some(assignee) => format!("{actor} assigned task \"{subject}\" to {assignee}"),
            None => format!("{actor} assigned task \"{subject}\""),
        },
        ActivityAction::TaskUnassigned => format!("{actor} unassigned task \"{subject}\""),
        ActivityAction::TaskCommented => format!("{actor} commented on task \"{subject}\""),
        ActivityAction::TaskArchived => format!("{actor} archived task \"{subject}\""),
        ActivityAction::TaskDeleted => format!("{actor} deleted task \"{subject}\""),
        ActivityAction::ConflictDetected => {
            format!("{actor} hit an edit conflict on task \"{subject}\"")
        }
        ActivityAction::ConflictResolved => match draft.strategy {
            Some(strategy) => {
                format!("{actor} resolved a conflict on task \"{subject}\" with {strategy}")
            }
            None => format!("{actor} resolved a conflict on task \"{subject}\""),
        },
        ActivityAction::Login => format!("{actor} logged in"),
        ActivityAction::Logout => format!("{actor} logged out"),
        ActivityAction::Registered => format!("{actor} registered"),
        ActivityAction::PasswordChanged => format!("{actor} changed their password"),
    }
}

/// Builds and distributes activity records.
pub struct ActivityRecorder {
    sink: Arc<dyn ActivitySink>,
    router: Arc<dyn Fanout>,
    ring: parking_lot::Mutex<VecDeque<ActivityRecord>>,
    ring_size: usize,
    retention_days: u32,
}

impl ActivityRecorder {
    /// Creates a recorder with the given rolling-window capacity and
    /// default prune retention.
    #[must_use]
    pub fn new(
        sink: Arc<dyn ActivitySink>,
        router: Arc<dyn Fanout>,
        ring_size: usize,
        retention_days: u32,
    ) -> Self {
        Self {
            sink,
            router,
            ring: parking_lot::Mutex::new(VecDeque::with_capacity(ring_size)),
            ring_size,
            retention_days,
        }
    }

    /// Records one activity: renders the description, appends to the
    /// rolling window, broadcasts `activity.new` to the activity room, and
    /// forwards to the sink without awaiting it.
    pub fn record(&self, draft: ActivityDraft) -> ActivityRecord {
        let record = ActivityRecord {
            action: draft.action,
            actor: draft.actor.clone(),
            target: draft.task_id.as_ref().map(ToString::to_string),
            target_kind: draft.task_id.as_ref().map(|_| "task".to_string()),
            description: describe(&draft),
            before: draft.before,
            after: draft.after,
            category: draft.action.category(),
            severity: draft.action.severity(),
            conflict_id: draft.conflict_id,
            is_resolved: draft.is_resolved,
            created_at: Timestamp::now(),
            ip: None,
            user_agent: None,
        };

        {
            let mut ring = self.ring.lock();
            ring.push_back(record.clone());
            while ring.len() > self.ring_size {
                ring.pop_front();
            }
        }

        self.router.broadcast(
            &[RoomId::Activity],
            &ServerEvent::ActivityNew {
                record: record.clone(),
            },
            None,
        );

        let sink = Arc::clone(&self.sink);
        let to_persist = record.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.append(to_persist).await {
                tracing::warn!(error = %e, "failed to persist activity record");
            }
        });

        record
    }

    /// The rolling window, newest first.
    #[must_use]
    pub fn recent(&self) -> Vec<ActivityRecord> {
        self.ring.lock().iter().rev().cloned().collect()
    }

    /// Marks the detection record for a conflict as resolved, in both the
    /// rolling window and the sink. Sink failures are swallowed after a
    /// warning, like appends.
    pub fn mark_conflict_resolved(&self, conflict_id: &ConflictId) {
        {
            let mut ring = self.ring.lock();
            for record in ring.iter_mut() {
                if record.action == ActivityAction::ConflictDetected
                    && record.conflict_id.as_ref() == Some(conflict_id)
                {
                    record.is_resolved = true;
                }
            }
        }
        let sink = Arc::clone(&self.sink);
        let conflict_id = conflict_id.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.mark_resolved(&conflict_id).await {
                tracing::warn!(error = %e, "failed to mark conflict activity resolved");
            }
        });
    }

    /// Admin prune: deletes low/medium sink records older than the given
    /// number of days (default: configured retention).
    pub async fn prune(&self, days: Option<u32>) -> Result<u64, ServiceError> {
        let days = days.unwrap_or(self.retention_days);
        let cutoff = Timestamp::now().saturating_sub_millis(u64::from(days) * MILLIS_PER_DAY);
        self.sink
            .prune(cutoff)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fanout stub that remembers every broadcast event.
    #[derive(Default)]
    struct RecordingFanout {
        events: parking_lot::Mutex<Vec<(Vec<RoomId>, ServerEvent)>>,
    }

    impl Fanout for RecordingFanout {
        fn join(&self, _session: crate::rooms::SessionId, _room: RoomId) {}
        fn leave(&self, _session: crate::rooms::SessionId, _room: &RoomId) {}
        fn broadcast(&self, rooms: &[RoomId], event: &ServerEvent, _except: Option<crate::rooms::SessionId>) {
            self.events.lock().push((rooms.to_vec(), event.clone()));
        }
        fn send(&self, _session: crate::rooms::SessionId, _frame: boardcast_proto::frame::ServerFrame) -> bool {
            true
        }
        fn members(&self, _room: &RoomId) -> Vec<crate::rooms::SessionId> {
            vec![]
        }
        fn online_users(&self) -> Vec<UserId> {
            vec![]
        }
    }

    fn make_recorder(ring_size: usize) -> (Arc<MemoryActivitySink>, Arc<RecordingFanout>, ActivityRecorder) {
        let sink = Arc::new(MemoryActivitySink::new());
        let fanout = Arc::new(RecordingFanout::default());
        let recorder = ActivityRecorder::new(
            Arc::clone(&sink) as Arc<dyn ActivitySink>,
            Arc::clone(&fanout) as Arc<dyn Fanout>,
            ring_size,
            90,
        );
        (sink, fanout, recorder)
    }

    fn login_draft(user: &str) -> ActivityDraft {
        ActivityDraft::for_auth(ActivityAction::Login, UserId::from(user))
    }

    #[tokio::test]
    async fn record_renders_template_description() {
        let (_sink, _fanout, recorder) = make_recorder(20);
        let mut draft = login_draft("u1");
        draft.action = ActivityAction::TaskCreated;
        draft.task_id = Some(TaskId::new());
        draft.subject = "Ship release".to_string();

        let record = recorder.record(draft);
        assert_eq!(record.description, "u1 created task \"Ship release\"");
        assert_eq!(record.target_kind.as_deref(), Some("task"));
    }

    #[tokio::test]
    async fn ring_evicts_oldest_beyond_capacity() {
        let (_sink, _fanout, recorder) = make_recorder(3);
        for user in ["a", "b", "c", "d"] {
            recorder.record(login_draft(user));
        }

        let recent = recorder.recent();
        assert_eq!(recent.len(), 3);
        // Newest first; "a" was evicted.
        assert_eq!(recent[0].actor, UserId::from("d"));
        assert_eq!(recent[2].actor, UserId::from("b"));
    }

    #[tokio::test]
    async fn record_broadcasts_to_activity_room() {
        let (_sink, fanout, recorder) = make_recorder(20);
        recorder.record(login_draft("u1"));

        let events = fanout.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, vec![RoomId::Activity]);
        assert!(matches!(events[0].1, ServerEvent::ActivityNew { .. }));
    }

    #[tokio::test]
    async fn record_forwards_to_sink() {
        let (sink, _fanout, recorder) = make_recorder(20);
        recorder.record(login_draft("u1"));

        // The sink append is spawned; give it a beat.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(sink.records().await.len(), 1);
    }

    #[tokio::test]
    async fn prune_removes_only_old_low_and_medium() {
        let sink = MemoryActivitySink::new();
        let mut old_low = ActivityRecord {
            action: ActivityAction::Login,
            actor: UserId::from("u1"),
            target: None,
            target_kind: None,
            description: String::new(),
            before: None,
            after: None,
            category: ActivityAction::Login.category(),
            severity: Severity::Low,
            conflict_id: None,
            is_resolved: true,
            created_at: Timestamp::from_millis(0),
            ip: None,
            user_agent: None,
        };
        sink.append(old_low.clone()).await.unwrap();
        old_low.severity = Severity::Critical;
        sink.append(old_low.clone()).await.unwrap();
        old_low.severity = Severity::Low;
        old_low.created_at = Timestamp::now();
        sink.append(old_low).await.unwrap();

        let pruned = sink
            .prune(Timestamp::now().saturating_sub_millis(1000))
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(sink.records().await.len(), 2);
    }

    #[tokio::test]
    async fn mark_resolved_flips_detection_record() {
        let (sink, _fanout, recorder) = make_recorder(20);
        let conflict_id = ConflictId::new();
        let mut draft = login_draft("u1");
        draft.action = ActivityAction::ConflictDetected;
        draft.task_id = Some(TaskId::new());
        draft.subject = "T".to_string();
        draft.conflict_id = Some(conflict_id.clone());
        draft.is_resolved = false;
        recorder.record(draft);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        recorder.mark_conflict_resolved(&conflict_id);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(recorder.recent()[0].is_resolved);
        assert!(sink.records().await[0].is_resolved);
    }
}
