//! Storage seams for the external persistence collaborators.
//!
//! [`TaskStore`] is the persistence contract for task records; the store is
//! assumed to provide linearisable single-document reads and writes keyed by
//! task id. [`UserDirectory`] is the read-only view of externally managed
//! users. In-memory implementations back tests and the dev binary.

use std::collections::HashMap;

use async_trait::async_trait;
use boardcast_proto::task::{Task, TaskId, UserId};
use boardcast_proto::user::User;
use tokio::sync::RwLock;

use crate::error::ServiceError;

/// Errors from a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not serve the request.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Persistence contract for task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetches one task by id, archived or not.
    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// Returns every stored task, archived included. Callers filter.
    async fn all(&self) -> Result<Vec<Task>, StoreError>;

    /// Inserts or replaces a task record.
    async fn put(&self, task: Task) -> Result<(), StoreError>;

    /// Hard-deletes a task record. Returns `true` if it existed.
    async fn remove(&self, id: &TaskId) -> Result<bool, StoreError>;
}

/// In-memory task store.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(id).cloned())
    }

    async fn all(&self) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().cloned().collect())
    }

    async fn put(&self, task: Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn remove(&self, id: &TaskId) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        Ok(tasks.remove(id).is_some())
    }
}

/// Read-only view of the externally managed user directory.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fetches one user by id.
    async fn get(&self, id: &UserId) -> Result<Option<User>, StoreError>;

    /// Returns every active user.
    async fn active(&self) -> Result<Vec<User>, StoreError>;
}

/// In-memory user directory, populated at construction.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<UserId, User>>,
}

impl MemoryUserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory holding the given users.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let map = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: RwLock::new(map),
        }
    }

    /// Adds or replaces a user. The core never calls this; it exists for
    /// boot-time seeding and tests.
    pub async fn upsert(&self, user: User) {
        let mut users = self.users.write().await;
        users.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(id).cloned())
    }

    async fn active(&self) -> Result<Vec<User>, StoreError> {
        let users = self.users.read().await;
        let mut active: Vec<User> = users.values().filter(|u| u.is_active).cloned().collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardcast_proto::task::{Priority, TaskStatus, Timestamp};
    use boardcast_proto::user::Role;

    fn make_task(title: &str) -> Task {
        Task {
            id: TaskId::new(),
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            assigned_to: None,
            created_by: UserId::from("u1"),
            due_date: None,
            tags: vec![],
            position: 0,
            version: 1,
            created_at: Timestamp::from_millis(0),
            last_modified_at: Timestamp::from_millis(0),
            last_modified_by: UserId::from("u1"),
            is_archived: false,
            archived_at: None,
            archived_by: None,
            comments: vec![],
        }
    }

    fn make_user(id: &str, active: bool) -> User {
        User {
            id: UserId::from(id),
            display_name: id.to_uppercase(),
            role: Role::Member,
            is_active: active,
        }
    }

    #[tokio::test]
    async fn put_and_get_round_trip() {
        let store = MemoryTaskStore::new();
        let task = make_task("A");
        store.put(task.clone()).await.unwrap();
        assert_eq!(store.get(&task.id).await.unwrap(), Some(task));
    }

    #[tokio::test]
    async fn get_unknown_returns_none() {
        let store = MemoryTaskStore::new();
        assert!(store.get(&TaskId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_replaces_existing() {
        let store = MemoryTaskStore::new();
        let mut task = make_task("A");
        store.put(task.clone()).await.unwrap();
        task.version = 2;
        store.put(task.clone()).await.unwrap();
        assert_eq!(store.get(&task.id).await.unwrap().unwrap().version, 2);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_reports_existence() {
        let store = MemoryTaskStore::new();
        let task = make_task("A");
        store.put(task.clone()).await.unwrap();
        assert!(store.remove(&task.id).await.unwrap());
        assert!(!store.remove(&task.id).await.unwrap());
    }

    #[tokio::test]
    async fn directory_filters_active_users() {
        let dir =
            MemoryUserDirectory::with_users([make_user("a", true), make_user("b", false)]);
        let active = dir.active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, UserId::from("a"));
        assert!(dir.get(&UserId::from("b")).await.unwrap().is_some());
    }
}
