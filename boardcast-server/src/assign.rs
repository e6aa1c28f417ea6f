//! Smart-Assign: pick the fairest assignee.
//!
//! Load is the count of non-archived tasks assigned to a user with status
//! todo or in-progress. The engine chooses uniformly at random among the
//! active users with minimum load. The choice is advisory; the caller
//! realises it through a normal assignment that still passes the version
//! check.

use std::collections::HashMap;
use std::sync::Arc;

use boardcast_proto::task::{TaskStatus, UserId};
use rand::Rng;

use crate::error::ServiceError;
use crate::store::{TaskStore, UserDirectory};

/// Chooses assignees by active load.
pub struct AssignmentEngine {
    store: Arc<dyn TaskStore>,
    users: Arc<dyn UserDirectory>,
}

impl AssignmentEngine {
    /// Creates an engine over the given store and directory.
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { store, users }
    }

    /// Picks the least-loaded active user, breaking ties uniformly at
    /// random.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NoEligibleUser`] when no active user exists,
    /// or [`ServiceError::Internal`] on a store failure.
    pub async fn pick(&self) -> Result<UserId, ServiceError> {
        let active = self.users.active().await?;
        if active.is_empty() {
            return Err(ServiceError::NoEligibleUser);
        }

        let mut load: HashMap<&UserId, usize> = active.iter().map(|u| (&u.id, 0)).collect();
        for task in self.store.all().await? {
            if task.is_archived {
                continue;
            }
            if !matches!(task.status, TaskStatus::Todo | TaskStatus::InProgress) {
                continue;
            }
            if let Some(assignee) = &task.assigned_to
                && let Some(count) = load.get_mut(assignee)
            {
                *count += 1;
            }
        }

        let min = load.values().copied().min().unwrap_or(0);
        let candidates: Vec<&UserId> = active
            .iter()
            .map(|u| &u.id)
            .filter(|id| load.get(*id).copied() == Some(min))
            .collect();

        let index = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates[index].clone())
    }
}
