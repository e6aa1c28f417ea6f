//! Smart-Assign fairness: the least-loaded active users are chosen
//! uniformly at random (end-to-end scenario 5).

use std::collections::HashMap;
use std::sync::Arc;

use boardcast_proto::task::{Priority, Task, TaskId, TaskInput, TaskStatus, Timestamp, UserId};
use boardcast_proto::user::{Role, User};
use boardcast_server::assign::AssignmentEngine;
use boardcast_server::config::Limits;
use boardcast_server::conflict::ConflictController;
use boardcast_server::error::ServiceError;
use boardcast_server::store::{MemoryTaskStore, MemoryUserDirectory, TaskStore, UserDirectory};
use boardcast_server::tasks::TaskService;

fn make_user(id: &str) -> User {
    User {
        id: UserId::from(id),
        display_name: id.to_uppercase(),
        role: Role::Member,
        is_active: true,
    }
}

fn make_assigned_task(n: usize, assignee: &str, status: TaskStatus) -> Task {
    Task {
        id: TaskId::new(),
        title: format!("Load {n}"),
        description: String::new(),
        status,
        priority: Priority::Medium,
        assigned_to: Some(UserId::from(assignee)),
        created_by: UserId::from("creator"),
        due_date: None,
        tags: vec![],
        position: 0,
        version: 1,
        created_at: Timestamp::from_millis(0),
        last_modified_at: Timestamp::from_millis(0),
        last_modified_by: UserId::from("creator"),
        is_archived: false,
        archived_at: None,
        archived_by: None,
        comments: vec![],
    }
}

/// Fixed setup from the spec scenario: A and D carry two active tasks
/// each, B and C are idle.
async fn fixed_load_engine() -> AssignmentEngine {
    let store = Arc::new(MemoryTaskStore::new());
    store
        .put(make_assigned_task(0, "A", TaskStatus::Todo))
        .await
        .unwrap();
    store
        .put(make_assigned_task(1, "A", TaskStatus::InProgress))
        .await
        .unwrap();
    store
        .put(make_assigned_task(2, "D", TaskStatus::Todo))
        .await
        .unwrap();
    store
        .put(make_assigned_task(3, "D", TaskStatus::InProgress))
        .await
        .unwrap();

    let users = Arc::new(MemoryUserDirectory::with_users([
        make_user("A"),
        make_user("B"),
        make_user("C"),
        make_user("D"),
    ]));
    AssignmentEngine::new(
        store as Arc<dyn TaskStore>,
        users as Arc<dyn UserDirectory>,
    )
}

#[tokio::test]
async fn fairness_over_1000_picks() {
    let engine = fixed_load_engine().await;

    let mut counts: HashMap<UserId, u32> = HashMap::new();
    for _ in 0..1000 {
        let picked = engine.pick().await.unwrap();
        *counts.entry(picked).or_default() += 1;
    }

    // Only the two idle users are ever picked.
    assert!(!counts.contains_key(&UserId::from("A")));
    assert!(!counts.contains_key(&UserId::from("D")));

    let b = counts.get(&UserId::from("B")).copied().unwrap_or(0);
    let c = counts.get(&UserId::from("C")).copied().unwrap_or(0);
    assert_eq!(b + c, 1000);
    assert!((450..=550).contains(&b), "B picked {b} times");
    assert!((450..=550).contains(&c), "C picked {c} times");
}

#[tokio::test]
async fn smart_assign_applies_through_version_check() {
    let store = Arc::new(MemoryTaskStore::new());
    let users = Arc::new(MemoryUserDirectory::with_users([make_user("B")]));
    let service = TaskService::new(
        Arc::clone(&store) as Arc<dyn TaskStore>,
        users,
        Arc::new(ConflictController::new()),
        Limits::default(),
    );

    let actor = UserId::from("B");
    let task = service
        .create(
            TaskInput {
                title: "Needs an owner".to_string(),
                ..TaskInput::default()
            },
            &actor,
        )
        .await
        .unwrap()
        .task;

    // The advisory pick still goes through the normal assignment: a stale
    // version is a conflict, not an override.
    let err = service.smart_assign(&task.id, &actor, 0).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    let mutation = service.smart_assign(&task.id, &actor, 1).await.unwrap();
    assert_eq!(mutation.task.assigned_to, Some(UserId::from("B")));
    assert_eq!(mutation.task.version, 2);
}

#[tokio::test]
async fn no_active_user_fails_smart_assign() {
    let store = Arc::new(MemoryTaskStore::new());
    let ghost = User {
        is_active: false,
        ..make_user("ghost")
    };
    let creator = make_user("creator");
    let users = Arc::new(MemoryUserDirectory::with_users([ghost, creator.clone()]));
    let service = TaskService::new(
        Arc::clone(&store) as Arc<dyn TaskStore>,
        Arc::clone(&users) as Arc<dyn UserDirectory>,
        Arc::new(ConflictController::new()),
        Limits::default(),
    );

    let task = service
        .create(
            TaskInput {
                title: "Orphan".to_string(),
                ..TaskInput::default()
            },
            &creator.id,
        )
        .await
        .unwrap()
        .task;

    // Deactivate the only active user, then smart-assign has no candidates.
    users
        .upsert(User {
            is_active: false,
            ..creator.clone()
        })
        .await;
    let err = service.smart_assign(&task.id, &creator.id, 1).await.unwrap_err();
    assert!(matches!(err, ServiceError::NoEligibleUser));
}
