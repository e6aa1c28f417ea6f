//! Property tests: the board invariants hold after any command sequence.
//!
//! Drives the task service with arbitrary sequences of mutations and then
//! checks, over the surviving state:
//! - titles are pairwise distinct under case-folding and never reserved,
//! - every assignee is an active user,
//! - each column's positions are a permutation of `0..n-1`,
//! - versions only ever increase (comments and no-op moves excepted).

use std::sync::Arc;

use boardcast_proto::task::{Priority, TaskId, TaskInput, TaskPatch, TaskStatus, UserId};
use boardcast_proto::user::{Role, User};
use boardcast_server::config::Limits;
use boardcast_server::conflict::ConflictController;
use boardcast_server::error::ServiceError;
use boardcast_server::store::{MemoryTaskStore, MemoryUserDirectory, TaskStore};
use boardcast_server::tasks::TaskService;
use proptest::prelude::*;

// =============================================================================
// Command model
// =============================================================================

#[derive(Debug, Clone)]
enum Cmd {
    Create {
        title: usize,
        status: TaskStatus,
        priority: Priority,
    },
    Retitle {
        task: usize,
        title: usize,
    },
    Reprioritize {
        task: usize,
        priority: Priority,
    },
    Move {
        task: usize,
        to_status: TaskStatus,
        to_position: u32,
    },
    Assign {
        task: usize,
        user: Option<usize>,
    },
    Comment {
        task: usize,
    },
    Archive {
        task: usize,
    },
    Delete {
        task: usize,
    },
    StaleUpdate {
        task: usize,
    },
}

const USERS: [&str; 3] = ["u1", "u2", "u3"];

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Todo),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Done),
    ]
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High),
        Just(Priority::Urgent),
    ]
}

fn arb_cmd() -> impl Strategy<Value = Cmd> {
    prop_oneof![
        (0usize..24, arb_status(), arb_priority())
            .prop_map(|(title, status, priority)| Cmd::Create {
                title,
                status,
                priority
            }),
        (0usize..16, 0usize..24).prop_map(|(task, title)| Cmd::Retitle { task, title }),
        (0usize..16, arb_priority())
            .prop_map(|(task, priority)| Cmd::Reprioritize { task, priority }),
        (0usize..16, arb_status(), 0u32..8).prop_map(|(task, to_status, to_position)| {
            Cmd::Move {
                task,
                to_status,
                to_position,
            }
        }),
        (0usize..16, proptest::option::of(0usize..USERS.len()))
            .prop_map(|(task, user)| Cmd::Assign { task, user }),
        (0usize..16).prop_map(|task| Cmd::Comment { task }),
        (0usize..16).prop_map(|task| Cmd::Archive { task }),
        (0usize..16).prop_map(|task| Cmd::Delete { task }),
        (0usize..16).prop_map(|task| Cmd::StaleUpdate { task }),
    ]
}

// =============================================================================
// Execution harness
// =============================================================================

fn make_service() -> (TaskService, Arc<MemoryTaskStore>) {
    let store = Arc::new(MemoryTaskStore::new());
    let mut users: Vec<User> = USERS
        .iter()
        .map(|id| User {
            id: UserId::from(*id),
            display_name: (*id).to_string(),
            role: Role::Member,
            is_active: true,
        })
        .collect();
    users.push(User {
        id: UserId::from("ghost"),
        display_name: "ghost".to_string(),
        role: Role::Member,
        is_active: false,
    });
    let service = TaskService::new(
        Arc::clone(&store) as Arc<dyn TaskStore>,
        Arc::new(MemoryUserDirectory::with_users(users)),
        Arc::new(ConflictController::new()),
        Limits::default(),
    );
    (service, store)
}

async fn run_commands(cmds: Vec<Cmd>) {
    let (service, store) = make_service();
    let actor = UserId::from("u1");
    let mut created: Vec<TaskId> = Vec::new();

    for cmd in cmds {
        let pick = |idx: usize, created: &[TaskId]| -> Option<TaskId> {
            if created.is_empty() {
                None
            } else {
                Some(created[idx % created.len()].clone())
            }
        };

        match cmd {
            Cmd::Create {
                title,
                status,
                priority,
            } => {
                let input = TaskInput {
                    title: format!("Task {title}"),
                    status,
                    priority,
                    ..TaskInput::default()
                };
                if let Ok(mutation) = service.create(input, &actor).await {
                    assert_eq!(mutation.task.version, 1);
                    created.push(mutation.task.id);
                }
            }
            Cmd::Retitle { task, title } => {
                let Some(id) = pick(task, &created) else { continue };
                let Ok(before) = service.get(&id).await else {
                    continue;
                };
                let patch = TaskPatch {
                    title: Some(format!("Task {title}")),
                    ..TaskPatch::default()
                };
                if let Ok(mutation) = service
                    .update(&id, patch, &actor, Some(before.version))
                    .await
                {
                    assert!(mutation.task.version > before.version);
                }
            }
            Cmd::Reprioritize { task, priority } => {
                let Some(id) = pick(task, &created) else { continue };
                let Ok(before) = service.get(&id).await else {
                    continue;
                };
                let patch = TaskPatch {
                    priority: Some(priority),
                    ..TaskPatch::default()
                };
                if let Ok(mutation) = service
                    .update(&id, patch, &actor, Some(before.version))
                    .await
                {
                    assert!(mutation.task.version > before.version);
                }
            }
            Cmd::Move {
                task,
                to_status,
                to_position,
            } => {
                let Some(id) = pick(task, &created) else { continue };
                let Ok(before) = service.get(&id).await else {
                    continue;
                };
                if let Ok(mutation) = service
                    .move_task(&id, to_status, to_position, &actor, before.version)
                    .await
                {
                    let moved_slot = before.status == mutation.task.status
                        && before.position == mutation.task.position;
                    if moved_slot {
                        assert_eq!(mutation.task.version, before.version);
                    } else {
                        assert!(mutation.task.version > before.version);
                    }
                }
            }
            Cmd::Assign { task, user } => {
                let Some(id) = pick(task, &created) else { continue };
                let Ok(before) = service.get(&id).await else {
                    continue;
                };
                let assignee = user.map(|u| UserId::from(USERS[u]));
                if let Ok(mutation) =
                    service.assign(&id, assignee, &actor, before.version).await
                {
                    assert!(mutation.task.version > before.version);
                }
            }
            Cmd::Comment { task } => {
                let Some(id) = pick(task, &created) else { continue };
                let Ok(before) = service.get(&id).await else {
                    continue;
                };
                if let Ok(mutation) = service.comment(&id, "note".to_string(), &actor).await {
                    assert_eq!(mutation.task.version, before.version);
                }
            }
            Cmd::Archive { task } => {
                let Some(id) = pick(task, &created) else { continue };
                let _ = service.archive(&id, &actor).await;
            }
            Cmd::Delete { task } => {
                let Some(id) = pick(task, &created) else { continue };
                let _ = service.delete(&id, &actor).await;
            }
            Cmd::StaleUpdate { task } => {
                let Some(id) = pick(task, &created) else { continue };
                if service.get(&id).await.is_err() {
                    continue;
                }
                let patch = TaskPatch {
                    description: Some("stale".to_string()),
                    ..TaskPatch::default()
                };
                // Version 0 is always behind; this must never corrupt
                // state, only report a conflict.
                let err = service.update(&id, patch, &actor, Some(0)).await;
                assert!(matches!(err, Err(ServiceError::Conflict(_))));
            }
        }
    }

    check_invariants(&store).await;
}

async fn check_invariants(store: &MemoryTaskStore) {
    let live: Vec<_> = store
        .all()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| !t.is_archived)
        .collect();

    // I1: case-folded unique titles.
    let mut folded: Vec<String> = live.iter().map(|t| t.title.to_lowercase()).collect();
    folded.sort();
    let before = folded.len();
    folded.dedup();
    assert_eq!(folded.len(), before, "duplicate case-folded titles");

    // I2: no reserved titles.
    assert!(
        live.iter()
            .all(|t| !boardcast_proto::task::is_reserved_title(&t.title)),
        "reserved title slipped through"
    );

    // I3: assignees are active users ("ghost" is the only inactive one).
    assert!(
        live.iter()
            .all(|t| t.assigned_to.as_ref().is_none_or(|a| a.as_str() != "ghost")),
        "inactive assignee"
    );

    // I4: positions are a permutation of 0..n-1 per column.
    for status in TaskStatus::ALL {
        let mut positions: Vec<u32> = live
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.position)
            .collect();
        positions.sort_unstable();
        let expected: Vec<u32> = (0..positions.len() as u32).collect();
        assert_eq!(positions, expected, "column {status} positions not contiguous");
    }

    // I5: versions are at least 1 everywhere.
    assert!(live.iter().all(|t| t.version >= 1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn invariants_hold_after_any_command_sequence(cmds in prop::collection::vec(arb_cmd(), 1..48)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        rt.block_on(run_commands(cmds));
    }
}

// =============================================================================
// Concurrency: losers observe the winner's version
// =============================================================================

#[tokio::test]
async fn concurrent_same_version_updates_let_exactly_one_win() {
    let (service, _store) = make_service();
    let service = Arc::new(service);
    let actor1 = UserId::from("u1");
    let actor2 = UserId::from("u2");

    let task = service
        .create(
            TaskInput {
                title: "Contested".to_string(),
                ..TaskInput::default()
            },
            &actor1,
        )
        .await
        .unwrap()
        .task;

    let patch1 = TaskPatch {
        description: Some("first".to_string()),
        ..TaskPatch::default()
    };
    let patch2 = TaskPatch {
        description: Some("second".to_string()),
        ..TaskPatch::default()
    };

    let (r1, r2) = tokio::join!(
        service.update(&task.id, patch1, &actor1, Some(1)),
        service.update(&task.id, patch2, &actor2, Some(1)),
    );

    let (winner, loser) = match (r1, r2) {
        (Ok(w), Err(l)) => (w, l),
        (Err(l), Ok(w)) => (w, l),
        (Ok(_), Ok(_)) => panic!("both updates won against the same version"),
        (Err(_), Err(_)) => panic!("both updates lost"),
    };

    assert_eq!(winner.task.version, 2);
    let ServiceError::Conflict(descriptor) = loser else {
        panic!("loser must fail with Conflict");
    };
    assert_eq!(descriptor.client_version, 1);
    assert_eq!(
        descriptor.server_version, winner.task.version,
        "the loser observes the winner's version"
    );
}

#[tokio::test]
async fn create_update_get_round_trip() {
    let (service, _store) = make_service();
    let actor = UserId::from("u1");
    let task = service
        .create(
            TaskInput {
                title: "Round trip".to_string(),
                ..TaskInput::default()
            },
            &actor,
        )
        .await
        .unwrap()
        .task;

    service
        .update(
            &task.id,
            TaskPatch {
                description: Some("updated".to_string()),
                ..TaskPatch::default()
            },
            &actor,
            Some(1),
        )
        .await
        .unwrap();

    let fetched = service.get(&task.id).await.unwrap();
    assert_eq!(fetched.description, "updated");
    assert_eq!(fetched.version, 2);
}
