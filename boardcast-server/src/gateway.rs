//! Session gateway: WebSocket endpoint, handshake, and command dispatch.
//!
//! The gateway terminates each client's long-lived connection, authenticates
//! it once at handshake, and runs a reader/writer task pair per session. The
//! writer is the only component touching the socket's send half; everything
//! outbound goes through the session's bounded queue, so frames reach the
//! client in strict FIFO order.
//!
//! The connection lifecycle:
//! 1. Wait for an `auth` frame and verify the token.
//! 2. Register the session, auto-join the board and per-user rooms.
//! 3. Send `session.ready`, announce presence, record a `login` activity.
//! 4. Enter the dispatch loop, routing commands to the services.
//! 5. On disconnect, release edit locks, leave all rooms, record `logout`.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use boardcast_proto::activity::ActivityAction;
use boardcast_proto::conflict::{ConflictId, ResolutionStrategy};
use boardcast_proto::error::{ErrorCode, ErrorData};
use boardcast_proto::frame::{self, ClientCommand, ClientFrame, ServerEvent, ServerFrame};
use boardcast_proto::task::{Task, TaskId, UserId};
use futures_util::{SinkExt, StreamExt};

use crate::activity::{ActivityDraft, ActivityRecorder, ActivitySink};
use crate::auth::CredentialVerifier;
use crate::config::ServerConfig;
use crate::conflict::{ConflictController, EditStart, merge_patch};
use crate::error::ServiceError;
use crate::rooms::{CloseReason, Fanout, RoomId, RoomRouter, SessionId};
use crate::store::{TaskStore, UserDirectory};
use crate::tasks::{Mutation, TaskService};

/// Shared server state wiring the components together.
pub struct AppState {
    pub config: ServerConfig,
    pub router: Arc<RoomRouter>,
    pub tasks: TaskService,
    pub conflicts: Arc<ConflictController>,
    pub activity: Arc<ActivityRecorder>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub users: Arc<dyn UserDirectory>,
}

impl AppState {
    /// Wires the core components around the injected external
    /// collaborators.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn TaskStore>,
        users: Arc<dyn UserDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
        sink: Arc<dyn ActivitySink>,
    ) -> Arc<Self> {
        let router = Arc::new(RoomRouter::new());
        let conflicts = Arc::new(ConflictController::new());
        let tasks = TaskService::new(
            Arc::clone(&store),
            Arc::clone(&users),
            Arc::clone(&conflicts),
            config.limits,
        );
        let activity = Arc::new(ActivityRecorder::new(
            sink,
            Arc::clone(&router) as Arc<dyn Fanout>,
            config.activity_ring_size,
            config.activity_retention_days,
        ));
        Arc::new(Self {
            config,
            router,
            tasks,
            conflicts,
            activity,
            verifier,
            users,
        })
    }
}

/// Handles an upgraded WebSocket connection for a single client.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Handshake: the first frame must be `auth`.
    let Some((auth_id, token)) = wait_for_auth(&mut ws_receiver).await else {
        reject_unauthenticated(&mut ws_sender, None).await;
        return;
    };

    let principal = match state.verifier.verify(&token).await {
        Ok(principal) => principal,
        Err(e) => {
            tracing::warn!(error = %e, "handshake credential rejected");
            reject_unauthenticated(&mut ws_sender, auth_id).await;
            return;
        }
    };
    let user_id = principal.user_id;
    if !matches!(state.users.get(&user_id).await, Ok(Some(_))) {
        tracing::warn!(user = %user_id, "credential maps to no directory user");
        reject_unauthenticated(&mut ws_sender, auth_id).await;
        return;
    }

    let session = SessionId::new();
    let (mut rx, closer) = state
        .router
        .register(session, user_id.clone(), state.config.outbound_queue_depth);
    state.router.join(session, RoomId::Board);
    state.router.join(session, RoomId::User(user_id.clone()));
    tracing::info!(session = %session, user = %user_id, "session established");

    // The ready frame goes out directly; the writer task owns the socket
    // from here on.
    let ready = ServerFrame::reply(
        auth_id,
        ServerEvent::SessionReady {
            session_id: session.to_string(),
            user_id: user_id.clone(),
        },
    );
    if send_frame(&mut ws_sender, &ready).await.is_err() {
        state.router.unregister(session);
        return;
    }

    state.router.broadcast(
        &[RoomId::Board],
        &ServerEvent::UsersUpdated {
            users: state.router.online_users(),
        },
        None,
    );
    state
        .activity
        .record(ActivityDraft::for_auth(ActivityAction::Login, user_id.clone()));

    // Writer: drains the bounded queue onto the socket, or closes when the
    // router dropped the session.
    let writer_session = session;
    let mut write_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    match frame::encode_server(&frame) {
                        Ok(text) => {
                            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                                tracing::warn!(session = %writer_session, "WebSocket write failed");
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(session = %writer_session, error = %e, "failed to encode outbound frame");
                        }
                    }
                }
                reason = closer.requested() => {
                    let close = CloseFrame {
                        code: 1008,
                        reason: reason.as_str().into(),
                    };
                    let _ = ws_sender.send(Message::Close(Some(close))).await;
                    break;
                }
            }
        }
    });

    // Reader: dispatches inbound frames until the client goes away.
    let reader_state = Arc::clone(&state);
    let reader_user = user_id.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    dispatch(&reader_state, session, &reader_user, text.as_str()).await;
                }
                Message::Close(_) => {
                    tracing::debug!(session = %session, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    cleanup_session(&state, session, &user_id);
}

/// Waits for the first frame, expecting `auth`. Returns the correlation id
/// and token, or `None` if the connection closes or sends anything else.
async fn wait_for_auth(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<(Option<String>, String)> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match frame::decode_client(text.as_str()) {
                Ok(ClientFrame {
                    id,
                    command: ClientCommand::Auth { token },
                }) => return Some((id, token)),
                Ok(other) => {
                    tracing::warn!(frame = ?other.command, "expected auth, got different frame");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode handshake frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip non-text frames (ping/pong) during the handshake.
            }
        }
    }
    None
}

/// Sends an `unauthenticated` error and closes the socket with the same
/// reason.
async fn reject_unauthenticated(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    id: Option<String>,
) {
    let error = ServerFrame::reply(
        id,
        ServerEvent::Error(ErrorData::new(
            ErrorCode::Unauthenticated,
            "credential rejected",
        )),
    );
    let _ = send_frame(ws_sender, &error).await;
    let close = CloseFrame {
        code: 1008,
        reason: CloseReason::Unauthenticated.as_str().into(),
    };
    let _ = ws_sender.send(Message::Close(Some(close))).await;
}

/// Encodes and sends a frame directly on the socket (handshake path only).
async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let text = frame::encode_server(frame)?;
    ws_sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Tears down a disconnected session: releases edit locks, leaves every
/// room, re-announces presence, records a `logout`.
fn cleanup_session(state: &Arc<AppState>, session: SessionId, user_id: &UserId) {
    for (task_id, editor) in state.conflicts.end_all_for(session) {
        state.router.broadcast(
            &[RoomId::Task(task_id.clone())],
            &ServerEvent::EditEnded { task_id, editor },
            None,
        );
    }
    if state.router.unregister(session) {
        state.router.broadcast(
            &[RoomId::Board],
            &ServerEvent::UsersUpdated {
                users: state.router.online_users(),
            },
            None,
        );
    }
    state
        .activity
        .record(ActivityDraft::for_auth(ActivityAction::Logout, user_id.clone()));
    tracing::info!(session = %session, user = %user_id, "session closed");
}

/// Routes one inbound frame to the right service and delivers the outcome.
async fn dispatch(state: &Arc<AppState>, session: SessionId, actor: &UserId, text: &str) {
    let frame = match frame::decode_client(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(session = %session, error = %e, "undecodable frame");
            let error = ServerFrame::broadcast(ServerEvent::Error(ErrorData::new(
                ErrorCode::Validation,
                "malformed frame",
            )));
            state.router.send(session, error);
            return;
        }
    };
    let id = frame.id;

    match frame.command {
        ClientCommand::Auth { .. } => {
            tracing::warn!(session = %session, "duplicate auth on established session");
        }

        ClientCommand::RoomJoin(room_ref) => match RoomId::from_ref(&room_ref) {
            Some(room) => state.router.join(session, room),
            None => deliver_error(
                state,
                session,
                actor,
                id,
                ServiceError::validation("room", "unresolvable room reference"),
            ),
        },
        ClientCommand::RoomLeave(room_ref) => {
            if let Some(room) = RoomId::from_ref(&room_ref) {
                state.router.leave(session, &room);
            }
        }

        ClientCommand::EditStart {
            task_id,
            known_version,
        } => handle_edit_start(state, session, actor, id, task_id, known_version).await,
        ClientCommand::EditEnd { task_id } => {
            if let Some(edit) = state.conflicts.end_edit(&task_id, session) {
                let event = ServerEvent::EditEnded {
                    task_id: task_id.clone(),
                    editor: edit.editor,
                };
                state
                    .router
                    .send(session, ServerFrame::reply(id, event.clone()));
                state
                    .router
                    .broadcast(&[RoomId::Task(task_id)], &event, Some(session));
            }
        }

        ClientCommand::Typing { task_id, is_typing } => {
            let event = ServerEvent::Typing {
                task_id: task_id.clone(),
                user: actor.clone(),
                is_typing,
            };
            state
                .router
                .broadcast(&[RoomId::Task(task_id)], &event, Some(session));
        }
        ClientCommand::Cursor { task_id, position } => {
            let event = ServerEvent::Cursor {
                task_id: task_id.clone(),
                user: actor.clone(),
                position,
            };
            state
                .router
                .broadcast(&[RoomId::Task(task_id)], &event, Some(session));
        }

        ClientCommand::TaskList(filter) => {
            match state.tasks.list(&filter).await {
                Ok(snapshot) => {
                    state
                        .router
                        .send(session, ServerFrame::reply(id, ServerEvent::TaskList(snapshot)));
                }
                Err(e) => deliver_error(state, session, actor, id, e),
            }
        }

        ClientCommand::TaskCreate(input) => {
            let result = state.tasks.create(input, actor).await;
            deliver_outcome(state, session, actor, id, result);
        }
        ClientCommand::TaskUpdate {
            task_id,
            patch,
            known_version,
        } => {
            let result = state.tasks.update(&task_id, patch, actor, known_version).await;
            deliver_outcome(state, session, actor, id, result);
        }
        ClientCommand::TaskMove {
            task_id,
            to_status,
            to_position,
            known_version,
        } => {
            let result = state
                .tasks
                .move_task(&task_id, to_status, to_position, actor, known_version)
                .await;
            deliver_outcome(state, session, actor, id, result);
        }
        ClientCommand::TaskAssign {
            task_id,
            assignee_id,
            known_version,
        } => {
            let result = state
                .tasks
                .assign(&task_id, assignee_id, actor, known_version)
                .await;
            deliver_outcome(state, session, actor, id, result);
        }
        ClientCommand::TaskSmartAssign {
            task_id,
            known_version,
        } => {
            let result = state
                .tasks
                .smart_assign(&task_id, actor, known_version)
                .await;
            deliver_outcome(state, session, actor, id, result);
        }
        ClientCommand::TaskComment { task_id, text } => {
            let result = state.tasks.comment(&task_id, text, actor).await;
            deliver_outcome(state, session, actor, id, result);
        }
        ClientCommand::TaskArchive { task_id } => {
            let result = state.tasks.archive(&task_id, actor).await;
            deliver_outcome(state, session, actor, id, result);
        }
        ClientCommand::TaskDelete { task_id } => {
            let result = state.tasks.delete(&task_id, actor).await;
            deliver_outcome(state, session, actor, id, result);
        }

        ClientCommand::ActivityRecent {} => {
            let activities = state.activity.recent();
            state.router.send(
                session,
                ServerFrame::reply(id, ServerEvent::ActivityRecent { activities }),
            );
        }
        ClientCommand::ActivityPrune { days } => {
            handle_activity_prune(state, session, actor, id, days).await;
        }

        ClientCommand::ConflictResolve {
            task_id,
            conflict_id,
            strategy,
        } => handle_conflict_resolve(state, session, actor, id, task_id, conflict_id, strategy).await,
    }
}

/// Delivers a mutation outcome: the reply (the event frame with the
/// request's correlation id) is enqueued on the originating session first,
/// then the event fans out to its rooms, then the activity is recorded.
fn deliver_outcome(
    state: &Arc<AppState>,
    session: SessionId,
    actor: &UserId,
    id: Option<String>,
    result: Result<Mutation, ServiceError>,
) {
    match result {
        Ok(mutation) => {
            let Mutation {
                event,
                rooms,
                activity,
                ..
            } = mutation;
            state
                .router
                .send(session, ServerFrame::reply(id, event.clone()));
            state.router.broadcast(&rooms, &event, Some(session));
            state.activity.record(activity);
        }
        Err(e) => deliver_error(state, session, actor, id, e),
    }
}

/// Sends an error reply. A version conflict additionally records a
/// `conflict_detected` activity and notifies the task room.
fn deliver_error(
    state: &Arc<AppState>,
    session: SessionId,
    actor: &UserId,
    id: Option<String>,
    error: ServiceError,
) {
    if let ServiceError::Conflict(descriptor) = &error {
        let mut draft = ActivityDraft::for_task(
            ActivityAction::ConflictDetected,
            actor.clone(),
            &descriptor.server_task,
        );
        draft.conflict_id = Some(descriptor.conflict_id.clone());
        draft.is_resolved = false;
        state.activity.record(draft);
        state.router.broadcast(
            &[RoomId::Task(descriptor.server_task.id.clone())],
            &ServerEvent::ConflictDetected {
                conflict: descriptor.clone(),
            },
            Some(session),
        );
    }
    state.router.send(
        session,
        ServerFrame::reply(id, ServerEvent::Error(error.into_error_data())),
    );
}

async fn handle_edit_start(
    state: &Arc<AppState>,
    session: SessionId,
    actor: &UserId,
    id: Option<String>,
    task_id: TaskId,
    known_version: u64,
) {
    let task = match state.tasks.get(&task_id).await {
        Ok(task) => task,
        Err(e) => {
            deliver_error(state, session, actor, id, e);
            return;
        }
    };
    if known_version < task.version {
        tracing::debug!(
            session = %session,
            task_id = %task_id,
            known_version,
            current = task.version,
            "edit started from a stale version"
        );
    }
    match state.conflicts.start_edit(&task_id, actor, session) {
        EditStart::Started => {
            let event = ServerEvent::EditStarted {
                task_id: task_id.clone(),
                editor: actor.clone(),
            };
            state
                .router
                .send(session, ServerFrame::reply(id, event.clone()));
            state
                .router
                .broadcast(&[RoomId::Task(task_id)], &event, Some(session));
        }
        EditStart::Contended { other_editor } => {
            state.router.send(
                session,
                ServerFrame::reply(
                    id,
                    ServerEvent::EditContended {
                        task_id,
                        other_editor,
                    },
                ),
            );
        }
    }
}

async fn handle_activity_prune(
    state: &Arc<AppState>,
    session: SessionId,
    actor: &UserId,
    id: Option<String>,
    days: Option<u32>,
) {
    let is_admin = matches!(
        state.users.get(actor).await,
        Ok(Some(user)) if user.is_admin()
    );
    if !is_admin {
        deliver_error(state, session, actor, id, ServiceError::Forbidden);
        return;
    }
    match state.activity.prune(days).await {
        Ok(pruned) => {
            tracing::info!(actor = %actor, pruned, "activity log pruned");
            state.router.send(
                session,
                ServerFrame::reply(id, ServerEvent::ActivityPruned { pruned }),
            );
        }
        Err(e) => deliver_error(state, session, actor, id, e),
    }
}

async fn handle_conflict_resolve(
    state: &Arc<AppState>,
    session: SessionId,
    actor: &UserId,
    id: Option<String>,
    task_id: TaskId,
    conflict_id: ConflictId,
    strategy: ResolutionStrategy,
) {
    let resolved: Result<Task, ServiceError> = async {
        let current = state.tasks.get(&task_id).await?;
        let pending = state
            .conflicts
            .take(&conflict_id, &task_id)
            .ok_or(ServiceError::UnknownConflict)?;

        match strategy {
            // Discard the client's changes; current server state stands.
            ResolutionStrategy::TakeTheirs => Ok(current),
            // The client resends with the current version; only the intent
            // is recorded here.
            ResolutionStrategy::TakeMine => Ok(current),
            ResolutionStrategy::Merge => {
                let merged = merge_patch(&pending.base, &current, &pending.patch);
                if merged.is_empty() {
                    return Ok(current);
                }
                let mutation = state
                    .tasks
                    .update(&task_id, merged, actor, Some(current.version))
                    .await?;
                let Mutation {
                    event,
                    rooms,
                    activity,
                    task,
                } = mutation;
                // The merged update fans out as a normal task.updated; the
                // resolver's own acknowledgement is the conflict.resolved
                // frame below.
                state.router.broadcast(&rooms, &event, None);
                state.activity.record(activity);
                Ok(task)
            }
        }
    }
    .await;

    match resolved {
        Ok(task) => {
            state.activity.mark_conflict_resolved(&conflict_id);
            let mut draft =
                ActivityDraft::for_task(ActivityAction::ConflictResolved, actor.clone(), &task);
            draft.conflict_id = Some(conflict_id.clone());
            draft.strategy = Some(strategy);
            state.activity.record(draft);

            let event = ServerEvent::ConflictResolved {
                task_id: task_id.clone(),
                conflict_id,
                strategy,
                task,
            };
            state
                .router
                .send(session, ServerFrame::reply(id, event.clone()));
            state
                .router
                .broadcast(&[RoomId::Task(task_id)], &event, Some(session));
        }
        Err(e) => deliver_error(state, session, actor, id, e),
    }
}

/// Starts the server on the given address and returns the bound address and
/// a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<AppState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
