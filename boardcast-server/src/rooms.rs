//! Room membership and fan-out.
//!
//! The [`RoomRouter`] maps rooms to member sessions and owns the sending
//! half of every session's bounded outbound queue. Broadcasts never block:
//! a member whose queue is full is dropped from all rooms and its
//! connection closed with reason `slow-consumer`, without delaying
//! delivery to anyone else.
//!
//! Services consume the router through the [`Fanout`] trait so they stay
//! testable without a live socket layer.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use boardcast_proto::frame::{RoomKind, RoomRef, ServerEvent, ServerFrame};
use boardcast_proto::task::{TaskId, Timestamp, UserId};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

/// Identifier for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a fresh session identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fan-out target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// The singleton board room. Every session joins at handshake.
    Board,
    /// Detail room for one task.
    Task(TaskId),
    /// Per-user room, joined automatically at handshake.
    User(UserId),
    /// The activity feed.
    Activity,
}

impl RoomId {
    /// Resolves a wire [`RoomRef`] into a room, if the reference is valid.
    #[must_use]
    pub fn from_ref(room: &RoomRef) -> Option<Self> {
        match room.room_kind {
            RoomKind::Board => Some(Self::Board),
            RoomKind::Activity => Some(Self::Activity),
            RoomKind::Task => {
                let id = room.id.as_deref()?;
                let uuid = Uuid::parse_str(id).ok()?;
                Some(Self::Task(TaskId::from_uuid(uuid)))
            }
            RoomKind::User => room.id.as_deref().map(|id| Self::User(UserId::from(id))),
        }
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Board => write!(f, "board"),
            Self::Task(id) => write!(f, "task:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
            Self::Activity => write!(f, "activity"),
        }
    }
}

/// Why a session is being closed from the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Handshake credential was rejected.
    Unauthenticated,
    /// Outbound queue overflowed during a broadcast.
    SlowConsumer,
}

impl CloseReason {
    /// Wire reason string carried on the close frame.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::SlowConsumer => "slow-consumer",
        }
    }
}

/// Signals the session's writer task to close the socket.
#[derive(Default)]
pub struct SessionCloser {
    reason: parking_lot::Mutex<Option<CloseReason>>,
    notify: Notify,
}

impl SessionCloser {
    /// Requests the writer to close with the given reason. First request
    /// wins.
    pub fn request(&self, reason: CloseReason) {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
        drop(slot);
        self.notify.notify_one();
    }

    /// Suspends until a close is requested, then returns the reason.
    pub async fn requested(&self) -> CloseReason {
        self.notify.notified().await;
        self.reason.lock().unwrap_or(CloseReason::SlowConsumer)
    }
}

struct SessionHandle {
    user_id: UserId,
    connected_at: Timestamp,
    tx: mpsc::Sender<ServerFrame>,
    closer: Arc<SessionCloser>,
}

/// Fan-out interface injected into the services.
pub trait Fanout: Send + Sync {
    /// Adds a session to a room. Unknown sessions are ignored.
    fn join(&self, session: SessionId, room: RoomId);

    /// Removes a session from a room.
    fn leave(&self, session: SessionId, room: &RoomId);

    /// Delivers an event to every member of the union of `rooms`, at most
    /// once per session, skipping `except`. Never blocks; overflowing
    /// members are dropped.
    fn broadcast(&self, rooms: &[RoomId], event: &ServerEvent, except: Option<SessionId>);

    /// Enqueues a frame for a single session. Returns `false` if the
    /// session is unknown or was dropped for overflowing.
    fn send(&self, session: SessionId, frame: ServerFrame) -> bool;

    /// Current members of a room.
    fn members(&self, room: &RoomId) -> Vec<SessionId>;

    /// Distinct users with at least one live session, sorted.
    fn online_users(&self) -> Vec<UserId>;
}

/// Concrete router: process-wide membership map plus the session registry.
#[derive(Default)]
pub struct RoomRouter {
    rooms: parking_lot::RwLock<HashMap<RoomId, HashSet<SessionId>>>,
    sessions: parking_lot::RwLock<HashMap<SessionId, SessionHandle>>,
}

impl RoomRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session, creating its bounded outbound queue.
    ///
    /// Returns the receiving half for the session's writer task and the
    /// closer used to signal server-side closes.
    pub fn register(
        &self,
        session: SessionId,
        user_id: UserId,
        queue_depth: usize,
    ) -> (mpsc::Receiver<ServerFrame>, Arc<SessionCloser>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let closer = Arc::new(SessionCloser::default());
        let handle = SessionHandle {
            user_id,
            connected_at: Timestamp::now(),
            tx,
            closer: Arc::clone(&closer),
        };
        self.sessions.write().insert(session, handle);
        (rx, closer)
    }

    /// Removes a session from the registry and from every room.
    ///
    /// Returns `true` if the session was still registered.
    pub fn unregister(&self, session: SessionId) -> bool {
        let removed = self.sessions.write().remove(&session);
        let mut rooms = self.rooms.write();
        rooms.retain(|_, members| {
            members.remove(&session);
            !members.is_empty()
        });
        drop(rooms);
        removed.is_some()
    }

    /// The user behind a session, if it is registered.
    #[must_use]
    pub fn user_of(&self, session: SessionId) -> Option<UserId> {
        self.sessions.read().get(&session).map(|h| h.user_id.clone())
    }

    /// When the session connected, if it is registered.
    #[must_use]
    pub fn connected_since(&self, session: SessionId) -> Option<Timestamp> {
        self.sessions.read().get(&session).map(|h| h.connected_at)
    }

    /// Drops an overflowing session: unregisters it everywhere, signals its
    /// writer to close `slow-consumer`, and re-announces presence.
    fn drop_slow(&self, session: SessionId) {
        let closer = self
            .sessions
            .read()
            .get(&session)
            .map(|h| Arc::clone(&h.closer));
        if self.unregister(session) {
            tracing::warn!(session = %session, "outbound queue full, dropping slow consumer");
            if let Some(closer) = closer {
                closer.request(CloseReason::SlowConsumer);
            }
            let users = self.online_users();
            self.broadcast(&[RoomId::Board], &ServerEvent::UsersUpdated { users }, None);
        }
    }
}

impl Fanout for RoomRouter {
    fn join(&self, session: SessionId, room: RoomId) {
        if !self.sessions.read().contains_key(&session) {
            return;
        }
        self.rooms.write().entry(room).or_default().insert(session);
    }

    fn leave(&self, session: SessionId, room: &RoomId) {
        let mut rooms = self.rooms.write();
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&session);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    fn broadcast(&self, rooms: &[RoomId], event: &ServerEvent, except: Option<SessionId>) {
        let targets: Vec<SessionId> = {
            let room_map = self.rooms.read();
            let mut union: BTreeSet<SessionId> = BTreeSet::new();
            for room in rooms {
                if let Some(members) = room_map.get(room) {
                    union.extend(members.iter().copied());
                }
            }
            union
                .into_iter()
                .filter(|s| Some(*s) != except)
                .collect()
        };

        let mut overflowed = Vec::new();
        {
            let sessions = self.sessions.read();
            for target in targets {
                let Some(handle) = sessions.get(&target) else {
                    continue;
                };
                let frame = ServerFrame::broadcast(event.clone());
                if handle.tx.try_send(frame).is_err() {
                    overflowed.push(target);
                }
            }
        }
        for session in overflowed {
            self.drop_slow(session);
        }
    }

    fn send(&self, session: SessionId, frame: ServerFrame) -> bool {
        let delivered = {
            let sessions = self.sessions.read();
            match sessions.get(&session) {
                Some(handle) => handle.tx.try_send(frame).is_ok(),
                None => return false,
            }
        };
        if !delivered {
            self.drop_slow(session);
        }
        delivered
    }

    fn members(&self, room: &RoomId) -> Vec<SessionId> {
        self.rooms
            .read()
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    fn online_users(&self) -> Vec<UserId> {
        let sessions = self.sessions.read();
        let users: BTreeSet<UserId> = sessions.values().map(|h| h.user_id.clone()).collect();
        users.into_iter().collect()
    }
}
