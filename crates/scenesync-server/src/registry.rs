//! Live connection and room membership state.
//!
//! The registry is owned by the dispatcher and only touched from its event
//! loop, so it needs no locking. A connection is registered on connect
//! ([`Registry::open`]) and torn down on disconnect ([`Registry::close`]);
//! room membership and cursor state live in between.

use std::collections::{HashMap, HashSet};

use scenesync_core::{
    ConnectionId, RoomId, ServerMessage, SessionInfo, SyncError, UserId, Vec3, now_ms,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Room membership of one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub user_email: Option<String>,
    pub cursor: Vec3,
    pub last_seen: u64,
}

impl Membership {
    pub fn to_session(&self) -> SessionInfo {
        SessionInfo {
            user_id: self.user_id.clone(),
            room_id: self.room_id.clone(),
            user_email: self.user_email.clone(),
            cursor: self.cursor,
            last_seen: self.last_seen,
        }
    }

    pub fn display_name(&self) -> String {
        scenesync_core::model::display_name(&self.user_id, self.user_email.as_deref())
    }

    /// Key for per-session debounced writes
    pub fn session_key(&self) -> (UserId, RoomId) {
        (self.user_id.clone(), self.room_id.clone())
    }
}

#[derive(Debug)]
struct Connection {
    outbox: mpsc::Sender<ServerMessage>,
    membership: Option<Membership>,
}

#[derive(Debug)]
pub struct Registry {
    max_connections: usize,
    next_id: u64,
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl Registry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            next_id: 1,
            connections: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    /// Register a new connection, or refuse it if the ceiling is reached
    pub fn open(&mut self, outbox: mpsc::Sender<ServerMessage>) -> Result<ConnectionId, SyncError> {
        if self.connections.len() >= self.max_connections {
            return Err(SyncError::Capacity {
                limit: self.max_connections,
            });
        }
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connections.insert(
            id,
            Connection {
                outbox,
                membership: None,
            },
        );
        Ok(id)
    }

    /// Drop a connection. Returns the membership it held, if any.
    pub fn close(&mut self, conn: ConnectionId) -> Option<Membership> {
        let membership = self.leave(conn);
        self.connections.remove(&conn);
        membership
    }

    pub fn is_open(&self, conn: ConnectionId) -> bool {
        self.connections.contains_key(&conn)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_size(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, HashSet::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Put `conn` into `room_id`, replacing any previous membership.
    ///
    /// Returns the membership that was replaced so the caller can announce
    /// the departure from the old room.
    pub fn join(
        &mut self,
        conn: ConnectionId,
        room_id: RoomId,
        user_id: UserId,
        user_email: Option<String>,
    ) -> Option<Membership> {
        let previous = self.leave(conn);
        let Some(connection) = self.connections.get_mut(&conn) else {
            return previous;
        };
        connection.membership = Some(Membership {
            room_id: room_id.clone(),
            user_id,
            user_email,
            cursor: Vec3::ZERO,
            last_seen: now_ms(),
        });
        self.rooms.entry(room_id).or_default().insert(conn);
        previous
    }

    /// Remove `conn` from its room. The connection itself stays open.
    pub fn leave(&mut self, conn: ConnectionId) -> Option<Membership> {
        let membership = self.connections.get_mut(&conn)?.membership.take()?;
        if let Some(members) = self.rooms.get_mut(&membership.room_id) {
            members.remove(&conn);
            if members.is_empty() {
                self.rooms.remove(&membership.room_id);
            }
        }
        Some(membership)
    }

    pub fn membership(&self, conn: ConnectionId) -> Option<&Membership> {
        self.connections.get(&conn)?.membership.as_ref()
    }

    pub fn room_memberships<'a>(&'a self, room_id: &RoomId) -> impl Iterator<Item = &'a Membership> + 'a {
        self.rooms
            .get(room_id)
            .into_iter()
            .flatten()
            .filter_map(|conn| self.membership(*conn))
    }

    /// Refresh last-seen for any activity on `conn`
    pub fn touch(&mut self, conn: ConnectionId) -> Option<&Membership> {
        let membership = self.connections.get_mut(&conn)?.membership.as_mut()?;
        membership.last_seen = now_ms();
        Some(membership)
    }

    pub fn set_cursor(&mut self, conn: ConnectionId, cursor: Vec3) -> Option<&Membership> {
        let membership = self.connections.get_mut(&conn)?.membership.as_mut()?;
        membership.cursor = cursor;
        membership.last_seen = now_ms();
        Some(membership)
    }

    /// Other connections of the same user in the same room
    pub fn has_other_session(&self, conn: ConnectionId, user_id: &UserId, room_id: &RoomId) -> bool {
        self.rooms.get(room_id).is_some_and(|members| {
            members.iter().any(|other| {
                *other != conn
                    && self
                        .membership(*other)
                        .is_some_and(|m| &m.user_id == user_id)
            })
        })
    }

    /// Queue a message for one connection without waiting.
    ///
    /// A full outbox drops the message; the peer catches up on its next
    /// room-state fetch.
    pub fn send_to(&self, conn: ConnectionId, msg: ServerMessage) -> bool {
        let Some(connection) = self.connections.get(&conn) else {
            return false;
        };
        match connection.outbox.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                warn!(%conn, kind = msg.name(), "outbox full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%conn, "outbox closed");
                false
            }
        }
    }

    /// Send to every member of `room_id` except `except`. Returns the number reached.
    pub fn broadcast(
        &self,
        room_id: &RoomId,
        msg: &ServerMessage,
        except: Option<ConnectionId>,
    ) -> usize {
        let Some(members) = self.rooms.get(room_id) else {
            return 0;
        };
        let mut reached = 0;
        for conn in members {
            if Some(*conn) == except {
                continue;
            }
            if self.send_to(*conn, msg.clone()) {
                reached += 1;
            }
        }
        reached
    }
}
