//! Typed routing of server messages to registered handlers.
//!
//! One handler slot per message kind. Registering a handler for a kind that
//! already has one replaces it.

use scenesync_core::{ErrorKind, ObjectId, RoomId, SceneObject, ServerMessage, SessionInfo, UserId};
use scenesync_geometry::Vec3;

#[derive(Debug, Clone, PartialEq)]
pub struct RoomStateEvent {
    pub room_id: RoomId,
    pub objects: Vec<SceneObject>,
    pub sessions: Vec<SessionInfo>,
}

/// A peer arrived or left
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEvent {
    pub user_id: UserId,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorEvent {
    pub user_id: UserId,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
}

type Handler<T> = Box<dyn FnMut(T) + Send>;

#[derive(Default)]
pub struct EventDispatcher {
    room_state: Option<Handler<RoomStateEvent>>,
    user_joined: Option<Handler<PresenceEvent>>,
    user_left: Option<Handler<PresenceEvent>>,
    cursor_updated: Option<Handler<CursorEvent>>,
    object_created: Option<Handler<SceneObject>>,
    object_updated: Option<Handler<SceneObject>>,
    object_deleted: Option<Handler<ObjectId>>,
    error: Option<Handler<ErrorEvent>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("room_state", &self.room_state.is_some())
            .field("user_joined", &self.user_joined.is_some())
            .field("user_left", &self.user_left.is_some())
            .field("cursor_updated", &self.cursor_updated.is_some())
            .field("object_created", &self.object_created.is_some())
            .field("object_updated", &self.object_updated.is_some())
            .field("object_deleted", &self.object_deleted.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_room_state(&mut self, f: impl FnMut(RoomStateEvent) + Send + 'static) -> &mut Self {
        self.room_state = Some(Box::new(f));
        self
    }

    pub fn on_user_joined(&mut self, f: impl FnMut(PresenceEvent) + Send + 'static) -> &mut Self {
        self.user_joined = Some(Box::new(f));
        self
    }

    pub fn on_user_left(&mut self, f: impl FnMut(PresenceEvent) + Send + 'static) -> &mut Self {
        self.user_left = Some(Box::new(f));
        self
    }

    pub fn on_cursor_updated(&mut self, f: impl FnMut(CursorEvent) + Send + 'static) -> &mut Self {
        self.cursor_updated = Some(Box::new(f));
        self
    }

    pub fn on_object_created(&mut self, f: impl FnMut(SceneObject) + Send + 'static) -> &mut Self {
        self.object_created = Some(Box::new(f));
        self
    }

    pub fn on_object_updated(&mut self, f: impl FnMut(SceneObject) + Send + 'static) -> &mut Self {
        self.object_updated = Some(Box::new(f));
        self
    }

    pub fn on_object_deleted(&mut self, f: impl FnMut(ObjectId) + Send + 'static) -> &mut Self {
        self.object_deleted = Some(Box::new(f));
        self
    }

    pub fn on_error(&mut self, f: impl FnMut(ErrorEvent) + Send + 'static) -> &mut Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Hand `msg` to its handler. Returns false if no handler is registered
    /// for its kind.
    pub fn dispatch(&mut self, msg: ServerMessage) -> bool {
        match msg {
            ServerMessage::RoomState {
                room_id,
                objects,
                sessions,
            } => call(
                &mut self.room_state,
                RoomStateEvent {
                    room_id,
                    objects,
                    sessions,
                },
            ),
            ServerMessage::UserJoined {
                user_id,
                user_email,
            } => call(
                &mut self.user_joined,
                PresenceEvent {
                    user_id,
                    display_name: user_email,
                },
            ),
            ServerMessage::UserLeft {
                user_id,
                user_email,
            } => call(
                &mut self.user_left,
                PresenceEvent {
                    user_id,
                    display_name: user_email,
                },
            ),
            ServerMessage::CursorUpdated { user_id, x, y, z } => call(
                &mut self.cursor_updated,
                CursorEvent {
                    user_id,
                    position: Vec3::new(x, y, z),
                },
            ),
            ServerMessage::ObjectCreated { object } => call(&mut self.object_created, object),
            ServerMessage::ObjectUpdated { object } => call(&mut self.object_updated, object),
            ServerMessage::ObjectDeleted { id } => call(&mut self.object_deleted, id),
            ServerMessage::Error { kind, message } => {
                call(&mut self.error, ErrorEvent { kind, message })
            }
        }
    }
}

fn call<T>(handler: &mut Option<Handler<T>>, event: T) -> bool {
    match handler {
        Some(f) => {
            f(event);
            true
        }
        None => false,
    }
}
