//! Messages exchanged over a room connection.
//!
//! One frame carries exactly one message. Clients send [`ClientMessage`],
//! the server answers and fans out [`ServerMessage`].

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::ids::{ObjectId, RoomId, UserId};
use crate::model::{NewObject, ObjectPatch, SceneObject, SessionInfo};

/// Requests from a client connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom {
        room_id: RoomId,
        user_id: UserId,
        #[serde(default)]
        user_email: Option<String>,
    },
    LeaveRoom,
    CursorUpdate {
        x: f64,
        y: f64,
        z: f64,
    },
    CreateObject {
        object: NewObject,
    },
    UpdateObject {
        id: ObjectId,
        patch: ObjectPatch,
    },
    DeleteObject {
        id: ObjectId,
    },
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::LeaveRoom => "leave-room",
            ClientMessage::CursorUpdate { .. } => "cursor-update",
            ClientMessage::CreateObject { .. } => "create-object",
            ClientMessage::UpdateObject { .. } => "update-object",
            ClientMessage::DeleteObject { .. } => "delete-object",
        }
    }
}

/// Replies and broadcasts from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full snapshot sent to a connection that just joined
    RoomState {
        room_id: RoomId,
        objects: Vec<SceneObject>,
        sessions: Vec<SessionInfo>,
    },
    UserJoined {
        user_id: UserId,
        user_email: String,
    },
    UserLeft {
        user_id: UserId,
        user_email: String,
    },
    CursorUpdated {
        user_id: UserId,
        x: f64,
        y: f64,
        z: f64,
    },
    ObjectCreated {
        object: SceneObject,
    },
    ObjectUpdated {
        object: SceneObject,
    },
    ObjectDeleted {
        id: ObjectId,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl ServerMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::RoomState { .. } => "room-state",
            ServerMessage::UserJoined { .. } => "user-joined",
            ServerMessage::UserLeft { .. } => "user-left",
            ServerMessage::CursorUpdated { .. } => "cursor-updated",
            ServerMessage::ObjectCreated { .. } => "object-created",
            ServerMessage::ObjectUpdated { .. } => "object-updated",
            ServerMessage::ObjectDeleted { .. } => "object-deleted",
            ServerMessage::Error { .. } => "error",
        }
    }
}
