//! Error taxonomy shared by server and client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ObjectId, RoomId};

/// Coarse error class carried on the wire in `error{kind,message}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Disconnects and framing problems
    Transport,
    /// Bad request for the caller's current room. Never retried.
    Validation,
    /// The store could not be reached
    Persistence,
    /// Connection or room ceiling reached. Never retried.
    Capacity,
}

/// Failures reported by the persistent store collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),
    #[error("object {id} does not belong to room {room_id}")]
    ObjectNotInRoom { id: ObjectId, room_id: RoomId },
    #[error("connection has not joined a room")]
    NotInRoom,
    #[error("capacity reached ({limit})")]
    Capacity { limit: usize },
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(String),
    /// A body arrived but would not decode. The stream is still aligned.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Length prefix over the frame limit. The body was not read, so the
    /// stream cannot be resynchronized.
    #[error("frame of {len} bytes exceeds limit")]
    FrameTooLarge { len: usize },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::RoomNotFound(_)
            | SyncError::ObjectNotInRoom { .. }
            | SyncError::NotInRoom
            | SyncError::Protocol(_)
            | SyncError::FrameTooLarge { .. } => ErrorKind::Validation,
            SyncError::Capacity { .. } => ErrorKind::Capacity,
            SyncError::Persistence(_) => ErrorKind::Persistence,
            SyncError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Whether a client may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Persistence | ErrorKind::Transport)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_not_found_is_fatal_validation() {
        let err = SyncError::RoomNotFound(RoomId::new("nope"));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "room not found: nope");
    }

    #[test]
    fn capacity_is_not_retryable() {
        let err = SyncError::Capacity { limit: 2 };
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_failures_are_persistence_errors() {
        let err: SyncError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(err.is_retryable());
    }
}
