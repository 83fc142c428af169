//! Types shared by the scenesync server and clients.
//!
//! - [`model`]: scene objects, partial patches and session rows
//! - [`protocol`]: the messages carried on a room connection
//! - [`wire`]: frame codec used by both ends of the connection
//! - [`tasks`]: the keyed cancel-and-replace scheduler behind every debounce

pub mod error;
pub mod ids;
pub mod model;
pub mod protocol;
pub mod tasks;
pub mod ticket;
pub mod wire;

pub use error::{ErrorKind, StoreError, SyncError};
pub use ids::{ConnectionId, ObjectId, RoomId, UserId};
pub use model::{GeometryPayload, NewObject, ObjectPatch, SceneObject, SessionInfo, now_ms};
pub use protocol::{ClientMessage, ServerMessage};
pub use tasks::KeyedTasks;

pub use scenesync_geometry::{Color, Transform, Vec3};
