//! Client side of scenesync.
//!
//! - [`ClientMirror`]: the local replica, with optimistic local edits
//! - [`Interpolator`]: eases remote transform and color changes into the [`Scene`]
//! - [`HistoryEngine`]: local undo/redo that replicates its reversals
//! - [`RoomClient`]: the iroh connection, with a held-join gate
//! - [`EventDispatcher`]: typed handlers for server messages

pub mod config;
pub mod connection;
pub mod events;
pub mod history;
pub mod interpolator;
pub mod join;
pub mod mirror;
pub mod scene;

pub use config::ClientConfig;
pub use connection::{Outbox, RoomClient};
pub use events::{CursorEvent, ErrorEvent, EventDispatcher, PresenceEvent, RoomStateEvent};
pub use history::{BooleanTarget, BulkEntry, HistoryAction, HistoryEngine, ObjectState, Replicator};
pub use interpolator::Interpolator;
pub use join::{Identity, JoinGate};
pub use mirror::ClientMirror;
pub use scene::{RenderedObject, Scene};
