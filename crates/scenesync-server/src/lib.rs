//! Server side of scenesync.
//!
//! The [`RoomServer`] dispatcher owns the session & room [`Registry`] and the
//! replication gateway; storage is reached through the [`Store`] trait and
//! connections arrive through the iroh [`transport`].

pub mod config;
mod gateway;
pub mod registry;
pub mod server;
mod sessions;
pub mod store;
pub mod transport;

pub use config::{ServerConfig, default_data_path};
pub use registry::{Membership, Registry};
pub use server::{RoomServer, ServerEvent, ServerHandle, SessionKey, UpdateKey};
pub use store::{MemoryStore, Store};
