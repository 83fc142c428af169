//! Holding a join request until it can be served.
//!
//! A join needs a live transport and a known identity. Until both are in
//! place the request waits in a single slot; asking again overwrites it, so
//! only the most recent room is ever joined.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use scenesync_core::{ClientMessage, RoomId, UserId};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::config::MIN_TICK;

/// Who this client is, as supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub user_email: Option<String>,
}

impl Identity {
    pub fn new(user_id: UserId, user_email: Option<String>) -> Self {
        Self {
            user_id,
            user_email,
        }
    }
}

#[derive(Debug, Default)]
pub struct JoinGate {
    pending: Option<RoomId>,
    identity: Option<Identity>,
    connected: bool,
}

impl JoinGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.connected && self.identity.is_some()
    }

    pub fn pending(&self) -> Option<&RoomId> {
        self.pending.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Ask to join `room_id`. Returns the message to send if the join can go
    /// out now; otherwise it is held, replacing any earlier request.
    pub fn request(&mut self, room_id: RoomId) -> Option<ClientMessage> {
        if let Some(previous) = self.pending.replace(room_id) {
            debug!(room = %previous, "superseded pending join");
        }
        self.poll()
    }

    /// Release the held request if its preconditions now hold
    pub fn poll(&mut self) -> Option<ClientMessage> {
        if !self.is_ready() {
            return None;
        }
        let room_id = self.pending.take()?;
        let identity = self.identity.as_ref()?;
        Some(ClientMessage::JoinRoom {
            room_id,
            user_id: identity.user_id.clone(),
            user_email: identity.user_email.clone(),
        })
    }
}

/// Shared gate, touched by the UI side and the pump task
pub type SharedJoinGate = Arc<Mutex<JoinGate>>;

pub(crate) fn with_gate<R>(gate: &SharedJoinGate, f: impl FnOnce(&mut JoinGate) -> R) -> R {
    let mut guard = gate.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut *guard)
}

/// Check the gate every `every` (at least 1 ms) and forward a released join
/// to `outbound`. Ends when `outbound` closes.
pub async fn pump(gate: SharedJoinGate, outbound: mpsc::Sender<ClientMessage>, every: Duration) {
    let mut ticker = tokio::time::interval(every.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if outbound.is_closed() {
            return;
        }
        let Some(msg) = with_gate(&gate, JoinGate::poll) else {
            continue;
        };
        debug!("flushing held join");
        if outbound.send(msg).await.is_err() {
            return;
        }
    }
}
