//! The room server: one event loop that owns all room state.
//!
//! Transports hand connections and decoded messages to a [`ServerHandle`];
//! everything that reads or writes the [`Registry`] runs on the dispatcher
//! task, one event at a time. Debounce timers feed their flushes back into
//! the same loop, so no state is shared across tasks.

use std::collections::HashMap;
use std::sync::Arc;

use scenesync_core::{
    ClientMessage, ConnectionId, ErrorKind, KeyedTasks, ObjectId, RoomId, ServerMessage,
    SyncError, UserId, Vec3,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::gateway::PendingUpdate;
use crate::registry::Registry;
use crate::store::Store;

/// Debounce key for object writes
pub type UpdateKey = (ObjectId, RoomId);
/// Debounce key for session (cursor/last-seen) writes
pub type SessionKey = (UserId, RoomId);

const EVENT_QUEUE: usize = 1024;

/// Input to the dispatcher
#[derive(Debug)]
pub enum ServerEvent {
    Connect {
        outbox: mpsc::Sender<ServerMessage>,
        reply: oneshot::Sender<Result<ConnectionId, SyncError>>,
    },
    Message {
        conn: ConnectionId,
        msg: ClientMessage,
    },
    Disconnect {
        conn: ConnectionId,
    },
    /// A debounced object update is due
    FlushUpdate {
        key: UpdateKey,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable entry point used by transports
#[derive(Debug, Clone)]
pub struct ServerHandle {
    events: mpsc::Sender<ServerEvent>,
}

impl ServerHandle {
    /// Register a connection whose messages go to `outbox`.
    ///
    /// Fails with [`SyncError::Capacity`] once the ceiling is reached.
    pub async fn connect(
        &self,
        outbox: mpsc::Sender<ServerMessage>,
    ) -> Result<ConnectionId, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(ServerEvent::Connect { outbox, reply })
            .await
            .map_err(|_| SyncError::Transport("server stopped".into()))?;
        rx.await
            .map_err(|_| SyncError::Transport("server stopped".into()))?
    }

    pub async fn send(&self, conn: ConnectionId, msg: ClientMessage) -> Result<(), SyncError> {
        self.events
            .send(ServerEvent::Message { conn, msg })
            .await
            .map_err(|_| SyncError::Transport("server stopped".into()))
    }

    pub async fn disconnect(&self, conn: ConnectionId) {
        let _ = self.events.send(ServerEvent::Disconnect { conn }).await;
    }

    /// Flush pending writes and stop the dispatcher
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .events
            .send(ServerEvent::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

pub struct RoomServer {
    pub(crate) config: ServerConfig,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) registry: Registry,
    pub(crate) pending_updates: HashMap<UpdateKey, PendingUpdate>,
    pub(crate) update_timers: KeyedTasks<UpdateKey>,
    pub(crate) session_writes: KeyedTasks<SessionKey>,
    /// Weak so that timers alone never keep the dispatcher alive
    pub(crate) events: mpsc::WeakSender<ServerEvent>,
}

impl RoomServer {
    /// Start a dispatcher with a fresh registry
    pub fn spawn(config: ServerConfig, store: Arc<dyn Store>) -> ServerHandle {
        let registry = Registry::new(config.max_connections);
        Self::spawn_with_registry(config, store, registry)
    }

    /// Start a dispatcher around an injected registry
    pub fn spawn_with_registry(
        config: ServerConfig,
        store: Arc<dyn Store>,
        registry: Registry,
    ) -> ServerHandle {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let server = RoomServer {
            config,
            store,
            registry,
            pending_updates: HashMap::new(),
            update_timers: KeyedTasks::new(),
            session_writes: KeyedTasks::new(),
            events: tx.downgrade(),
        };
        tokio::spawn(server.run(rx));
        ServerHandle { events: tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ServerEvent>) {
        while let Some(event) = rx.recv().await {
            if let ServerEvent::Shutdown { reply } = event {
                self.shutdown().await;
                let _ = reply.send(());
                return;
            }
            self.handle_event(event).await;
        }
        self.shutdown().await;
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connect { outbox, reply } => {
                let result = self.registry.open(outbox);
                match &result {
                    Ok(conn) => debug!(%conn, total = self.registry.connection_count(), "connection opened"),
                    Err(err) => info!(%err, "rejecting connection"),
                }
                let _ = reply.send(result);
            }
            ServerEvent::Message { conn, msg } => {
                if !self.registry.is_open(conn) {
                    debug!(%conn, kind = msg.name(), "message for closed connection");
                    return;
                }
                debug!(%conn, kind = msg.name(), "message");
                if let Err(err) = self.handle_message(conn, msg).await {
                    self.report(conn, &err);
                }
            }
            ServerEvent::Disconnect { conn } => {
                self.leave(conn).await;
                self.registry.close(conn);
                debug!(%conn, total = self.registry.connection_count(), "connection closed");
            }
            ServerEvent::FlushUpdate { key } => self.flush_update(key).await,
            ServerEvent::Shutdown { .. } => unreachable!("handled in run"),
        }
    }

    async fn handle_message(&mut self, conn: ConnectionId, msg: ClientMessage) -> Result<(), SyncError> {
        match msg {
            ClientMessage::JoinRoom {
                room_id,
                user_id,
                user_email,
            } => self.join(conn, room_id, user_id, user_email).await,
            ClientMessage::LeaveRoom => {
                self.leave(conn).await;
                Ok(())
            }
            ClientMessage::CursorUpdate { x, y, z } => self.cursor_update(conn, Vec3::new(x, y, z)),
            ClientMessage::CreateObject { object } => self.create_object(conn, object).await,
            ClientMessage::UpdateObject { id, patch } => self.queue_update(conn, id, patch),
            ClientMessage::DeleteObject { id } => self.delete_object(conn, id).await,
        }
    }

    /// Tell the requesting connection (and nobody else) what went wrong
    pub(crate) fn report(&self, conn: ConnectionId, err: &SyncError) {
        match err.kind() {
            ErrorKind::Persistence => warn!(%conn, %err, "persistence failure"),
            _ => debug!(%conn, %err, "request rejected"),
        }
        self.registry.send_to(
            conn,
            ServerMessage::Error {
                kind: err.kind(),
                message: err.to_string(),
            },
        );
    }

    async fn shutdown(&mut self) {
        self.update_timers.cancel_all();
        let keys: Vec<UpdateKey> = self.pending_updates.keys().cloned().collect();
        for key in keys {
            self.flush_update(key).await;
        }
        self.session_writes.cancel_all();
        info!(
            connections = self.registry.connection_count(),
            "room server stopped"
        );
    }
}
