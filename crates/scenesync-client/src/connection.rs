//! Client end of a room connection over iroh.
//!
//! [`RoomClient::spawn`] returns at once; connecting happens in the
//! background. Messages queued before the transport is up wait in the
//! outbound channel, and a join waits in the [`JoinGate`] until both the
//! transport and the identity are in place.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use iroh::endpoint::{Connection, ConnectionError};
use iroh::address_lookup::{DnsAddressLookup, PkarrPublisher};
use iroh::endpoint::default_relay_mode;
use iroh::Endpoint;
use iroh_base::EndpointAddr;
use scenesync_core::wire::{self, ALPN, CLOSE_CAPACITY};
use scenesync_core::{
    ClientMessage, ErrorKind, NewObject, ObjectId, ObjectPatch, RoomId, SceneObject,
    ServerMessage, UserId, Vec3,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::history::Replicator;
use crate::join::{self, Identity, JoinGate, SharedJoinGate, with_gate};

const OUTBOUND_QUEUE: usize = 256;
const INBOUND_QUEUE: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Non-blocking sender for client messages
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<ClientMessage>,
}

impl Outbox {
    pub fn new(tx: mpsc::Sender<ClientMessage>) -> Self {
        Self { tx }
    }

    /// Queue `msg`, dropping it if the queue is full or closed
    pub fn push(&self, msg: ClientMessage) -> bool {
        let kind = msg.name();
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(err) => {
                warn!(kind, %err, "dropping outbound message");
                false
            }
        }
    }

    pub fn cursor(&self, position: Vec3) -> bool {
        self.push(ClientMessage::CursorUpdate {
            x: position.x,
            y: position.y,
            z: position.z,
        })
    }

    pub fn create_object(&self, object: NewObject) -> bool {
        self.push(ClientMessage::CreateObject { object })
    }

    pub fn update_object(&self, id: ObjectId, patch: ObjectPatch) -> bool {
        self.push(ClientMessage::UpdateObject { id, patch })
    }

    pub fn delete_object(&self, id: ObjectId) -> bool {
        self.push(ClientMessage::DeleteObject { id })
    }

    pub fn leave_room(&self) -> bool {
        self.push(ClientMessage::LeaveRoom)
    }
}

impl Replicator for Outbox {
    fn create(&self, object: &SceneObject) {
        self.create_object(object.to_new_object());
    }

    fn update(&self, id: ObjectId, patch: ObjectPatch) {
        self.update_object(id, patch);
    }

    fn delete(&self, id: ObjectId) {
        self.delete_object(id);
    }
}

pub struct RoomClient {
    outbox: Outbox,
    gate: SharedJoinGate,
    inbound: mpsc::Receiver<ServerMessage>,
    driver: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl std::fmt::Debug for RoomClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomClient").finish()
    }
}

impl RoomClient {
    /// Start connecting to the server at `addr`
    pub fn spawn(addr: EndpointAddr, config: &ClientConfig) -> Self {
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (in_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let gate: SharedJoinGate = Arc::default();

        let driver = tokio::spawn(drive(addr, gate.clone(), out_rx, in_tx));
        let pump = tokio::spawn(join::pump(
            gate.clone(),
            out_tx.clone(),
            config.join_poll_interval,
        ));

        Self {
            outbox: Outbox::new(out_tx),
            gate,
            inbound,
            driver,
            pump,
        }
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    pub fn set_identity(&self, user_id: UserId, user_email: Option<String>) {
        with_gate(&self.gate, |g| g.set_identity(Identity::new(user_id, user_email)));
        self.flush_join();
    }

    /// Join `room_id` now if possible, otherwise as soon as the connection
    /// and identity are ready. A later call replaces a join still waiting.
    pub fn join(&self, room_id: RoomId) {
        if let Some(msg) = with_gate(&self.gate, |g| g.request(room_id)) {
            self.outbox.push(msg);
        }
    }

    pub fn is_connected(&self) -> bool {
        with_gate(&self.gate, |g| g.is_connected())
    }

    /// Next message from the server. `None` once the connection is gone and
    /// everything received has been read.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbound.recv().await
    }

    /// Leave the room and give the connection a moment to wind down
    pub async fn close(mut self) {
        self.outbox.leave_room();
        self.pump.abort();
        drop(self.outbox);
        if tokio::time::timeout(CLOSE_GRACE, &mut self.driver).await.is_err() {
            self.driver.abort();
        }
    }

    fn flush_join(&self) {
        if let Some(msg) = with_gate(&self.gate, JoinGate::poll) {
            self.outbox.push(msg);
        }
    }
}

async fn drive(
    addr: EndpointAddr,
    gate: SharedJoinGate,
    outbound: mpsc::Receiver<ClientMessage>,
    inbound: mpsc::Sender<ServerMessage>,
) {
    let (endpoint, conn) = match open(addr).await {
        Ok(opened) => opened,
        Err(err) => {
            warn!(%err, "could not connect");
            let _ = inbound
                .send(ServerMessage::Error {
                    kind: ErrorKind::Transport,
                    message: err.to_string(),
                })
                .await;
            return;
        }
    };

    if let Err(err) = run(&conn, &gate, outbound, &inbound).await {
        debug!(%err, "connection ended");
    }
    with_gate(&gate, |g| g.set_connected(false));

    if let Some(msg) = close_message(conn.close_reason()) {
        let _ = inbound.send(msg).await;
    }
    endpoint.close().await;
    info!("disconnected");
}

async fn open(addr: EndpointAddr) -> Result<(Endpoint, Connection)> {
    let endpoint = Endpoint::empty_builder()
        .relay_mode(default_relay_mode())
        .address_lookup(DnsAddressLookup::n0_dns())
        .address_lookup(PkarrPublisher::n0_dns())
        .bind()
        .await?;
    let conn = endpoint.connect(addr, ALPN).await?;
    info!("connected to room server");
    Ok((endpoint, conn))
}

async fn run(
    conn: &Connection,
    gate: &SharedJoinGate,
    mut outbound: mpsc::Receiver<ClientMessage>,
    inbound: &mpsc::Sender<ServerMessage>,
) -> Result<()> {
    let (mut send, mut recv) = conn.open_bi().await?;
    with_gate(gate, |g| g.set_connected(true));

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if let Err(err) = wire::send_frame(&mut send, &msg).await {
                debug!(%err, "send failed");
                break;
            }
        }
        let _ = send.finish();
    });

    let result = loop {
        match wire::recv_frame::<_, ServerMessage>(&mut recv).await {
            Ok(Some(msg)) => {
                if inbound.send(msg).await.is_err() {
                    break Ok(());
                }
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(err.into()),
        }
    };
    writer.abort();
    result
}

/// Turn a server-side close into the error the UI should see
fn close_message(reason: Option<ConnectionError>) -> Option<ServerMessage> {
    match reason? {
        ConnectionError::ApplicationClosed(close)
            if close.error_code.into_inner() == u64::from(CLOSE_CAPACITY) =>
        {
            Some(ServerMessage::Error {
                kind: ErrorKind::Capacity,
                message: String::from_utf8_lossy(&close.reason).into_owned(),
            })
        }
        ConnectionError::LocallyClosed => None,
        other => Some(ServerMessage::Error {
            kind: ErrorKind::Transport,
            message: other.to_string(),
        }),
    }
}
