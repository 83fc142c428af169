//! Iroh protocol handler that bridges QUIC connections to the room server.
//!
//! Each accepted connection carries one bidirectional stream. A writer task
//! drains the connection's outbox into the send half; the accepting task
//! reads frames and forwards them to the dispatcher.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use iroh::Endpoint;
use iroh::address_lookup::{DnsAddressLookup, PkarrPublisher};
use iroh::endpoint::default_relay_mode;
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler, Router};
use scenesync_core::wire::{self, ALPN, CLOSE_CAPACITY, CLOSE_PROTOCOL};
use scenesync_core::{ClientMessage, ConnectionId, ServerMessage, SyncError};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::ServerHandle;

/// How long queued replies get to drain after the read side ends
const WRITER_GRACE: Duration = Duration::from_millis(250);

/// Room protocol handler for iroh
#[derive(Clone)]
pub struct RoomProtocol {
    handle: ServerHandle,
    outbox_capacity: usize,
}

impl std::fmt::Debug for RoomProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomProtocol").finish()
    }
}

impl RoomProtocol {
    /// Protocol identifier
    pub const ALPN: &'static [u8] = ALPN;

    pub fn new(handle: ServerHandle, outbox_capacity: usize) -> Self {
        Self {
            handle,
            outbox_capacity,
        }
    }

    async fn handle_peer(&self, conn: Connection) -> Result<(), SyncError> {
        let (outbox_tx, mut outbox_rx) = mpsc::channel::<ServerMessage>(self.outbox_capacity);

        let conn_id = match self.handle.connect(outbox_tx.clone()).await {
            Ok(id) => id,
            Err(err) => {
                info!(%err, "closing connection");
                conn.close(CLOSE_CAPACITY.into(), err.to_string().as_bytes());
                return Ok(());
            }
        };
        info!(%conn_id, "peer connected");

        let (mut send, mut recv) = match conn.accept_bi().await {
            Ok(streams) => streams,
            Err(err) => {
                self.handle.disconnect(conn_id).await;
                return Err(SyncError::Transport(err.to_string()));
            }
        };

        let mut writer = tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                if let Err(err) = wire::send_frame(&mut send, &msg).await {
                    debug!(%err, "send failed, peer gone");
                    break;
                }
            }
            let _ = send.finish();
        });

        let lost_framing = forward_frames(&self.handle, conn_id, &mut recv, &outbox_tx).await;

        self.handle.disconnect(conn_id).await;
        drop(outbox_tx);
        if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
            writer.abort();
        }
        if let Some(err) = lost_framing {
            conn.close(CLOSE_PROTOCOL.into(), err.to_string().as_bytes());
        }
        info!(%conn_id, "peer disconnected");
        Ok(())
    }
}

/// Hand decoded frames from `recv` to the dispatcher.
///
/// Returns once the peer finishes its stream or the dispatcher stops, or with
/// the error that made the stream unreadable. A body that fails to decode is
/// reported to the peer and reading continues with the next frame.
pub(crate) async fn forward_frames<R>(
    handle: &ServerHandle,
    conn_id: ConnectionId,
    recv: &mut R,
    outbox: &mpsc::Sender<ServerMessage>,
) -> Option<SyncError>
where
    R: AsyncReadExt + Unpin,
{
    loop {
        match wire::recv_frame::<_, ClientMessage>(recv).await {
            Ok(Some(msg)) => {
                if handle.send(conn_id, msg).await.is_err() {
                    return None;
                }
            }
            Ok(None) => return None,
            Err(SyncError::Protocol(reason)) => {
                warn!(%conn_id, %reason, "undecodable frame");
                let _ = outbox
                    .send(ServerMessage::Error {
                        kind: scenesync_core::ErrorKind::Validation,
                        message: reason,
                    })
                    .await;
            }
            Err(err @ SyncError::FrameTooLarge { .. }) => {
                warn!(%conn_id, %err, "dropping peer");
                let _ = outbox
                    .send(ServerMessage::Error {
                        kind: err.kind(),
                        message: err.to_string(),
                    })
                    .await;
                return Some(err);
            }
            Err(err) => {
                debug!(%conn_id, %err, "receive failed");
                return None;
            }
        }
    }
}

impl ProtocolHandler for RoomProtocol {
    fn accept(&self, conn: Connection) -> impl Future<Output = Result<(), AcceptError>> + Send {
        let this = self.clone();
        async move {
            this.handle_peer(conn).await.map_err(|e| {
                AcceptError::from_err(std::io::Error::other(e.to_string()))
            })
        }
    }
}

/// Bind an endpoint with n0 discovery and serve the room protocol on it
pub async fn serve(handle: ServerHandle, outbox_capacity: usize) -> Result<Router> {
    let endpoint = Endpoint::empty_builder()
        .relay_mode(default_relay_mode())
        .address_lookup(DnsAddressLookup::n0_dns())
        .address_lookup(PkarrPublisher::n0_dns())
        .bind()
        .await?;

    let router = Router::builder(endpoint)
        .accept(RoomProtocol::ALPN, RoomProtocol::new(handle, outbox_capacity))
        .spawn();
    Ok(router)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scenesync_core::{ErrorKind, RoomId, UserId};
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::{MemoryStore, RoomServer, ServerConfig};

    #[tokio::test(start_paused = true)]
    async fn oversized_frame_ends_the_read_loop() {
        let store = Arc::new(MemoryStore::with_rooms(["lobby"]));
        let handle = RoomServer::spawn(ServerConfig::default(), store);
        let (outbox, mut replies) = mpsc::channel(16);
        let conn_id = handle.connect(outbox.clone()).await.unwrap();

        let (mut peer, mut server_side) = tokio::io::duplex(1024);
        peer.write_all(&((wire::MAX_FRAME_LEN + 1) as u32).to_le_bytes())
            .await
            .unwrap();
        peer.write_all(&[1u8; 64]).await.unwrap();
        // Would be misread as part of the oversized frame if reading went on
        wire::send_frame(
            &mut peer,
            &ClientMessage::JoinRoom {
                room_id: RoomId::new("lobby"),
                user_id: UserId::new("u1"),
                user_email: None,
            },
        )
        .await
        .unwrap();

        let lost = forward_frames(&handle, conn_id, &mut server_side, &outbox).await;
        assert!(matches!(lost, Some(SyncError::FrameTooLarge { .. })));

        tokio::time::sleep(Duration::from_millis(1)).await;
        match replies.try_recv().unwrap() {
            ServerMessage::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::Validation);
                assert!(message.contains("exceeds limit"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        // The trailing join was never dispatched
        assert!(replies.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_body_is_skipped_and_reading_continues() {
        let store = Arc::new(MemoryStore::with_rooms(["lobby"]));
        let handle = RoomServer::spawn(ServerConfig::default(), store);
        let (outbox, mut replies) = mpsc::channel(16);
        let conn_id = handle.connect(outbox.clone()).await.unwrap();

        let (mut peer, mut server_side) = tokio::io::duplex(1024);
        peer.write_all(&2u32.to_le_bytes()).await.unwrap();
        peer.write_all(&[0xc1, 0xc1]).await.unwrap();
        wire::send_frame(
            &mut peer,
            &ClientMessage::JoinRoom {
                room_id: RoomId::new("lobby"),
                user_id: UserId::new("u1"),
                user_email: None,
            },
        )
        .await
        .unwrap();
        drop(peer);

        assert!(forward_frames(&handle, conn_id, &mut server_side, &outbox).await.is_none());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(matches!(
            replies.try_recv().unwrap(),
            ServerMessage::Error { kind: ErrorKind::Validation, .. }
        ));
        assert!(matches!(
            replies.try_recv().unwrap(),
            ServerMessage::RoomState { .. }
        ));
    }
}
