//! Join, leave, cursor presence and stale-session recovery.

use scenesync_core::{
    ConnectionId, RoomId, ServerMessage, SessionInfo, SyncError, UserId, Vec3, now_ms,
};
use tracing::{debug, info, warn};

use crate::registry::Membership;
use crate::server::RoomServer;

impl RoomServer {
    pub(crate) async fn join(
        &mut self,
        conn: ConnectionId,
        room_id: RoomId,
        user_id: UserId,
        user_email: Option<String>,
    ) -> Result<(), SyncError> {
        if !self.store.room_exists(&room_id).await? {
            return Err(SyncError::RoomNotFound(room_id));
        }
        if let Some(limit) = self.config.max_room_members {
            let already_member = self
                .registry
                .membership(conn)
                .is_some_and(|m| m.room_id == room_id);
            if !already_member && self.registry.room_size(&room_id) >= limit {
                return Err(SyncError::Capacity { limit });
            }
        }

        // Nothing changes for the caller or its current room until the
        // store has accepted the session and produced the snapshot.
        self.store
            .upsert_session(SessionInfo::new(
                user_id.clone(),
                room_id.clone(),
                user_email.clone(),
            ))
            .await?;
        let (objects, mut sessions) = match self.room_snapshot(&room_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.discard_session_row(&user_id, &room_id).await;
                return Err(err);
            }
        };

        // One active room per connection
        let rejoining = match self.registry.leave(conn) {
            Some(previous) if previous.room_id == room_id && previous.user_id == user_id => true,
            Some(previous) => {
                self.announce_departure(conn, previous).await;
                false
            }
            None => false,
        };

        self.registry
            .join(conn, room_id.clone(), user_id.clone(), user_email.clone());
        self.overlay_live_sessions(&room_id, &mut sessions);

        let object_count = objects.len();
        self.registry.send_to(
            conn,
            ServerMessage::RoomState {
                room_id: room_id.clone(),
                objects,
                sessions,
            },
        );
        if !rejoining {
            let display = scenesync_core::model::display_name(&user_id, user_email.as_deref());
            self.registry.broadcast(
                &room_id,
                &ServerMessage::UserJoined {
                    user_id: user_id.clone(),
                    user_email: display,
                },
                Some(conn),
            );
        }
        info!(
            %conn,
            room = %room_id,
            user = %user_id,
            objects = object_count,
            members = self.registry.room_size(&room_id),
            "joined room"
        );
        Ok(())
    }

    /// Drop a row written by a join that did not complete, unless a live
    /// connection still holds it
    async fn discard_session_row(&self, user_id: &UserId, room_id: &RoomId) {
        if self
            .registry
            .room_memberships(room_id)
            .any(|m| &m.user_id == user_id)
        {
            return;
        }
        if let Err(err) = self.store.delete_session(user_id, room_id).await {
            warn!(user = %user_id, room = %room_id, %err, "failed to discard session row");
        }
    }

    async fn room_snapshot(
        &self,
        room_id: &RoomId,
    ) -> Result<(Vec<scenesync_core::SceneObject>, Vec<SessionInfo>), SyncError> {
        let objects = self.store.list_objects(room_id).await?;
        let sessions = self.store.list_sessions(room_id).await?;
        Ok((objects, sessions))
    }

    /// Stored cursor rows lag the debounce window; prefer live state, and
    /// include live members whose rows were swept.
    fn overlay_live_sessions(&self, room_id: &RoomId, sessions: &mut Vec<SessionInfo>) {
        for live in self.registry.room_memberships(room_id) {
            match sessions.iter_mut().find(|s| s.user_id == live.user_id) {
                Some(row) => {
                    row.cursor = live.cursor;
                    row.last_seen = row.last_seen.max(live.last_seen);
                }
                None => sessions.push(live.to_session()),
            }
        }
    }

    /// Remove `conn` from its room, if any, and tell the remaining peers
    pub(crate) async fn leave(&mut self, conn: ConnectionId) {
        let Some(membership) = self.registry.leave(conn) else {
            return;
        };
        self.announce_departure(conn, membership).await;
    }

    async fn announce_departure(&mut self, conn: ConnectionId, membership: Membership) {
        if self
            .registry
            .has_other_session(conn, &membership.user_id, &membership.room_id)
        {
            debug!(%conn, user = %membership.user_id, "user still present on another connection");
            return;
        }

        self.session_writes.cancel(&membership.session_key());
        if let Err(err) = self
            .store
            .delete_session(&membership.user_id, &membership.room_id)
            .await
        {
            warn!(%conn, %err, "failed to delete session row");
        }
        self.registry.broadcast(
            &membership.room_id,
            &ServerMessage::UserLeft {
                user_id: membership.user_id.clone(),
                user_email: membership.display_name(),
            },
            None,
        );
        info!(
            %conn,
            room = %membership.room_id,
            user = %membership.user_id,
            "left room"
        );
    }

    /// Fan out immediately; write through to the store on a debounce
    pub(crate) fn cursor_update(&mut self, conn: ConnectionId, cursor: Vec3) -> Result<(), SyncError> {
        let membership = self
            .registry
            .set_cursor(conn, cursor)
            .cloned()
            .ok_or(SyncError::NotInRoom)?;

        self.registry.broadcast(
            &membership.room_id,
            &ServerMessage::CursorUpdated {
                user_id: membership.user_id.clone(),
                x: cursor.x,
                y: cursor.y,
                z: cursor.z,
            },
            Some(conn),
        );
        self.schedule_session_write(&membership);

        if rand::random::<f64>() < self.config.stale_sweep_probability {
            self.sweep_stale_sessions();
        }
        Ok(())
    }

    /// Debounced write of cursor and last-seen for the member's session row
    pub(crate) fn schedule_session_write(&mut self, membership: &Membership) {
        let store = self.store.clone();
        let (user_id, room_id) = membership.session_key();
        let cursor = membership.cursor;
        let last_seen = membership.last_seen;
        self.session_writes.schedule(
            membership.session_key(),
            self.config.cursor_debounce,
            async move {
                match store
                    .update_session_cursor(&user_id, &room_id, cursor, last_seen)
                    .await
                {
                    Ok(true) => debug!(user = %user_id, room = %room_id, "session written"),
                    Ok(false) => debug!(user = %user_id, room = %room_id, "session row gone"),
                    Err(err) => warn!(user = %user_id, %err, "session write failed"),
                }
            },
        );
    }

    /// Drop session rows left behind by connections that vanished without a leave
    pub(crate) fn sweep_stale_sessions(&self) {
        let store = self.store.clone();
        let cutoff = now_ms().saturating_sub(self.config.stale_timeout.as_millis() as u64);
        tokio::spawn(async move {
            match store.delete_stale_sessions(cutoff).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "swept stale sessions"),
                Err(err) => warn!(%err, "stale session sweep failed"),
            }
        });
    }
}
