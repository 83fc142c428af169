//! Object replication: persist, then fan out to the rest of the room.
//!
//! Creates and deletes are written through immediately. Updates are
//! debounced per `(object, room)`: patches arriving inside the window are
//! merged field by field and only the merged result is persisted and
//! broadcast when the window closes.

use std::collections::hash_map::Entry;

use scenesync_core::{
    ConnectionId, NewObject, ObjectId, ObjectPatch, RoomId, ServerMessage, SyncError, now_ms,
};
use tracing::debug;

use crate::server::{RoomServer, ServerEvent, UpdateKey};

/// Update waiting for its debounce window to close
#[derive(Debug, Clone)]
pub(crate) struct PendingUpdate {
    pub patch: ObjectPatch,
    /// Sender of the most recent patch; excluded from the broadcast
    pub origin: ConnectionId,
    /// How many requests were folded into this write
    pub merged: usize,
}

impl RoomServer {
    pub(crate) async fn create_object(
        &mut self,
        conn: ConnectionId,
        new_object: NewObject,
    ) -> Result<(), SyncError> {
        let membership = self
            .registry
            .touch(conn)
            .cloned()
            .ok_or(SyncError::NotInRoom)?;
        let room_id = membership.room_id.clone();

        if let Some(existing) = self.store.get_object(new_object.id).await? {
            if existing.room_id != room_id {
                return Err(SyncError::ObjectNotInRoom {
                    id: new_object.id,
                    room_id,
                });
            }
        }

        let object = new_object.into_object(room_id.clone(), membership.user_id.clone(), now_ms());
        let persisted = self.store.insert_object(object).await?;
        let id = persisted.id;
        let reached = self.registry.broadcast(
            &room_id,
            &ServerMessage::ObjectCreated { object: persisted },
            Some(conn),
        );
        debug!(%conn, %id, room = %room_id, reached, "object created");
        self.schedule_session_write(&membership);
        Ok(())
    }

    /// Fold `patch` into the pending write for this object and restart its window
    pub(crate) fn queue_update(
        &mut self,
        conn: ConnectionId,
        id: ObjectId,
        patch: ObjectPatch,
    ) -> Result<(), SyncError> {
        let membership = self
            .registry
            .touch(conn)
            .cloned()
            .ok_or(SyncError::NotInRoom)?;
        if patch.is_empty() {
            return Ok(());
        }

        let key: UpdateKey = (id, membership.room_id.clone());
        match self.pending_updates.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let pending = entry.get_mut();
                pending.patch.merge(patch);
                pending.origin = conn;
                pending.merged += 1;
            }
            Entry::Vacant(entry) => {
                entry.insert(PendingUpdate {
                    patch,
                    origin: conn,
                    merged: 1,
                });
            }
        }

        let events = self.events.clone();
        self.update_timers
            .schedule(key.clone(), self.config.object_debounce, async move {
                if let Some(events) = events.upgrade() {
                    let _ = events.send(ServerEvent::FlushUpdate { key }).await;
                }
            });
        self.schedule_session_write(&membership);
        Ok(())
    }

    /// Persist and broadcast the merged update for `key`, if one is still pending
    pub(crate) async fn flush_update(&mut self, key: UpdateKey) {
        let Some(pending) = self.pending_updates.remove(&key) else {
            return;
        };
        let (id, room_id) = key;
        if let Err(err) = self.persist_update(&room_id, id, &pending).await {
            self.report(pending.origin, &err);
        }
    }

    async fn persist_update(
        &mut self,
        room_id: &RoomId,
        id: ObjectId,
        pending: &PendingUpdate,
    ) -> Result<(), SyncError> {
        match self.store.get_object(id).await? {
            None => {
                debug!(%id, "update for missing object, ignoring");
                return Ok(());
            }
            Some(existing) if &existing.room_id != room_id => {
                return Err(SyncError::ObjectNotInRoom {
                    id,
                    room_id: room_id.clone(),
                });
            }
            Some(_) => {}
        }

        let Some(object) = self
            .store
            .update_object(room_id, id, &pending.patch, now_ms())
            .await?
        else {
            debug!(%id, "object vanished before update, ignoring");
            return Ok(());
        };
        let reached = self.registry.broadcast(
            room_id,
            &ServerMessage::ObjectUpdated { object },
            Some(pending.origin),
        );
        debug!(%id, room = %room_id, merged = pending.merged, reached, "object updated");
        Ok(())
    }

    pub(crate) async fn delete_object(
        &mut self,
        conn: ConnectionId,
        id: ObjectId,
    ) -> Result<(), SyncError> {
        let membership = self
            .registry
            .touch(conn)
            .cloned()
            .ok_or(SyncError::NotInRoom)?;
        let room_id = membership.room_id.clone();

        // A pending write would only find a missing row
        let key: UpdateKey = (id, room_id.clone());
        self.update_timers.cancel(&key);
        self.pending_updates.remove(&key);

        match self.store.get_object(id).await? {
            None => {
                debug!(%id, "delete for missing object, ignoring");
                return Ok(());
            }
            Some(existing) if existing.room_id != room_id => {
                return Err(SyncError::ObjectNotInRoom { id, room_id });
            }
            Some(_) => {}
        }

        if self.store.delete_object(&room_id, id).await? {
            let reached =
                self.registry
                    .broadcast(&room_id, &ServerMessage::ObjectDeleted { id }, Some(conn));
            debug!(%conn, %id, room = %room_id, reached, "object deleted");
        }
        self.schedule_session_write(&membership);
        Ok(())
    }
}
