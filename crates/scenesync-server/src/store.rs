//! The persistent store collaborator.
//!
//! The server only talks to storage through [`Store`], a row-oriented
//! request/response interface: an object table keyed by id and a session
//! table keyed by `(user_id, room_id)`. [`MemoryStore`] is the bundled
//! implementation; it keeps tables in memory and can snapshot rooms and
//! objects to a JSON file.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use async_trait::async_trait;
use scenesync_core::{
    ObjectId, ObjectPatch, RoomId, SceneObject, SessionInfo, StoreError, UserId, Vec3,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn create_room(&self, room_id: &RoomId) -> Result<(), StoreError>;

    async fn room_exists(&self, room_id: &RoomId) -> Result<bool, StoreError>;

    async fn list_objects(&self, room_id: &RoomId) -> Result<Vec<SceneObject>, StoreError>;

    /// Look an object up by id regardless of room
    async fn get_object(&self, id: ObjectId) -> Result<Option<SceneObject>, StoreError>;

    /// Insert or replace by id; returns the persisted row
    async fn insert_object(&self, object: SceneObject) -> Result<SceneObject, StoreError>;

    /// Merge `patch` into the row matching `(id, room_id)`.
    ///
    /// `Ok(None)` when no such row exists.
    async fn update_object(
        &self,
        room_id: &RoomId,
        id: ObjectId,
        patch: &ObjectPatch,
        now: u64,
    ) -> Result<Option<SceneObject>, StoreError>;

    /// Delete the row matching `(id, room_id)`. Returns whether a row was removed.
    async fn delete_object(&self, room_id: &RoomId, id: ObjectId) -> Result<bool, StoreError>;

    /// Insert or replace on `(user_id, room_id)`
    async fn upsert_session(&self, session: SessionInfo) -> Result<(), StoreError>;

    /// Write cursor and last-seen for an existing session only
    async fn update_session_cursor(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        cursor: Vec3,
        last_seen: u64,
    ) -> Result<bool, StoreError>;

    async fn delete_session(&self, user_id: &UserId, room_id: &RoomId)
    -> Result<bool, StoreError>;

    async fn list_sessions(&self, room_id: &RoomId) -> Result<Vec<SessionInfo>, StoreError>;

    /// Remove sessions whose `last_seen` is older than `cutoff_ms`
    async fn delete_stale_sessions(&self, cutoff_ms: u64) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    rooms: BTreeSet<RoomId>,
    objects: HashMap<ObjectId, SceneObject>,
    sessions: HashMap<(UserId, RoomId), SessionInfo>,
}

/// On-disk form of a [`MemoryStore`]. Sessions are ephemeral and not saved.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    rooms: Vec<RoomId>,
    objects: Vec<SceneObject>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor with rooms already registered
    pub fn with_rooms<I, R>(rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        let tables = Tables {
            rooms: rooms.into_iter().map(RoomId::new).collect(),
            ..Default::default()
        };
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Load a snapshot written by [`MemoryStore::save_to`]
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let content = tokio::fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        let tables = Tables {
            rooms: snapshot.rooms.into_iter().collect(),
            objects: snapshot
                .objects
                .into_iter()
                .map(|o| (o.id, o))
                .collect(),
            sessions: HashMap::new(),
        };
        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Write rooms and objects to `path` as JSON
    pub async fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = {
            let tables = self.tables.read().await;
            let mut objects: Vec<SceneObject> = tables.objects.values().cloned().collect();
            objects.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
            Snapshot {
                rooms: tables.rooms.iter().cloned().collect(),
                objects,
            }
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub async fn object_count(&self) -> usize {
        self.tables.read().await.objects.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_room(&self, room_id: &RoomId) -> Result<(), StoreError> {
        self.tables.write().await.rooms.insert(room_id.clone());
        Ok(())
    }

    async fn room_exists(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.rooms.contains(room_id))
    }

    async fn list_objects(&self, room_id: &RoomId) -> Result<Vec<SceneObject>, StoreError> {
        let tables = self.tables.read().await;
        let mut objects: Vec<SceneObject> = tables
            .objects
            .values()
            .filter(|o| &o.room_id == room_id)
            .cloned()
            .collect();
        objects.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(objects)
    }

    async fn get_object(&self, id: ObjectId) -> Result<Option<SceneObject>, StoreError> {
        Ok(self.tables.read().await.objects.get(&id).cloned())
    }

    async fn insert_object(&self, object: SceneObject) -> Result<SceneObject, StoreError> {
        self.tables
            .write()
            .await
            .objects
            .insert(object.id, object.clone());
        Ok(object)
    }

    async fn update_object(
        &self,
        room_id: &RoomId,
        id: ObjectId,
        patch: &ObjectPatch,
        now: u64,
    ) -> Result<Option<SceneObject>, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.objects.get_mut(&id) {
            Some(object) if &object.room_id == room_id => {
                object.apply_patch(patch);
                object.updated_at = now;
                Ok(Some(object.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_object(&self, room_id: &RoomId, id: ObjectId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let owned = tables
            .objects
            .get(&id)
            .is_some_and(|o| &o.room_id == room_id);
        if owned {
            tables.objects.remove(&id);
        }
        Ok(owned)
    }

    async fn upsert_session(&self, session: SessionInfo) -> Result<(), StoreError> {
        let key = (session.user_id.clone(), session.room_id.clone());
        self.tables.write().await.sessions.insert(key, session);
        Ok(())
    }

    async fn update_session_cursor(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        cursor: Vec3,
        last_seen: u64,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables
            .sessions
            .get_mut(&(user_id.clone(), room_id.clone()))
        {
            Some(session) => {
                session.cursor = cursor;
                session.last_seen = last_seen;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_session(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .write()
            .await
            .sessions
            .remove(&(user_id.clone(), room_id.clone()))
            .is_some())
    }

    async fn list_sessions(&self, room_id: &RoomId) -> Result<Vec<SessionInfo>, StoreError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<SessionInfo> = tables
            .sessions
            .values()
            .filter(|s| &s.room_id == room_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(sessions)
    }

    async fn delete_stale_sessions(&self, cutoff_ms: u64) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.last_seen >= cutoff_ms);
        Ok(before - tables.sessions.len())
    }
}
