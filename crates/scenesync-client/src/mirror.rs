//! Client-local replica of a room's objects.
//!
//! Two layers: `objects` holds the latest known state of every object (local
//! edits land here optimistically, remote ones as they arrive), and the
//! [`Scene`] holds what is drawn. Local edits and geometry swaps reach the
//! scene at once; remote transform and color changes are eased in by the
//! [`Interpolator`].

use std::collections::HashMap;

use scenesync_core::{
    NewObject, ObjectId, ObjectPatch, RoomId, SceneObject, ServerMessage, SessionInfo, UserId,
    now_ms,
};
use tracing::debug;

use crate::config::ClientConfig;
use crate::interpolator::Interpolator;
use crate::scene::{RenderedObject, Scene};

#[derive(Debug)]
pub struct ClientMirror {
    user_id: UserId,
    room_id: Option<RoomId>,
    objects: HashMap<ObjectId, SceneObject>,
    sessions: HashMap<UserId, SessionInfo>,
    scene: Scene,
    interpolator: Interpolator,
}

impl ClientMirror {
    pub fn new(config: &ClientConfig, user_id: UserId) -> Self {
        Self {
            user_id,
            room_id: None,
            objects: HashMap::new(),
            sessions: HashMap::new(),
            scene: Scene::new(),
            interpolator: Interpolator::new(config),
        }
    }

    /// Handle to the rendered scene, for a renderer on another task
    pub fn scene(&self) -> Scene {
        self.scene.clone()
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.room_id.as_ref()
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionInfo> {
        self.sessions.values()
    }

    pub fn interpolator_mut(&mut self) -> &mut Interpolator {
        &mut self.interpolator
    }

    // Local edits

    /// Materialize a new object owned by this client and show it immediately
    pub fn create_local(&mut self, new_object: NewObject) -> SceneObject {
        let room_id = self.room_id.clone().unwrap_or_else(|| RoomId::new(""));
        let object = new_object.into_object(room_id, self.user_id.clone(), now_ms());
        self.insert(object.clone());
        object
    }

    /// Put back an exact object, e.g. when undoing its deletion
    pub fn restore_local(&mut self, object: SceneObject) {
        self.insert(object);
    }

    /// Apply a patch optimistically. Returns the updated object, or `None`
    /// if the object is not (or no longer) in the mirror.
    pub fn update_local(&mut self, id: ObjectId, patch: &ObjectPatch) -> Option<&SceneObject> {
        let object = self.objects.get_mut(&id)?;
        object.apply_patch(patch);
        object.updated_at = now_ms();
        self.interpolator.cancel(id);
        self.scene.set(id, RenderedObject::from(&*object));
        Some(object)
    }

    pub fn delete_local(&mut self, id: ObjectId) -> Option<SceneObject> {
        self.remove(id)
    }

    // Remote deltas

    /// Replace everything with a full room snapshot
    pub fn apply_room_state(
        &mut self,
        room_id: RoomId,
        objects: Vec<SceneObject>,
        sessions: Vec<SessionInfo>,
    ) {
        self.interpolator.cancel_all();
        self.objects.clear();
        self.scene.clear();
        self.room_id = Some(room_id);
        for object in objects {
            self.insert(object);
        }
        self.sessions = sessions
            .into_iter()
            .map(|s| (s.user_id.clone(), s))
            .collect();
    }

    /// A peer created an object. An id already present (our own echo, or a
    /// duplicate delivery) only refreshes tracking data.
    pub fn apply_remote_created(&mut self, object: SceneObject) {
        if let Some(existing) = self.objects.get_mut(&object.id) {
            debug!(id = %object.id, "create for known object, updating tracking only");
            *existing = object;
            return;
        }
        self.insert(object);
    }

    /// A peer changed an object: geometry lands at once, transform and color
    /// are eased in
    pub fn apply_remote_updated(&mut self, object: SceneObject) {
        let id = object.id;
        if !self.scene.contains(id) {
            self.insert(object);
            return;
        }

        let target_transform = object.transform;
        let target_color = object.color;
        let kind = object.kind.clone();
        let geometry = object.geometry.clone();
        self.objects.insert(id, object);

        self.scene.update(id, |rendered| {
            rendered.kind = kind;
            rendered.geometry = geometry;
        });
        self.interpolator.move_to(&self.scene, id, target_transform);
        self.interpolator.fade_to(&self.scene, id, target_color);
    }

    pub fn apply_remote_deleted(&mut self, id: ObjectId) {
        if self.remove(id).is_none() {
            debug!(%id, "delete for unknown object");
        }
    }

    pub fn apply_user_joined(&mut self, user_id: UserId, user_email: String) {
        let Some(room_id) = self.room_id.clone() else {
            return;
        };
        self.sessions
            .entry(user_id.clone())
            .or_insert_with(|| SessionInfo::new(user_id, room_id, Some(user_email)));
    }

    pub fn apply_user_left(&mut self, user_id: &UserId) {
        self.sessions.remove(user_id);
    }

    pub fn apply_cursor(&mut self, user_id: &UserId, cursor: scenesync_geometry::Vec3) {
        if let Some(session) = self.sessions.get_mut(user_id) {
            session.cursor = cursor;
            session.last_seen = now_ms();
        }
    }

    /// Route any server message to the matching handler. Returns false for
    /// messages that do not touch mirror state.
    pub fn apply_message(&mut self, msg: ServerMessage) -> bool {
        match msg {
            ServerMessage::RoomState {
                room_id,
                objects,
                sessions,
            } => self.apply_room_state(room_id, objects, sessions),
            ServerMessage::UserJoined {
                user_id,
                user_email,
            } => self.apply_user_joined(user_id, user_email),
            ServerMessage::UserLeft { user_id, .. } => self.apply_user_left(&user_id),
            ServerMessage::CursorUpdated { user_id, x, y, z } => {
                self.apply_cursor(&user_id, scenesync_geometry::Vec3::new(x, y, z))
            }
            ServerMessage::ObjectCreated { object } => self.apply_remote_created(object),
            ServerMessage::ObjectUpdated { object } => self.apply_remote_updated(object),
            ServerMessage::ObjectDeleted { id } => self.apply_remote_deleted(id),
            ServerMessage::Error { .. } => return false,
        }
        true
    }

    fn insert(&mut self, object: SceneObject) {
        let id = object.id;
        self.interpolator.cancel(id);
        self.scene.set(id, RenderedObject::from(&object));
        self.objects.insert(id, object);
    }

    fn remove(&mut self, id: ObjectId) -> Option<SceneObject> {
        self.interpolator.cancel(id);
        self.scene.remove(id);
        self.objects.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use scenesync_core::GeometryPayload;
    use scenesync_geometry::{Color, Transform, Vec3};

    fn mirror() -> ClientMirror {
        let mut mirror = ClientMirror::new(&ClientConfig::default(), UserId::new("me"));
        mirror.apply_room_state(RoomId::new("r"), Vec::new(), Vec::new());
        mirror
    }

    fn remote(kind: &str) -> SceneObject {
        NewObject::new(kind).into_object(RoomId::new("r"), UserId::new("peer"), 1)
    }

    #[tokio::test(start_paused = true)]
    async fn local_create_is_visible_immediately() {
        let mut mirror = mirror();
        let object = mirror.create_local(NewObject::new("box"));
        assert_eq!(object.room_id, RoomId::new("r"));
        assert_eq!(object.created_by, UserId::new("me"));
        assert!(mirror.contains(object.id));
        assert!(mirror.scene().contains(object.id));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_create_of_known_id_does_not_reinstantiate() {
        let mut mirror = mirror();
        let local = mirror.create_local(NewObject::new("box"));
        // Move it locally, then receive the stale echo of the create
        mirror.update_local(local.id, &ObjectPatch::position(Vec3::new(2.0, 0.0, 0.0)));
        let mut echo = local.clone();
        echo.updated_at += 1;
        mirror.apply_remote_created(echo.clone());

        assert_eq!(mirror.get(local.id), Some(&echo));
        // The drawn object kept its local position
        assert_eq!(
            mirror.scene().get(local.id).unwrap().transform.position,
            Vec3::new(2.0, 0.0, 0.0)
        );
        assert_eq!(mirror.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_jump_interpolates_but_tracking_is_immediate() {
        let mut mirror = mirror();
        let object = remote("box");
        let id = object.id;
        mirror.apply_remote_created(object.clone());

        let mut moved = object;
        moved.transform = Transform::from_position(Vec3::new(5.0, 0.0, 0.0));
        mirror.apply_remote_updated(moved.clone());

        assert_eq!(mirror.get(id).unwrap().transform, moved.transform);
        assert_eq!(mirror.scene().get(id).unwrap().transform, Transform::default());
        assert!(mirror.interpolator_mut().is_moving(id));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(mirror.scene().get(id).unwrap().transform, moved.transform);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_geometry_swap_is_not_interpolated() {
        let mut mirror = mirror();
        let object = remote("mesh");
        let id = object.id;
        mirror.apply_remote_created(object.clone());

        let mut baked = object;
        baked.geometry = GeometryPayload::new(vec![1, 2, 3]);
        baked.color = Color::rgb(10, 10, 10);
        mirror.apply_remote_updated(baked);

        let rendered = mirror.scene().get(id).unwrap();
        assert_eq!(rendered.geometry, GeometryPayload::new(vec![1, 2, 3]));
        assert!(!mirror.interpolator_mut().is_moving(id));
        assert!(mirror.interpolator_mut().is_fading(id));
    }

    #[tokio::test(start_paused = true)]
    async fn local_edit_cancels_running_interpolation() {
        let mut mirror = mirror();
        let object = remote("box");
        let id = object.id;
        mirror.apply_remote_created(object.clone());
        let mut moved = object;
        moved.transform = Transform::from_position(Vec3::new(9.0, 9.0, 9.0));
        mirror.apply_remote_updated(moved);

        mirror.update_local(id, &ObjectPatch::position(Vec3::ONE));
        assert!(!mirror.interpolator_mut().is_moving(id));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(mirror.scene().get(id).unwrap().transform.position, Vec3::ONE);
    }

    #[tokio::test(start_paused = true)]
    async fn room_state_replaces_everything() {
        let mut mirror = mirror();
        mirror.create_local(NewObject::new("stale"));
        let fresh = remote("fresh");
        let session = SessionInfo::new(UserId::new("peer"), RoomId::new("other"), None);
        mirror.apply_room_state(RoomId::new("other"), vec![fresh.clone()], vec![session]);

        assert_eq!(mirror.room_id(), Some(&RoomId::new("other")));
        assert_eq!(mirror.len(), 1);
        assert!(mirror.contains(fresh.id));
        assert_eq!(mirror.scene().len(), 1);
        assert_eq!(mirror.sessions().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn presence_messages_track_sessions() {
        let mut mirror = mirror();
        assert!(mirror.apply_message(ServerMessage::UserJoined {
            user_id: UserId::new("peer"),
            user_email: "peer@example.com".into(),
        }));
        assert!(mirror.apply_message(ServerMessage::CursorUpdated {
            user_id: UserId::new("peer"),
            x: 1.0,
            y: 2.0,
            z: 3.0,
        }));
        let session = mirror.sessions().next().unwrap();
        assert_eq!(session.cursor, Vec3::new(1.0, 2.0, 3.0));

        mirror.apply_message(ServerMessage::UserLeft {
            user_id: UserId::new("peer"),
            user_email: "peer@example.com".into(),
        });
        assert_eq!(mirror.sessions().count(), 0);
        assert!(!mirror.apply_message(ServerMessage::Error {
            kind: scenesync_core::ErrorKind::Validation,
            message: "nope".into(),
        }));
    }
}
