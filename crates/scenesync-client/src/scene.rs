//! What the renderer sees.
//!
//! The mirror tracks where objects *are*; the scene holds where they are
//! *drawn*, which lags behind while an interpolation is running. Drivers
//! write to it from their own tasks, so it sits behind a mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use scenesync_core::{GeometryPayload, ObjectId, SceneObject};
use scenesync_geometry::{Color, Transform};

/// Visible state of one object
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedObject {
    pub kind: String,
    pub transform: Transform,
    pub color: Color,
    pub geometry: GeometryPayload,
}

impl From<&SceneObject> for RenderedObject {
    fn from(object: &SceneObject) -> Self {
        Self {
            kind: object.kind.clone(),
            transform: object.transform,
            color: object.color,
            geometry: object.geometry.clone(),
        }
    }
}

/// Shared handle to the rendered scene
#[derive(Debug, Clone, Default)]
pub struct Scene {
    objects: Arc<Mutex<HashMap<ObjectId, RenderedObject>>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    // A driver that panicked mid-write leaves at worst a stale transform
    fn lock(&self) -> MutexGuard<'_, HashMap<ObjectId, RenderedObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: ObjectId) -> Option<RenderedObject> {
        self.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn set(&self, id: ObjectId, object: RenderedObject) {
        self.lock().insert(id, object);
    }

    /// Mutate one object in place. Returns false if it is not in the scene.
    pub fn update(&self, id: ObjectId, f: impl FnOnce(&mut RenderedObject)) -> bool {
        match self.lock().get_mut(&id) {
            Some(object) => {
                f(object);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: ObjectId) -> Option<RenderedObject> {
        self.lock().remove(&id)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.lock().keys().copied().collect()
    }
}
