//! Scene objects, patches and session rows.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use scenesync_geometry::{Color, Transform, Vec3};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{ObjectId, RoomId, UserId};

/// Milliseconds since the unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Opaque mesh/geometry blob produced by the geometry builders.
///
/// Binary on the wire, base64 in JSON snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeometryPayload(pub Vec<u8>);

impl GeometryPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for GeometryPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

struct GeometryVisitor;

impl<'de> serde::de::Visitor<'de> for GeometryVisitor {
    type Value = GeometryPayload;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("geometry bytes or a base64 string")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        BASE64
            .decode(v)
            .map(GeometryPayload)
            .map_err(E::custom)
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(GeometryPayload(v.to_vec()))
    }

    fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(GeometryPayload(v))
    }

    fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(b) = seq.next_element::<u8>()? {
            bytes.push(b);
        }
        Ok(GeometryPayload(bytes))
    }
}

impl<'de> Deserialize<'de> for GeometryPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(GeometryVisitor)
        } else {
            deserializer.deserialize_byte_buf(GeometryVisitor)
        }
    }
}

/// The authoritative shape of a shared object, as stored and broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub id: ObjectId,
    pub room_id: RoomId,
    /// Primitive kind (box, sphere, mesh, ...)
    pub kind: String,
    pub transform: Transform,
    pub color: Color,
    pub geometry: GeometryPayload,
    /// Free-form properties (dimensions, name, material hints)
    #[serde(default)]
    pub properties: serde_json::Value,
    pub created_by: UserId,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SceneObject {
    /// The create payload that would reproduce this object
    pub fn to_new_object(&self) -> NewObject {
        NewObject {
            id: self.id,
            kind: self.kind.clone(),
            transform: self.transform,
            color: self.color,
            geometry: self.geometry.clone(),
            properties: self.properties.clone(),
        }
    }

    /// Apply a partial update in place. Returns true if any field changed.
    pub fn apply_patch(&mut self, patch: &ObjectPatch) -> bool {
        let before = self.clone();
        if let Some(kind) = &patch.kind {
            self.kind = kind.clone();
        }
        if let Some(p) = patch.position {
            self.transform.position = p;
        }
        if let Some(r) = patch.rotation {
            self.transform.rotation = r;
        }
        if let Some(s) = patch.scale {
            self.transform.scale = s;
        }
        if let Some(c) = patch.color {
            self.color = c;
        }
        if let Some(g) = &patch.geometry {
            self.geometry = g.clone();
        }
        if let Some(props) = &patch.properties {
            self.properties = props.clone();
        }
        *self != before
    }
}

/// Create request payload. The id is minted by the creating client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObject {
    pub id: ObjectId,
    pub kind: String,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub color: Color,
    #[serde(default)]
    pub geometry: GeometryPayload,
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl NewObject {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            kind: kind.into(),
            transform: Transform::default(),
            color: Color::default(),
            geometry: GeometryPayload::default(),
            properties: serde_json::Value::Null,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_geometry(mut self, geometry: GeometryPayload) -> Self {
        self.geometry = geometry;
        self
    }

    /// Materialize into a full object owned by `room_id`
    pub fn into_object(self, room_id: RoomId, created_by: UserId, now: u64) -> SceneObject {
        SceneObject {
            id: self.id,
            room_id,
            kind: self.kind,
            transform: self.transform,
            color: self.color,
            geometry: self.geometry,
            properties: self.properties,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<GeometryPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

impl ObjectPatch {
    pub fn is_empty(&self) -> bool {
        *self == ObjectPatch::default()
    }

    pub fn transform(t: Transform) -> Self {
        Self {
            position: Some(t.position),
            rotation: Some(t.rotation),
            scale: Some(t.scale),
            ..Default::default()
        }
    }

    pub fn position(p: Vec3) -> Self {
        Self {
            position: Some(p),
            ..Default::default()
        }
    }

    pub fn color(c: Color) -> Self {
        Self {
            color: Some(c),
            ..Default::default()
        }
    }

    pub fn geometry(g: GeometryPayload) -> Self {
        Self {
            geometry: Some(g),
            ..Default::default()
        }
    }

    /// Every mutable field of `obj`, used to restore a full snapshot
    pub fn from_object(obj: &SceneObject) -> Self {
        Self {
            kind: Some(obj.kind.clone()),
            position: Some(obj.transform.position),
            rotation: Some(obj.transform.rotation),
            scale: Some(obj.transform.scale),
            color: Some(obj.color),
            geometry: Some(obj.geometry.clone()),
            properties: Some(obj.properties.clone()),
        }
    }

    /// Fold a later patch into this one; the later value of each field wins
    pub fn merge(&mut self, later: ObjectPatch) {
        if later.kind.is_some() {
            self.kind = later.kind;
        }
        if later.position.is_some() {
            self.position = later.position;
        }
        if later.rotation.is_some() {
            self.rotation = later.rotation;
        }
        if later.scale.is_some() {
            self.scale = later.scale;
        }
        if later.color.is_some() {
            self.color = later.color;
        }
        if later.geometry.is_some() {
            self.geometry = later.geometry;
        }
        if later.properties.is_some() {
            self.properties = later.properties;
        }
    }

    pub fn touches_transform(&self) -> bool {
        self.position.is_some() || self.rotation.is_some() || self.scale.is_some()
    }
}

/// One row of the session table, keyed by (user_id, room_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub user_id: UserId,
    pub room_id: RoomId,
    #[serde(default)]
    pub user_email: Option<String>,
    pub cursor: Vec3,
    pub last_seen: u64,
}

impl SessionInfo {
    pub fn new(user_id: UserId, room_id: RoomId, user_email: Option<String>) -> Self {
        Self {
            user_id,
            room_id,
            user_email,
            cursor: Vec3::ZERO,
            last_seen: now_ms(),
        }
    }

    /// Email if known, otherwise a short name derived from the user id
    pub fn display_name(&self) -> String {
        display_name(&self.user_id, self.user_email.as_deref())
    }
}

pub fn display_name(user_id: &UserId, email: Option<&str>) -> String {
    match email {
        Some(email) if !email.is_empty() => email.to_string(),
        _ => {
            let short: String = user_id.as_str().chars().take(8).collect();
            format!("User-{short}")
        }
    }
}
