//! Transform and color math for shared scene objects.
//!
//! Everything here is plain value types: the mirror, the interpolator and the
//! undo history all compare and blend transforms through these helpers so they
//! agree on what counts as "moved".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Linear interpolation between two scalars
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// A 3-component vector (positions, euler rotations, scales)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Vec3 = Vec3 { x: 1.0, y: 1.0, z: 1.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn lerp(self, other: Vec3, t: f64) -> Vec3 {
        Vec3 {
            x: lerp(self.x, other.x, t),
            y: lerp(self.y, other.y, t),
            z: lerp(self.z, other.z, t),
        }
    }

    /// Largest absolute per-axis difference
    pub fn max_abs_diff(self, other: Vec3) -> f64 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
    }

    pub fn distance(self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Position, euler rotation (radians) and scale of an object
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Blend every component towards `other`. `t` is clamped to [0, 1].
    pub fn lerp(&self, other: &Transform, t: f64) -> Transform {
        let t = t.clamp(0.0, 1.0);
        Transform {
            position: self.position.lerp(other.position, t),
            rotation: self.rotation.lerp(other.rotation, t),
            scale: self.scale.lerp(other.scale, t),
        }
    }

    /// Largest absolute difference over all nine scalars
    pub fn max_delta(&self, other: &Transform) -> f64 {
        self.position
            .max_abs_diff(other.position)
            .max(self.rotation.max_abs_diff(other.rotation))
            .max(self.scale.max_abs_diff(other.scale))
    }

    pub fn approx_eq(&self, other: &Transform, epsilon: f64) -> bool {
        self.max_delta(other) <= epsilon
    }

    /// The nine scalars in store column order (px, py, pz, rx, ry, rz, sx, sy, sz)
    pub fn to_array(&self) -> [f64; 9] {
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.scale.x,
            self.scale.y,
            self.scale.z,
        ]
    }

    pub fn from_array(v: [f64; 9]) -> Self {
        Self {
            position: Vec3::new(v[0], v[1], v[2]),
            rotation: Vec3::new(v[3], v[4], v[5]),
            scale: Vec3::new(v[6], v[7], v[8]),
        }
    }
}

/// 24-bit RGB color, serialized as `#rrggbb`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(0xff, 0xff, 0xff);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xff) as u8,
            g: ((hex >> 8) & 0xff) as u8,
            b: (hex & 0xff) as u8,
        }
    }

    pub fn to_hex(self) -> u32 {
        (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }

    /// Per-channel blend, rounded to the nearest channel value
    pub fn lerp(self, other: Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let ch = |a: u8, b: u8| lerp(f64::from(a), f64::from(b), t).round() as u8;
        Color {
            r: ch(self.r, other.r),
            g: ch(self.g, other.g),
            b: ch(self.b, other.b),
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid color: {0}")]
pub struct ParseColorError(String);

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').unwrap_or(s);
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseColorError(s.to_string()));
        }
        u32::from_str_radix(digits, 16)
            .map(Color::from_hex)
            .map_err(|_| ParseColorError(s.to_string()))
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn transform_lerp_endpoints_and_midpoint() {
        let a = Transform::default();
        let b = Transform {
            position: Vec3::new(10.0, -4.0, 2.0),
            rotation: Vec3::new(0.0, 1.0, 0.0),
            scale: Vec3::new(2.0, 2.0, 2.0),
        };
        assert_eq!(a.lerp(&b, 0.0), a);
        assert_eq!(a.lerp(&b, 1.0), b);
        let mid = a.lerp(&b, 0.5);
        assert_eq!(mid.position, Vec3::new(5.0, -2.0, 1.0));
        assert_eq!(mid.scale, Vec3::new(1.5, 1.5, 1.5));
        // Clamped past the end
        assert_eq!(a.lerp(&b, 3.0), b);
    }

    #[test]
    fn max_delta_covers_all_components() {
        let a = Transform::default();
        let mut b = a;
        b.scale.z = 1.25;
        assert_eq!(a.max_delta(&b), 0.25);
        assert!(!a.approx_eq(&b, 0.1));
        assert!(a.approx_eq(&b, 0.3));
    }

    #[test]
    fn transform_array_order() {
        let t = Transform::from_array([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(t.rotation, Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(t.to_array()[8], 9.0);
    }

    #[test]
    fn color_hex_string() {
        let c: Color = "#ff8000".parse().unwrap();
        assert_eq!(c, Color::rgb(255, 128, 0));
        assert_eq!(c.to_string(), "#ff8000");
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"#ff8000\"");
        assert!("#ff80".parse::<Color>().is_err());
        assert!("zzzzzz".parse::<Color>().is_err());
        // Sign characters are not hex digits
        assert!("+12345".parse::<Color>().is_err());
        assert!("#-12345".parse::<Color>().is_err());
        let err = "#+12345".parse::<Color>().unwrap_err();
        assert_eq!(err.to_string(), "invalid color: #+12345");
    }

    #[test]
    fn color_lerp_rounds() {
        let black = Color::rgb(0, 0, 0);
        assert_eq!(black.lerp(Color::WHITE, 0.5), Color::rgb(128, 128, 128));
        assert_eq!(black.lerp(Color::WHITE, 1.0), Color::WHITE);
    }

    proptest! {
        #[test]
        fn lerp_stays_between_endpoints(a in -1e6f64..1e6, b in -1e6f64..1e6, t in 0.0f64..=1.0) {
            let v = lerp(a, b, t);
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            prop_assert!(v >= lo - 1e-6 && v <= hi + 1e-6);
        }

        #[test]
        fn color_hex_is_lossless(hex in 0u32..=0xff_ffff) {
            let c = Color::from_hex(hex);
            prop_assert_eq!(c.to_hex(), hex);
            prop_assert_eq!(c.to_string().parse::<Color>().unwrap(), c);
        }
    }
}
