//! 2D transform value.
//!
//! [`Transform2D`] is position, rotation and scale in the plane. Canvases
//! draw in this space, and the tick loop integrates velocities into it.

use glam::{Affine2, Vec2};
use serde::{Deserialize, Serialize};

/// Position, rotation (radians, counter-clockwise) and per-axis scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform2D {
    /// World-space position.
    pub position: Vec2,
    /// Rotation in radians.
    pub rotation: f32,
    /// Per-axis scale factor.
    pub scale: Vec2,
}

impl Transform2D {
    /// The identity transform: origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        position: Vec2::ZERO,
        rotation: 0.0,
        scale: Vec2::ONE,
    };

    #[must_use]
    pub fn from_position(position: Vec2) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// The affine matrix mapping local space into world space.
    #[must_use]
    pub fn to_affine(&self) -> Affine2 {
        Affine2::from_scale_angle_translation(self.scale, self.rotation, self.position)
    }

    /// Map a local-space point into world space.
    #[must_use]
    pub fn transform_point(&self, point: Vec2) -> Vec2 {
        self.to_affine().transform_point2(point)
    }

    #[must_use]
    pub fn translated(mut self, offset: Vec2) -> Self {
        self.position += offset;
        self
    }

    /// Rotate by `angle` radians, wrapping into `(-PI, PI]`.
    #[must_use]
    pub fn rotated(mut self, angle: f32) -> Self {
        self.rotation = wrap_angle(self.rotation + angle);
        self
    }

    #[must_use]
    pub fn scaled(mut self, factor: f32) -> Self {
        self.scale *= factor;
        self
    }

    /// Advance by a linear and angular velocity over `dt` seconds.
    #[must_use]
    pub fn integrate(self, velocity: Vec2, angular_velocity: f32, dt: f32) -> Self {
        self.translated(velocity * dt).rotated(angular_velocity * dt)
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

fn wrap_angle(angle: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, PI};

    use super::*;

    fn close(a: Vec2, b: Vec2) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_identity_transform() {
        let t = Transform2D::IDENTITY;
        assert_eq!(t.position, Vec2::ZERO);
        assert_eq!(t.rotation, 0.0);
        assert_eq!(t.scale, Vec2::ONE);
        assert_eq!(t.to_affine(), Affine2::IDENTITY);
    }

    #[test]
    fn test_transform_point_applies_scale_rotation_translation() {
        let t = Transform2D::from_position(Vec2::new(10.0, 0.0))
            .rotated(FRAC_PI_2)
            .scaled(2.0);
        let p = t.transform_point(Vec2::X);
        assert!(close(p, Vec2::new(10.0, 2.0)));
    }

    #[test]
    fn test_rotation_wraps() {
        let t = Transform2D::IDENTITY.rotated(3.0 * PI / 2.0);
        assert!((t.rotation + FRAC_PI_2).abs() < 1e-5);
        let t = Transform2D::IDENTITY.rotated(PI);
        assert!((t.rotation - PI).abs() < 1e-5);
    }

    #[test]
    fn test_integrate() {
        let t = Transform2D::IDENTITY.integrate(Vec2::new(2.0, -4.0), 1.0, 0.5);
        assert!(close(t.position, Vec2::new(1.0, -2.0)));
        assert!((t.rotation - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let t = Transform2D::from_position(Vec2::new(1.0, 2.0)).rotated(0.25);
        let json = serde_json::to_string(&t).unwrap();
        let restored: Transform2D = serde_json::from_str(&json).unwrap();
        assert_eq!(t, restored);
    }
}
