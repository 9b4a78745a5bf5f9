//! # engine_math
//!
//! Math types for the engine. Re-exports [`glam`] for linear algebra and
//! defines the engine-specific [`Transform2D`] value updated by the tick
//! loop's fibers.

pub mod transform;

// Re-export glam types for convenience.
pub use glam::{Affine2, Mat3, Vec2, Vec3};

pub use transform::Transform2D;
