// Re-export glam for convenience
pub use glam::*;

// Lumen math types
mod aabb;
mod interval;
mod ray;
mod transform;

pub use aabb::Aabb;
pub use interval::Interval;
pub use ray::Ray;
pub use transform::{is_invertible, Mat4Ext};

/// Threshold below which a denominator is treated as zero by the
/// intersection kernels (parallel rays, degenerate slabs).
pub const DENOM_EPSILON: f32 = 1e-8;
