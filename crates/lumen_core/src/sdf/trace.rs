//! Sphere tracing against an [`SdfNode`].

use lumen_math::{Ray, Vec3};
use serde::{Deserialize, Serialize};

use super::SdfNode;
use crate::error::{SdfError, SdfResult};

/// Anything that can be sphere traced.
pub trait DistanceField {
    /// Signed distance at `p`; must be a lower bound on the true distance.
    fn distance(&self, p: Vec3) -> f32;
}

impl DistanceField for SdfNode {
    #[inline]
    fn distance(&self, p: Vec3) -> f32 {
        SdfNode::distance(self, p)
    }
}

/// Sphere tracing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    /// A sample with `|distance| <= epsilon` counts as a hit.
    pub epsilon: f32,
    /// Step used for central-difference normals.
    pub normal_epsilon: f32,
    pub max_steps: u32,
    /// Euclidean distance budget along the ray.
    pub max_trace_distance: f32,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            epsilon: 1e-4,
            normal_epsilon: 1e-3,
            max_steps: 256,
            max_trace_distance: 1000.0,
        }
    }
}

impl TraceSettings {
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_trace_distance(mut self, distance: f32) -> Self {
        self.max_trace_distance = distance;
        self
    }
}

/// March `ray` through `node` over `(min, max)`.
///
/// Steps by `|d| / |dir|` (never less than `epsilon / |dir|`). A ray that
/// starts inside the surface shell must leave it before a hit can register,
/// which keeps secondary rays from re-hitting their own origin. Returns
/// `Err` only when the field yields NaN for a finite sample point.
pub fn sphere_trace<F: DistanceField + ?Sized>(
    node: &F,
    ray: &Ray,
    min: f32,
    max: f32,
    settings: &TraceSettings,
) -> SdfResult<Option<f32>> {
    let dir_len = ray.direction.length();
    if !(dir_len > 0.0) || !dir_len.is_finite() || !ray.origin.is_finite() {
        return Ok(None);
    }

    let mut t = min;
    let mut departed = false;
    for _ in 0..settings.max_steps {
        let p = ray.at(t);
        let d = node.distance(p);
        if d.is_nan() {
            return Err(SdfError::NanDistance { t });
        }
        if !d.is_finite() {
            return Ok(None);
        }

        if d.abs() <= settings.epsilon {
            if departed && t > min {
                return Ok(Some(t));
            }
        } else {
            departed = true;
        }

        t += d.abs().max(settings.epsilon) / dir_len;
        if !(t < max) || t * dir_len > settings.max_trace_distance {
            return Ok(None);
        }
    }
    Ok(None)
}

/// Central-difference gradient of the field at `p`, normalized.
pub fn estimate_normal<F: DistanceField + ?Sized>(node: &F, p: Vec3, h: f32) -> Vec3 {
    let dx = Vec3::new(h, 0.0, 0.0);
    let dy = Vec3::new(0.0, h, 0.0);
    let dz = Vec3::new(0.0, 0.0, h);
    Vec3::new(
        node.distance(p + dx) - node.distance(p - dx),
        node.distance(p + dy) - node.distance(p - dy),
        node.distance(p + dz) - node.distance(p - dz),
    )
    .normalize_or_zero()
}
