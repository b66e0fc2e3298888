// Transform utilities for Mat4
//
// Extends glam::Mat4 with the helpers the intersection code needs.
// glam::Mat4 already provides transform_point3(), transform_vector3() and inverse().

use crate::Aabb;
use glam::{Mat3, Mat4, Vec3};

/// Determinant magnitude below which a matrix is treated as singular.
const SINGULAR_EPSILON: f32 = 1e-12;

/// True when `m` has a usable inverse.
pub fn is_invertible(m: &Mat4) -> bool {
    let det = m.determinant();
    det.is_finite() && det.abs() > SINGULAR_EPSILON
}

/// Extension trait for Mat4 to provide additional transform utilities
pub trait Mat4Ext {
    /// Transform an axis-aligned bounding box.
    /// Computes the bounding box of all 8 transformed corners. Empty stays
    /// empty and unbounded input yields [`Aabb::UNIVERSE`].
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb;

    /// Inverse-transpose of the linear part, for carrying normals.
    fn normal_matrix(&self) -> Mat3;

    /// Transform a surface normal from local to world space and normalize it.
    fn transform_normal(&self, normal: Vec3) -> Vec3;
}

impl Mat4Ext for Mat4 {
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb {
        if aabb.is_empty() {
            return Aabb::EMPTY;
        }
        if !aabb.is_finite() {
            return Aabb::UNIVERSE;
        }

        let mut result = Aabb::EMPTY;
        for corner in aabb.corners() {
            let p = self.transform_point3(corner);
            result.min = result.min.min(p);
            result.max = result.max.max(p);
        }

        if result.is_finite() {
            // Pads axes flattened by the transform (squares, triangles).
            Aabb::from_points(result.min, result.max)
        } else {
            Aabb::UNIVERSE
        }
    }

    fn normal_matrix(&self) -> Mat3 {
        Mat3::from_mat4(*self).inverse().transpose()
    }

    fn transform_normal(&self, normal: Vec3) -> Vec3 {
        (self.normal_matrix() * normal).normalize_or_zero()
    }
}
