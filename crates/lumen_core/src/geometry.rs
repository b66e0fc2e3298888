//! Closed-form ray intersection kernels for every primitive shape.
//!
//! All shapes live in a local unit frame; the owning scene node carries the
//! transform. Rays are not normalized, so a hit distance `t` means the same
//! point before and after the ray is transformed into local space.

use std::f32::consts::PI;

use lumen_math::{Aabb, Mat4, Mat4Ext, Ray, Vec2, Vec3, DENOM_EPSILON};

use crate::sdf::{estimate_normal, sphere_trace, SdfNode, TraceSettings};

/// Local-space surface attributes at a hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceData {
    pub point: Vec3,
    /// Outward geometric normal, unit length.
    pub normal: Vec3,
    pub uv: Vec2,
}

/// An SDF expression traced with its own settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SdfGeometry {
    pub root: SdfNode,
    pub settings: TraceSettings,
}

impl SdfGeometry {
    pub fn new(root: SdfNode) -> Self {
        Self {
            root,
            settings: TraceSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: TraceSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Primitive shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Points with `normal·p = delta`. Unbounded.
    Plane { normal: Vec3, delta: f32 },
    /// `z = 0`, `|x| <= 1`, `|y| <= 1`.
    Square,
    /// `z = 0`, `x² + y² <= 1`.
    Circle,
    /// Unit sphere at the origin.
    Sphere,
    /// `[-1, 1]³`.
    Box,
    /// Open tube `x² + y² = 1`, `-1 <= z <= 1`.
    Cylinder,
    Triangle { a: Vec3, b: Vec3, c: Vec3 },
    Sdf(SdfGeometry),
}

impl Geometry {
    pub fn plane(normal: Vec3, delta: f32) -> Self {
        Geometry::Plane { normal, delta }
    }

    pub fn triangle(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Geometry::Triangle { a, b, c }
    }

    pub fn sdf(root: SdfNode) -> Self {
        Geometry::Sdf(SdfGeometry::new(root))
    }

    /// Nearest hit with `min < t < max`, in the ray's parametrization.
    ///
    /// An SDF that faults (NaN distance) is logged and reported as no hit
    /// for this ray.
    pub fn intersect(&self, ray: &Ray, min: f32, max: f32) -> Option<f32> {
        match self {
            Geometry::Plane { normal, delta } => intersect_plane(ray, *normal, *delta, min, max),
            Geometry::Square => intersect_square(ray, min, max),
            Geometry::Circle => intersect_circle(ray, min, max),
            Geometry::Sphere => intersect_unit_sphere(ray, min, max),
            Geometry::Box => intersect_unit_box(ray, min, max),
            Geometry::Cylinder => intersect_unit_cylinder(ray, min, max),
            Geometry::Triangle { a, b, c } => intersect_triangle(ray, *a, *b, *c, min, max),
            Geometry::Sdf(sdf) => match sphere_trace(&sdf.root, ray, min, max, &sdf.settings) {
                Ok(hit) => hit,
                Err(err) => {
                    log::error!("{err}; ray {ray:?} abandoned");
                    None
                }
            },
        }
    }

    /// Surface attributes at `ray.at(t)`.
    pub fn material_data(&self, ray: &Ray, t: f32) -> SurfaceData {
        let point = ray.at(t);
        let (normal, uv) = match self {
            Geometry::Plane { normal, .. } => {
                let n = normal.normalize_or_zero();
                let (tangent, bitangent) = orthonormal_basis(n);
                (n, Vec2::new(point.dot(tangent), point.dot(bitangent)))
            }
            Geometry::Square | Geometry::Circle => (
                Vec3::Z,
                Vec2::new((point.x + 1.0) * 0.5, (point.y + 1.0) * 0.5),
            ),
            Geometry::Sphere => {
                let n = point.normalize_or_zero();
                (n, sphere_uv(n))
            }
            Geometry::Box => box_normal_uv(point),
            Geometry::Cylinder => {
                let n = Vec3::new(point.x, point.y, 0.0).normalize_or_zero();
                let u = (point.y.atan2(point.x) + PI) / (2.0 * PI);
                (n, Vec2::new(u, (point.z + 1.0) * 0.5))
            }
            Geometry::Triangle { a, b, c } => {
                let n = (*b - *a).cross(*c - *a).normalize_or_zero();
                let (v, w) = barycentric(point, *a, *b, *c).unwrap_or((0.0, 0.0));
                (n, Vec2::new(v, w))
            }
            Geometry::Sdf(sdf) => (
                estimate_normal(&sdf.root, point, sdf.settings.normal_epsilon),
                Vec2::ZERO,
            ),
        };
        SurfaceData { point, normal, uv }
    }

    /// Local-space bounds. Unbounded shapes report non-finite bounds.
    pub fn bounds(&self) -> Aabb {
        match self {
            Geometry::Plane { .. } => Aabb::UNIVERSE,
            Geometry::Square | Geometry::Circle => {
                Aabb::from_points(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 0.0))
            }
            Geometry::Sphere | Geometry::Box | Geometry::Cylinder => {
                Aabb::new(Vec3::splat(-1.0), Vec3::ONE)
            }
            Geometry::Triangle { a, b, c } => Aabb::from_point_cloud([*a, *b, *c]),
            Geometry::Sdf(sdf) => sdf.root.bounds(),
        }
    }

    /// Bounds after applying `m` (local to parent).
    ///
    /// Spheres and planes use exact formulas; corner hulling would
    /// overestimate a rotated sphere and is meaningless for a plane.
    pub fn transformed_bounds(&self, m: &Mat4) -> Aabb {
        match self {
            Geometry::Sphere => {
                let center = m.transform_point3(Vec3::ZERO);
                let extent = Vec3::new(
                    Vec3::new(m.x_axis.x, m.y_axis.x, m.z_axis.x).length(),
                    Vec3::new(m.x_axis.y, m.y_axis.y, m.z_axis.y).length(),
                    Vec3::new(m.x_axis.z, m.y_axis.z, m.z_axis.z).length(),
                );
                Aabb::new(center - extent, center + extent)
            }
            Geometry::Plane { normal, delta } => plane_bounds(*normal, *delta, m),
            _ => m.transform_aabb(&self.bounds()),
        }
    }
}

#[inline]
fn accept(t: f32, min: f32, max: f32) -> bool {
    t > min && t < max
}

/// Shared plane test used by plane, square and circle.
pub fn intersect_plane(ray: &Ray, normal: Vec3, delta: f32, min: f32, max: f32) -> Option<f32> {
    let denom = normal.dot(ray.direction);
    if denom.abs() < DENOM_EPSILON {
        return None;
    }
    let t = (delta - normal.dot(ray.origin)) / denom;
    accept(t, min, max).then_some(t)
}

pub fn intersect_square(ray: &Ray, min: f32, max: f32) -> Option<f32> {
    let t = intersect_plane(ray, Vec3::Z, 0.0, min, max)?;
    let p = ray.at(t);
    (p.x.abs() <= 1.0 && p.y.abs() <= 1.0).then_some(t)
}

pub fn intersect_circle(ray: &Ray, min: f32, max: f32) -> Option<f32> {
    let t = intersect_plane(ray, Vec3::Z, 0.0, min, max)?;
    let p = ray.at(t);
    (p.x * p.x + p.y * p.y <= 1.0).then_some(t)
}

pub fn intersect_unit_sphere(ray: &Ray, min: f32, max: f32) -> Option<f32> {
    let a = ray.direction.length_squared();
    if a < DENOM_EPSILON {
        return None;
    }
    let h = ray.direction.dot(ray.origin);
    let c = ray.origin.length_squared() - 1.0;

    let discriminant = h * h - a * c;
    if discriminant < 0.0 {
        return None;
    }
    let sqrtd = discriminant.sqrt();

    // Nearest root in the acceptable range
    let near = (-h - sqrtd) / a;
    if accept(near, min, max) {
        return Some(near);
    }
    let far = (-h + sqrtd) / a;
    accept(far, min, max).then_some(far)
}

pub fn intersect_unit_box(ray: &Ray, min: f32, max: f32) -> Option<f32> {
    let mut t_near = f32::NEG_INFINITY;
    let mut t_far = f32::INFINITY;
    for axis in 0..3 {
        let o = ray.origin[axis];
        let d = ray.direction[axis];
        if d.abs() < DENOM_EPSILON {
            if o.abs() > 1.0 {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let mut t0 = (-1.0 - o) * inv;
        let mut t1 = (1.0 - o) * inv;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        t_near = t_near.max(t0);
        t_far = t_far.min(t1);
        if t_near > t_far {
            return None;
        }
    }

    if accept(t_near, min, max) {
        Some(t_near)
    } else {
        accept(t_far, min, max).then_some(t_far)
    }
}

pub fn intersect_unit_cylinder(ray: &Ray, min: f32, max: f32) -> Option<f32> {
    let (o, d) = (ray.origin, ray.direction);
    let a = d.x * d.x + d.y * d.y;
    if a < DENOM_EPSILON {
        return None;
    }
    let h = o.x * d.x + o.y * d.y;
    let c = o.x * o.x + o.y * o.y - 1.0;

    let discriminant = h * h - a * c;
    if discriminant < 0.0 {
        return None;
    }
    let sqrtd = discriminant.sqrt();

    for t in [(-h - sqrtd) / a, (-h + sqrtd) / a] {
        if accept(t, min, max) && (o.z + t * d.z).abs() <= 1.0 {
            return Some(t);
        }
    }
    None
}

pub fn intersect_triangle(
    ray: &Ray,
    a: Vec3,
    b: Vec3,
    c: Vec3,
    min: f32,
    max: f32,
) -> Option<f32> {
    let normal = (b - a).cross(c - a);
    let t = intersect_plane(ray, normal, normal.dot(a), min, max)?;
    let (v, w) = barycentric(ray.at(t), a, b, c)?;
    (v >= 0.0 && w >= 0.0 && v + w <= 1.0).then_some(t)
}

/// Barycentric weights of `b` and `c` for a point in the triangle's plane.
fn barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<(f32, f32)> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < DENOM_EPSILON {
        return None;
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Some((v, w))
}

/// UV coordinates for a point on the unit sphere.
fn sphere_uv(p: Vec3) -> Vec2 {
    // theta: angle down from +Y, phi: angle around Y from +X
    let theta = (-p.y).clamp(-1.0, 1.0).acos();
    let phi = (-p.z).atan2(p.x) + PI;
    Vec2::new(phi / (2.0 * PI), theta / PI)
}

fn box_normal_uv(p: Vec3) -> (Vec3, Vec2) {
    let abs = p.abs();
    let (axis, u_axis, v_axis) = if abs.x >= abs.y && abs.x >= abs.z {
        (0, 1, 2)
    } else if abs.y >= abs.z {
        (1, 2, 0)
    } else {
        (2, 0, 1)
    };
    let mut n = Vec3::ZERO;
    n[axis] = p[axis].signum();
    let uv = Vec2::new((p[u_axis] + 1.0) * 0.5, (p[v_axis] + 1.0) * 0.5);
    (n, uv)
}

/// Two unit vectors spanning the plane orthogonal to `n`.
pub fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let helper = if n.x.abs() > 0.9 { Vec3::Y } else { Vec3::X };
    let tangent = helper.cross(n).normalize_or_zero();
    (tangent, n.cross(tangent))
}

fn plane_bounds(normal: Vec3, delta: f32, m: &Mat4) -> Aabb {
    let len_sq = normal.length_squared();
    if !(len_sq > 0.0) {
        return Aabb::UNIVERSE;
    }
    let world_normal = m.normal_matrix() * normal;
    let scale = world_normal.abs().max_element();
    let mut axes = (0..3).filter(|&i| world_normal[i].abs() > 1e-6 * scale);
    let (Some(axis), None) = (axes.next(), axes.next()) else {
        return Aabb::UNIVERSE;
    };

    let on_plane = m.transform_point3(normal * (delta / len_sq));
    let mut out = Aabb::UNIVERSE;
    out.min[axis] = on_plane[axis];
    out.max[axis] = on_plane[axis];
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_hit_and_normal() {
        let sphere = Geometry::Sphere;
        let to_local = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)).inverse();
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        let local = ray.transformed(&to_local);

        let t = sphere.intersect(&local, 0.001, f32::INFINITY).unwrap();
        assert!((t - 4.0).abs() < 1e-5);
        let data = sphere.material_data(&local, t);
        assert!((data.normal - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn test_sphere_from_inside_takes_far_root() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let t = Geometry::Sphere.intersect(&ray, 0.001, 100.0).unwrap();
        assert!((t - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_plane_parallel_ray_misses() {
        let plane = Geometry::plane(Vec3::Y, 0.0);
        let ray = Ray::new(Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, 0.0, -1.0));
        assert_eq!(plane.intersect(&ray, 0.0, f32::INFINITY), None);
    }

    #[test]
    fn test_plane_hit() {
        let plane = Geometry::plane(Vec3::Y, -1.0);
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, -2.0, 0.0));
        assert!((plane.intersect(&ray, 0.0, 10.0).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_square_and_circle_bounds() {
        let ray = Ray::new(Vec3::new(0.9, 0.9, 1.0), Vec3::NEG_Z);
        assert!(Geometry::Square.intersect(&ray, 0.0, 10.0).is_some());
        assert!(Geometry::Circle.intersect(&ray, 0.0, 10.0).is_none());
    }

    #[test]
    fn test_box_axis_parallel() {
        let inside_slab = Ray::new(Vec3::new(0.5, 0.5, 5.0), Vec3::NEG_Z);
        let t = Geometry::Box.intersect(&inside_slab, 0.0, 100.0).unwrap();
        assert!((t - 4.0).abs() < 1e-6);
        let n = Geometry::Box.material_data(&inside_slab, t).normal;
        assert_eq!(n, Vec3::Z);

        let outside_slab = Ray::new(Vec3::new(1.5, 0.5, 5.0), Vec3::NEG_Z);
        assert!(Geometry::Box.intersect(&outside_slab, 0.0, 100.0).is_none());
    }

    #[test]
    fn test_box_from_inside() {
        let ray = Ray::new(Vec3::ZERO, Vec3::Y);
        assert!((Geometry::Box.intersect(&ray, 0.001, 10.0).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cylinder_is_open() {
        let side = Ray::new(Vec3::new(-5.0, 0.0, 0.5), Vec3::X);
        assert!((Geometry::Cylinder.intersect(&side, 0.0, 100.0).unwrap() - 4.0).abs() < 1e-5);

        let past_end = Ray::new(Vec3::new(-5.0, 0.0, 1.5), Vec3::X);
        assert!(Geometry::Cylinder.intersect(&past_end, 0.0, 100.0).is_none());

        // Down the axis there is no cap to hit.
        let along_axis = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        assert!(Geometry::Cylinder.intersect(&along_axis, 0.0, 100.0).is_none());
    }

    #[test]
    fn test_triangle_containment() {
        let tri = Geometry::triangle(Vec3::ZERO, Vec3::X, Vec3::Y);
        let hit = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::NEG_Z);
        let t = tri.intersect(&hit, 0.0, 10.0).unwrap();
        assert!((t - 1.0).abs() < 1e-6);
        let data = tri.material_data(&hit, t);
        assert!((data.uv - Vec2::new(0.25, 0.25)).length() < 1e-5);

        let miss = Ray::new(Vec3::new(0.75, 0.75, 1.0), Vec3::NEG_Z);
        assert!(tri.intersect(&miss, 0.0, 10.0).is_none());
    }

    #[test]
    fn test_sdf_sphere_matches_analytic() {
        let sdf = Geometry::sdf(SdfNode::sphere(1.0));
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        let traced = sdf.intersect(&ray, 0.001, f32::INFINITY).unwrap();
        let analytic = Geometry::Sphere.intersect(&ray, 0.001, f32::INFINITY).unwrap();
        assert!((traced - analytic).abs() <= TraceSettings::default().epsilon);
    }

    #[test]
    fn test_sdf_fault_is_logged_miss() {
        let _ = env_logger::builder().is_test(true).try_init();
        let sdf = Geometry::sdf(SdfNode::sphere(f32::NAN));
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        assert_eq!(sdf.intersect(&ray, 0.0, 100.0), None);
    }

    #[test]
    fn test_sphere_transformed_bounds_are_tight() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0))
            * Mat4::from_rotation_z(0.6)
            * Mat4::from_scale(Vec3::splat(2.0));
        let b = Geometry::Sphere.transformed_bounds(&m);
        assert!((b.min - Vec3::new(-1.0, 0.0, 1.0)).length() < 1e-4);
        assert!((b.max - Vec3::new(3.0, 4.0, 5.0)).length() < 1e-4);
    }

    #[test]
    fn test_plane_transformed_bounds() {
        let m = Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0));
        let b = Geometry::plane(Vec3::Y, 1.0).transformed_bounds(&m);
        assert_eq!(b.min.y, 4.0);
        assert_eq!(b.max.y, 4.0);
        assert!(!b.is_finite());

        let tilted = Geometry::plane(Vec3::new(1.0, 1.0, 0.0), 0.0).transformed_bounds(&Mat4::IDENTITY);
        assert_eq!(tilted, Aabb::UNIVERSE);
    }
}
