//! Signed distance fields: primitives, CSG combinators and transformers.
//!
//! Distances are negative inside. Every combinator keeps its result a lower
//! bound on the true distance so sphere tracing never steps through a
//! surface.

mod trace;
mod transformer;

pub use trace::{estimate_normal, sphere_trace, DistanceField, TraceSettings};
pub use transformer::{reflect_point, repeat_point, Transformer, MAX_FOLD_ITERATIONS};

use lumen_math::{Aabb, Vec3};

/// Pre-normalized tetrahedron face normals
pub const TETRA_NORMALS: [Vec3; 4] = [
    Vec3::new(0.577_350_26, 0.577_350_26, 0.577_350_26),
    Vec3::new(-0.577_350_26, -0.577_350_26, 0.577_350_26),
    Vec3::new(-0.577_350_26, 0.577_350_26, -0.577_350_26),
    Vec3::new(0.577_350_26, -0.577_350_26, -0.577_350_26),
];

/// A node of an SDF expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SdfNode {
    Sphere { radius: f32 },
    /// Axis-aligned box centered at the origin.
    Box { half_extents: Vec3 },
    /// Half-space below `p·normal = delta`; `normal` is unit length.
    Plane { normal: Vec3, delta: f32 },
    /// Regular tetrahedron; `size` is the center-to-face distance.
    Tetrahedron { size: f32 },
    Union(Vec<SdfNode>),
    Intersection(Vec<SdfNode>),
    Difference {
        positive: Box<SdfNode>,
        negative: Box<SdfNode>,
    },
    /// Inflates the child surface by `radius`.
    Round { child: Box<SdfNode>, radius: f32 },
    Transform {
        transformer: Transformer,
        child: Box<SdfNode>,
    },
}

impl SdfNode {
    pub fn sphere(radius: f32) -> Self {
        SdfNode::Sphere { radius }
    }

    pub fn cube(half_extents: Vec3) -> Self {
        SdfNode::Box { half_extents }
    }

    /// Plane `p·normal = delta`; the normal is normalized here.
    pub fn plane(normal: Vec3, delta: f32) -> Self {
        let len = normal.length();
        if len > 0.0 {
            SdfNode::Plane {
                normal: normal / len,
                delta: delta / len,
            }
        } else {
            SdfNode::Plane {
                normal: Vec3::Z,
                delta,
            }
        }
    }

    pub fn tetrahedron(size: f32) -> Self {
        SdfNode::Tetrahedron { size }
    }

    pub fn union(children: Vec<SdfNode>) -> Self {
        SdfNode::Union(children)
    }

    pub fn intersection(children: Vec<SdfNode>) -> Self {
        SdfNode::Intersection(children)
    }

    pub fn difference(positive: SdfNode, negative: SdfNode) -> Self {
        SdfNode::Difference {
            positive: Box::new(positive),
            negative: Box::new(negative),
        }
    }

    pub fn round(self, radius: f32) -> Self {
        SdfNode::Round {
            child: Box::new(self),
            radius,
        }
    }

    pub fn transformed(self, transformer: Transformer) -> Self {
        SdfNode::Transform {
            transformer,
            child: Box::new(self),
        }
    }

    /// Signed distance from `p` to the surface.
    ///
    /// An empty union is empty space (`+inf`); an empty intersection is all
    /// space (`-inf`).
    pub fn distance(&self, p: Vec3) -> f32 {
        match self {
            SdfNode::Sphere { radius } => sdf_sphere(p, *radius),
            SdfNode::Box { half_extents } => sdf_box(p, *half_extents),
            SdfNode::Plane { normal, delta } => sdf_plane(p, *normal, *delta),
            SdfNode::Tetrahedron { size } => sdf_tetrahedron(p, *size),
            SdfNode::Union(children) => children
                .iter()
                .fold(f32::INFINITY, |d, c| d.min(c.distance(p))),
            SdfNode::Intersection(children) => children
                .iter()
                .fold(f32::NEG_INFINITY, |d, c| d.max(c.distance(p))),
            SdfNode::Difference { positive, negative } => {
                positive.distance(p).max(-negative.distance(p))
            }
            SdfNode::Round { child, radius } => child.distance(p) - radius,
            SdfNode::Transform { transformer, child } => {
                let (q, factor) = transformer.apply(p);
                child.distance(q) * factor
            }
        }
    }

    /// Conservative bound of the region where the distance can be `<= 0`.
    pub fn bounds(&self) -> Aabb {
        match self {
            SdfNode::Sphere { radius } => Aabb::new(Vec3::splat(-radius), Vec3::splat(*radius)),
            SdfNode::Box { half_extents } => Aabb::new(-*half_extents, *half_extents),
            SdfNode::Plane { .. } => Aabb::UNIVERSE,
            SdfNode::Tetrahedron { size } => {
                let r = 3.0_f32.sqrt() * size;
                Aabb::new(Vec3::splat(-r), Vec3::splat(r))
            }
            SdfNode::Union(children) => children
                .iter()
                .fold(Aabb::EMPTY, |acc, c| acc.hull(&c.bounds())),
            SdfNode::Intersection(children) => children
                .iter()
                .fold(Aabb::UNIVERSE, |acc, c| acc.intersection(&c.bounds())),
            SdfNode::Difference { positive, .. } => positive.bounds(),
            SdfNode::Round { child, radius } => {
                let b = child.bounds();
                if b.is_empty() {
                    b
                } else {
                    Aabb::new(b.min - Vec3::splat(*radius), b.max + Vec3::splat(*radius))
                }
            }
            SdfNode::Transform { transformer, child } => transformer.bounds(child.bounds()),
        }
    }
}

#[inline]
pub fn sdf_sphere(p: Vec3, radius: f32) -> f32 {
    p.length() - radius
}

#[inline]
pub fn sdf_box(p: Vec3, half_extents: Vec3) -> f32 {
    let q = p.abs() - half_extents;
    q.max(Vec3::ZERO).length() + q.max_element().min(0.0)
}

#[inline]
pub fn sdf_plane(p: Vec3, normal: Vec3, delta: f32) -> f32 {
    p.dot(normal) - delta
}

#[inline]
pub fn sdf_tetrahedron(p: Vec3, size: f32) -> f32 {
    let mut d = f32::NEG_INFINITY;
    for n in &TETRA_NORMALS {
        d = d.max(p.dot(*n));
    }
    d - size
}
