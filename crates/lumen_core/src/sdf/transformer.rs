//! Space transformers used by the SDF `Transform` node.
//!
//! A transformer maps a query point into the child's space and returns a
//! factor the child distance is multiplied by, so the result stays a lower
//! bound on the true distance.

use lumen_math::{is_invertible, Aabb, Mat3, Mat4, Mat4Ext, Vec3};

use crate::error::{SdfError, SdfResult};

/// Upper bound on fold iterations of a [`Transformer::Recursive`].
pub const MAX_FOLD_ITERATIONS: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Transformer {
    /// Affine transform. `matrix` maps child space to parent space.
    Matrix {
        matrix: Mat4,
        inverse: Mat4,
        factor: f32,
    },
    /// Applied front to back.
    Sequence(Vec<Transformer>),
    /// `inner` applied `iterations` times.
    Recursive {
        inner: Box<Transformer>,
        iterations: u32,
    },
    /// Folds the negative half-space `p·normal < delta` onto the positive one.
    Reflection { normal: Vec3, delta: f32 },
    /// Repeats the child with the given period on every axis whose period is
    /// positive; other axes are left alone.
    InfiniteRepetition { period: Vec3 },
}

impl Transformer {
    /// Build an affine transformer from a child-to-parent matrix.
    ///
    /// The distance factor is `1 / σ_max(M⁻¹)`, the smallest stretch the
    /// inverse can apply, which keeps anisotropic scales conservative.
    pub fn matrix(matrix: Mat4) -> SdfResult<Self> {
        if !is_invertible(&matrix) {
            return Err(SdfError::DegenerateTransform);
        }
        let inverse = matrix.inverse();
        let sigma = largest_singular_value(Mat3::from_mat4(inverse));
        if !(sigma > 0.0) || !sigma.is_finite() {
            return Err(SdfError::DegenerateTransform);
        }
        Ok(Transformer::Matrix {
            matrix,
            inverse,
            factor: 1.0 / sigma,
        })
    }

    pub fn recursive(inner: Transformer, iterations: u32) -> SdfResult<Self> {
        if iterations > MAX_FOLD_ITERATIONS {
            return Err(SdfError::TooManyIterations {
                requested: iterations,
                limit: MAX_FOLD_ITERATIONS,
            });
        }
        Ok(Transformer::Recursive {
            inner: Box::new(inner),
            iterations,
        })
    }

    /// Mirror plane `p·normal = delta`. The normal is normalized here.
    pub fn reflection(normal: Vec3, delta: f32) -> Self {
        let len = normal.length();
        let (normal, delta) = if len > 0.0 {
            (normal / len, delta / len)
        } else {
            (Vec3::Z, delta)
        };
        Transformer::Reflection { normal, delta }
    }

    /// Map `p` into child space. Returns the point and the distance factor.
    pub fn apply(&self, p: Vec3) -> (Vec3, f32) {
        let mut factor = 1.0;
        let q = self.apply_steps(p, &mut factor);
        (q, factor)
    }

    /// Runs the elementary steps front to back. Each step's factor is
    /// multiplied into `factor` as it runs, so nesting does not change the
    /// rounding of the product.
    fn apply_steps(&self, p: Vec3, factor: &mut f32) -> Vec3 {
        match self {
            Transformer::Matrix { inverse, factor: f, .. } => {
                *factor *= *f;
                inverse.transform_point3(p)
            }
            Transformer::Sequence(steps) => steps.iter().fold(p, |q, step| step.apply_steps(q, factor)),
            Transformer::Recursive { inner, iterations } => {
                (0..*iterations).fold(p, |q, _| inner.apply_steps(q, factor))
            }
            Transformer::Reflection { normal, delta } => reflect_point(p, *normal, *delta),
            Transformer::InfiniteRepetition { period } => repeat_point(p, *period),
        }
    }

    /// Parent-space bound of a child whose bound is `child`.
    pub fn bounds(&self, child: Aabb) -> Aabb {
        if child.is_empty() {
            return child;
        }
        match self {
            Transformer::Matrix { matrix, .. } => matrix.transform_aabb(&child),
            Transformer::Sequence(steps) => steps
                .iter()
                .rev()
                .fold(child, |acc, step| step.bounds(acc)),
            Transformer::Recursive { inner, iterations } => {
                (0..*iterations).fold(child, |acc, _| inner.bounds(acc))
            }
            Transformer::Reflection { normal, delta } => {
                child.hull(&reflection_matrix(*normal, *delta).transform_aabb(&child))
            }
            Transformer::InfiniteRepetition { period } => {
                let mut out = child;
                for axis in 0..3 {
                    if period[axis] > 0.0 {
                        out.min[axis] = f32::NEG_INFINITY;
                        out.max[axis] = f32::INFINITY;
                    }
                }
                out
            }
        }
    }
}

/// Mirror `p` into the half-space `p·normal >= delta`.
#[inline]
pub fn reflect_point(p: Vec3, normal: Vec3, delta: f32) -> Vec3 {
    let side = p.dot(normal) - delta;
    if side < 0.0 {
        p - 2.0 * side * normal
    } else {
        p
    }
}

/// Wrap `p` into the cell centered on the origin for each periodic axis.
#[inline]
pub fn repeat_point(p: Vec3, period: Vec3) -> Vec3 {
    let mut q = p;
    for axis in 0..3 {
        let c = period[axis];
        if c > 0.0 {
            q[axis] = p[axis] - c * (p[axis] / c).round();
        }
    }
    q
}

fn reflection_matrix(normal: Vec3, delta: f32) -> Mat4 {
    let n = normal;
    let linear = Mat3::IDENTITY - Mat3::from_cols(n * n.x, n * n.y, n * n.z) * 2.0;
    Mat4::from_translation(2.0 * delta * n) * Mat4::from_mat3(linear)
}

/// Largest singular value of `a`, from the top eigenvalue of `aᵀa`.
fn largest_singular_value(a: Mat3) -> f32 {
    let m = a.transpose() * a;
    let (a00, a11, a22) = (m.x_axis.x as f64, m.y_axis.y as f64, m.z_axis.z as f64);
    let (a01, a02, a12) = (m.y_axis.x as f64, m.z_axis.x as f64, m.z_axis.y as f64);

    let p1 = a01 * a01 + a02 * a02 + a12 * a12;
    let eig = if p1 == 0.0 {
        a00.max(a11).max(a22)
    } else {
        let q = (a00 + a11 + a22) / 3.0;
        let p2 = (a00 - q).powi(2) + (a11 - q).powi(2) + (a22 - q).powi(2) + 2.0 * p1;
        let p = (p2 / 6.0).sqrt();
        let (b00, b11, b22) = ((a00 - q) / p, (a11 - q) / p, (a22 - q) / p);
        let (b01, b02, b12) = (a01 / p, a02 / p, a12 / p);
        let det = b00 * (b11 * b22 - b12 * b12) - b01 * (b01 * b22 - b12 * b02)
            + b02 * (b01 * b12 - b11 * b02);
        let r = (det / 2.0).clamp(-1.0, 1.0);
        let phi = r.acos() / 3.0;
        q + 2.0 * p * phi.cos()
    };
    eig.max(0.0).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_scale_factor() {
        let t = Transformer::matrix(Mat4::from_scale(Vec3::splat(2.0))).unwrap();
        match t {
            Transformer::Matrix { factor, .. } => assert!((factor - 2.0).abs() < 1e-4),
            _ => panic!("expected matrix transformer"),
        }
    }

    #[test]
    fn test_anisotropic_factor_uses_smallest_scale() {
        let m = Mat4::from_rotation_y(0.7) * Mat4::from_scale(Vec3::new(3.0, 0.5, 1.0));
        let t = Transformer::matrix(m).unwrap();
        match t {
            Transformer::Matrix { factor, .. } => assert!((factor - 0.5).abs() < 1e-3),
            _ => panic!("expected matrix transformer"),
        }
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let m = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(Transformer::matrix(m), Err(SdfError::DegenerateTransform));
    }

    #[test]
    fn test_reflection_folds_negative_side() {
        let t = Transformer::reflection(Vec3::X, 0.0);
        let (q, f) = t.apply(Vec3::new(-2.0, 1.0, 0.0));
        assert!((q - Vec3::new(2.0, 1.0, 0.0)).length() < 1e-6);
        assert_eq!(f, 1.0);

        let (q, _) = t.apply(Vec3::new(3.0, 1.0, 0.0));
        assert_eq!(q, Vec3::new(3.0, 1.0, 0.0));
    }

    #[test]
    fn test_repetition_wraps_into_cell() {
        let q = repeat_point(Vec3::new(4.6, 7.0, -3.0), Vec3::new(2.0, 0.0, 2.0));
        assert!((q.x - 0.6).abs() < 1e-5);
        assert_eq!(q.y, 7.0);
        assert!((q.z - 1.0).abs() < 1e-5 || (q.z + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_recursive_limit() {
        let inner = Transformer::reflection(Vec3::X, 0.0);
        assert!(Transformer::recursive(inner.clone(), 8).is_ok());
        assert!(matches!(
            Transformer::recursive(inner, MAX_FOLD_ITERATIONS + 1),
            Err(SdfError::TooManyIterations { .. })
        ));
    }

    #[test]
    fn test_nested_factors_multiply_in_step_order() {
        let a = Transformer::matrix(Mat4::from_scale(Vec3::splat(1.3))).unwrap();
        let b = Transformer::matrix(Mat4::from_rotation_z(0.4) * Mat4::from_scale(Vec3::splat(0.7))).unwrap();
        let (fa, fb) = match (&a, &b) {
            (Transformer::Matrix { factor: fa, .. }, Transformer::Matrix { factor: fb, .. }) => (*fa, *fb),
            _ => unreachable!(),
        };
        let t = Transformer::recursive(Transformer::Sequence(vec![a, b]), 3).unwrap();
        let (_, f) = t.apply(Vec3::new(0.3, -0.2, 0.9));
        let expected = [fa, fb, fa, fb, fa, fb].iter().fold(1.0f32, |acc, f| acc * f);
        assert_eq!(f.to_bits(), expected.to_bits());
    }

    #[test]
    fn test_sequence_bounds_follow_inverse_order() {
        let seq = Transformer::Sequence(vec![
            Transformer::matrix(Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0))).unwrap(),
            Transformer::matrix(Mat4::from_scale(Vec3::splat(2.0))).unwrap(),
        ]);
        // Child at origin: world point p maps to (p - 5) / 2.
        let b = seq.bounds(Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)));
        assert!((b.min.x - 3.0).abs() < 1e-4);
        assert!((b.max.x - 7.0).abs() < 1e-4);
    }

    #[test]
    fn test_reflection_bounds_include_mirror() {
        let t = Transformer::reflection(Vec3::X, 0.0);
        let b = t.bounds(Aabb::new(Vec3::new(2.0, -1.0, -1.0), Vec3::new(4.0, 1.0, 1.0)));
        assert!((b.min.x + 4.0).abs() < 1e-4);
        assert!((b.max.x - 4.0).abs() < 1e-4);
    }
}
