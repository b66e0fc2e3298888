//! Light sources and per-query light sampling.

use std::f32::consts::PI;

use lumen_math::{Mat4, Vec3};
use rand::RngCore;

use crate::sampling::gen_f32;

/// Emitter shape of an area light, in the light's local unit frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaShape {
    Square,
    Circle,
    Sphere,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Light {
    /// Point light with constant radiance (no distance falloff).
    SimplePoint { position: Vec3, color: Vec3 },
    /// Soft light sampled over an emitter surface. Each query draws
    /// `samples` points and splits `color` evenly between them.
    RandomSampleArea {
        shape: AreaShape,
        transform: Mat4,
        color: Vec3,
        samples: u32,
    },
}

/// One light sample as seen from a shading point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSample {
    /// From the shading point to the sample point, not normalized. A shadow
    /// ray along it over `(epsilon, 1)` covers exactly the gap to the light.
    pub direction: Vec3,
    pub radiance: Vec3,
}

impl Light {
    pub fn point(position: Vec3, color: Vec3) -> Self {
        Light::SimplePoint { position, color }
    }

    pub fn area(shape: AreaShape, transform: Mat4, color: Vec3, samples: u32) -> Self {
        Light::RandomSampleArea {
            shape,
            transform,
            color,
            samples: samples.max(1),
        }
    }

    /// Number of samples one query produces.
    pub fn sample_count(&self) -> u32 {
        match self {
            Light::SimplePoint { .. } => 1,
            Light::RandomSampleArea { samples, .. } => (*samples).max(1),
        }
    }

    /// Append this light's samples for shading point `point` to `out`.
    pub fn sample_into(&self, point: Vec3, rng: &mut dyn RngCore, out: &mut Vec<LightSample>) {
        match self {
            Light::SimplePoint { position, color } => out.push(LightSample {
                direction: *position - point,
                radiance: *color,
            }),
            Light::RandomSampleArea {
                shape,
                transform,
                color,
                ..
            } => {
                let count = self.sample_count();
                let radiance = *color / count as f32;
                for _ in 0..count {
                    let u1 = gen_f32(rng);
                    let u2 = gen_f32(rng);
                    let local = sample_area_point(*shape, u1, u2);
                    out.push(LightSample {
                        direction: transform.transform_point3(local) - point,
                        radiance,
                    });
                }
            }
        }
    }
}

/// Map two uniform numbers to a point on the unit emitter shape.
pub fn sample_area_point(shape: AreaShape, u1: f32, u2: f32) -> Vec3 {
    match shape {
        AreaShape::Square => Vec3::new(2.0 * u1 - 1.0, 2.0 * u2 - 1.0, 0.0),
        AreaShape::Circle => {
            let r = u1.sqrt();
            let phi = 2.0 * PI * u2;
            Vec3::new(r * phi.cos(), r * phi.sin(), 0.0)
        }
        AreaShape::Sphere => {
            let z = 1.0 - 2.0 * u1;
            let r = (1.0 - z * z).max(0.0).sqrt();
            let phi = 2.0 * PI * u2;
            Vec3::new(r * phi.cos(), r * phi.sin(), z)
        }
    }
}
