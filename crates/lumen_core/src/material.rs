//! Surface materials and the color expressions they are built from.

use std::sync::Arc;

use lumen_math::{Vec2, Vec3};

use crate::texture::{Texture, TextureFilter};

/// A color that may vary over the surface's UV coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialColor {
    Solid(Vec3),
    Scaled {
        factor: f32,
        inner: Box<MaterialColor>,
    },
    /// Alternates `even`/`odd` on a grid of `scale` cells per UV unit.
    Checkerboard {
        even: Box<MaterialColor>,
        odd: Box<MaterialColor>,
        scale: f32,
    },
    Texture {
        texture: Arc<Texture>,
        filter: TextureFilter,
    },
}

impl MaterialColor {
    pub fn scaled(self, factor: f32) -> Self {
        MaterialColor::Scaled {
            factor,
            inner: Box::new(self),
        }
    }

    pub fn checkerboard(even: MaterialColor, odd: MaterialColor, scale: f32) -> Self {
        MaterialColor::Checkerboard {
            even: Box::new(even),
            odd: Box::new(odd),
            scale,
        }
    }

    pub fn texture(texture: Arc<Texture>, filter: TextureFilter) -> Self {
        MaterialColor::Texture { texture, filter }
    }

    pub fn evaluate(&self, uv: Vec2) -> Vec3 {
        match self {
            MaterialColor::Solid(c) => *c,
            MaterialColor::Scaled { factor, inner } => inner.evaluate(uv) * *factor,
            MaterialColor::Checkerboard { even, odd, scale } => {
                if checker_is_even(uv, *scale) {
                    even.evaluate(uv)
                } else {
                    odd.evaluate(uv)
                }
            }
            MaterialColor::Texture { texture, filter } => texture.sample(uv, *filter),
        }
    }
}

impl From<Vec3> for MaterialColor {
    fn from(c: Vec3) -> Self {
        MaterialColor::Solid(c)
    }
}

/// Parity of the checker cell containing `uv`.
#[inline]
pub fn checker_is_even(uv: Vec2, scale: f32) -> bool {
    let cell = (uv.x * scale).floor() + (uv.y * scale).floor();
    cell.rem_euclid(2.0) < 1.0
}

/// Scalar coefficients of the Phong model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhongLobe {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: f32,
    /// Weight of the recursive mirror sample.
    pub reflectivity: f32,
}

impl Default for PhongLobe {
    fn default() -> Self {
        Self {
            ambient: 0.1,
            diffuse: 0.9,
            specular: 0.3,
            shininess: 32.0,
            reflectivity: 0.0,
        }
    }
}

/// Phong parameters shared by the lit materials.
#[derive(Debug, Clone, PartialEq)]
pub struct PhongParams {
    pub color: MaterialColor,
    pub lobe: PhongLobe,
}

impl PhongParams {
    pub fn new(color: impl Into<MaterialColor>) -> Self {
        Self {
            color: color.into(),
            lobe: PhongLobe::default(),
        }
    }

    pub fn with_ambient(mut self, ambient: f32) -> Self {
        self.lobe.ambient = ambient;
        self
    }

    pub fn with_diffuse(mut self, diffuse: f32) -> Self {
        self.lobe.diffuse = diffuse;
        self
    }

    pub fn with_specular(mut self, specular: f32, shininess: f32) -> Self {
        self.lobe.specular = specular;
        self.lobe.shininess = shininess;
        self
    }

    pub fn with_reflectivity(mut self, reflectivity: f32) -> Self {
        self.lobe.reflectivity = reflectivity;
        self
    }
}

/// How a surface responds to light.
#[derive(Debug, Clone, PartialEq)]
pub enum Material {
    /// Returns its color with no lighting.
    SolidColor(MaterialColor),
    /// Passes the ray through, tinted.
    Transparent { tint: MaterialColor },
    Phong(PhongParams),
    /// Dielectric with a Phong surface lobe.
    FresnelPhong { phong: PhongParams, ior: f32 },
    /// Phong with emission and a sampled indirect bounce.
    PhongPathTracing { phong: PhongParams, emission: Vec3 },
}

impl Material {
    pub fn solid(color: impl Into<MaterialColor>) -> Self {
        Material::SolidColor(color.into())
    }

    pub fn transparent(tint: impl Into<MaterialColor>) -> Self {
        Material::Transparent { tint: tint.into() }
    }

    pub fn phong(params: PhongParams) -> Self {
        Material::Phong(params)
    }

    pub fn fresnel(params: PhongParams, ior: f32) -> Self {
        Material::FresnelPhong { phong: params, ior }
    }

    pub fn path_traced(params: PhongParams, emission: Vec3) -> Self {
        Material::PhongPathTracing {
            phong: params,
            emission,
        }
    }

    /// The Phong lobe, if the material has one.
    pub fn phong_params(&self) -> Option<&PhongParams> {
        match self {
            Material::Phong(p)
            | Material::FresnelPhong { phong: p, .. }
            | Material::PhongPathTracing { phong: p, .. } => Some(p),
            Material::SolidColor(_) | Material::Transparent { .. } => None,
        }
    }

    pub fn emission(&self) -> Vec3 {
        match self {
            Material::PhongPathTracing { emission, .. } => *emission,
            _ => Vec3::ZERO,
        }
    }
}
