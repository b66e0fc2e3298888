//! Image textures for material colors.
//!
//! Pixels are stored as linear RGBA floats. Lookups support nearest and
//! bilinear filtering with wrapping UVs.

use std::path::Path;

use lumen_math::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during texture loading.
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("Failed to load texture: {0}")]
    LoadError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("texture {width}x{height} needs {expected} pixels, got {actual}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

pub type TextureResult<T> = Result<T, TextureError>;

/// Texture lookup filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextureFilter {
    Nearest,
    #[default]
    Bilinear,
}

/// A loaded texture with pixel data.
#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    /// Texture width in pixels
    pub width: u32,

    /// Texture height in pixels
    pub height: u32,

    /// Pixel data in RGBA format (linear, 0-1 range)
    /// Stored as [R, G, B, A] per pixel, row-major order, top row first
    pub pixels: Vec<[f32; 4]>,

    /// Original file path (for debugging)
    pub path: String,
}

impl Texture {
    /// Create a new texture from pixel data.
    pub fn new(
        width: u32,
        height: u32,
        pixels: Vec<[f32; 4]>,
        path: impl Into<String>,
    ) -> TextureResult<Self> {
        let expected = width as usize * height as usize;
        if expected == 0 || pixels.len() != expected {
            return Err(TextureError::SizeMismatch {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
            path: path.into(),
        })
    }

    /// Create a solid color texture (1x1).
    pub fn solid_color(color: Vec3) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: vec![[color.x, color.y, color.z, 1.0]],
            path: "<solid>".to_string(),
        }
    }

    /// Load a texture from an image file, converting sRGB to linear.
    pub fn load(path: impl AsRef<Path>) -> TextureResult<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| {
            TextureError::LoadError(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        let pixels: Vec<[f32; 4]> = rgba
            .pixels()
            .map(|p| {
                [
                    srgb_to_linear(p[0]),
                    srgb_to_linear(p[1]),
                    srgb_to_linear(p[2]),
                    p[3] as f32 / 255.0, // Alpha is linear
                ]
            })
            .collect();

        let texture = Texture::new(width, height, pixels, path.to_string_lossy().to_string())?;
        log::debug!(
            "Loaded texture: {} ({}x{}, {:.1} KB)",
            texture.path,
            width,
            height,
            texture.size_bytes() as f32 / 1024.0
        );
        Ok(texture)
    }

    /// Sample the texture at UV coordinates. (0, 0) is bottom-left.
    pub fn sample(&self, uv: Vec2, filter: TextureFilter) -> Vec3 {
        sample_texels(&self.pixels, self.width, self.height, uv, filter)
    }

    /// Get total size in bytes (approximate).
    pub fn size_bytes(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<[f32; 4]>()
    }
}

/// Filtered lookup into a row-major texel slice.
///
/// Shared by [`Texture::sample`] and flattened texture buffers.
pub fn sample_texels(
    texels: &[[f32; 4]],
    width: u32,
    height: u32,
    uv: Vec2,
    filter: TextureFilter,
) -> Vec3 {
    if width == 0 || height == 0 {
        return Vec3::ZERO;
    }
    // Wrap UV coordinates
    let u = uv.x.rem_euclid(1.0);
    let v = uv.y.rem_euclid(1.0);

    match filter {
        TextureFilter::Nearest => {
            let x = ((u * width as f32) as u32).min(width - 1);
            let y = (((1.0 - v) * height as f32) as u32).min(height - 1);
            texel(texels, width, x, y)
        }
        TextureFilter::Bilinear => {
            let x = u * (width as f32 - 1.0);
            let y = (1.0 - v) * (height as f32 - 1.0); // Flip V for image coordinates

            let x0 = (x.floor() as u32).min(width - 1);
            let y0 = (y.floor() as u32).min(height - 1);
            let x1 = (x0 + 1).min(width - 1);
            let y1 = (y0 + 1).min(height - 1);
            let fx = x.fract();
            let fy = y.fract();

            let top = texel(texels, width, x0, y0).lerp(texel(texels, width, x1, y0), fx);
            let bottom = texel(texels, width, x0, y1).lerp(texel(texels, width, x1, y1), fx);
            top.lerp(bottom, fy)
        }
    }
}

fn texel(texels: &[[f32; 4]], width: u32, x: u32, y: u32) -> Vec3 {
    let idx = (y * width + x) as usize;
    texels
        .get(idx)
        .map(|p| Vec3::new(p[0], p[1], p[2]))
        .unwrap_or(Vec3::ZERO)
}

/// Convert sRGB byte value to linear float.
fn srgb_to_linear(value: u8) -> f32 {
    let v = value as f32 / 255.0;
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}
