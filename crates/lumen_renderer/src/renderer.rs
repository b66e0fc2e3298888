//! Pixel loop and progressive accumulation.
//!
//! Rows are rendered in parallel with rayon. Each row draws from its own
//! `StdRng` seeded from the frame seed and the row index, so a render is
//! reproducible regardless of thread scheduling.

use lumen_math::Vec3;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::shading::{trace, Color, ShadingConfig};
use crate::world::World;

/// Render configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Samples per pixel for anti-aliasing
    pub samples_per_pixel: u32,
    /// Maximum ray bounce depth
    pub max_depth: u32,
    /// Base seed; frame `n` of a progressive render should use `seed + n`.
    pub seed: u64,
    pub shading: ShadingConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            samples_per_pixel: 16,
            max_depth: 8,
            seed: 0,
            shading: ShadingConfig::default(),
        }
    }
}

impl RenderConfig {
    pub fn with_samples(mut self, samples_per_pixel: u32) -> Self {
        self.samples_per_pixel = samples_per_pixel.max(1);
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_shading(mut self, shading: ShadingConfig) -> Self {
        self.shading = shading;
        self
    }
}

/// Receives finished pixels.
pub trait PixelSink {
    fn set_color(&mut self, x: u32, y: u32, radiance: Color);
}

/// Apply gamma correction (gamma = 2.0).
#[inline]
pub fn linear_to_gamma(linear: f32) -> f32 {
    if linear > 0.0 {
        linear.sqrt()
    } else {
        0.0
    }
}

/// Convert a color to 8-bit RGBA.
pub fn color_to_rgba(color: Color) -> [u8; 4] {
    let r = (255.0 * linear_to_gamma(color.x).clamp(0.0, 1.0)) as u8;
    let g = (255.0 * linear_to_gamma(color.y).clamp(0.0, 1.0)) as u8;
    let b = (255.0 * linear_to_gamma(color.z).clamp(0.0, 1.0)) as u8;
    [r, g, b, 255]
}

/// Linear radiance per pixel, row major.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Color>,
}

impl ImageBuffer {
    /// Create a new image buffer filled with black.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Color::ZERO; (width * height) as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Color {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Gamma-corrected RGBA8 bytes.
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.pixels.len() * 4);
        for color in &self.pixels {
            bytes.extend_from_slice(&color_to_rgba(*color));
        }
        bytes
    }
}

impl PixelSink for ImageBuffer {
    fn set_color(&mut self, x: u32, y: u32, radiance: Color) {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = radiance;
        }
    }
}

/// Average of `samples_per_pixel` traced samples through pixel `(x, y)`.
pub fn render_pixel(
    camera: &Camera,
    world: &World,
    x: u32,
    y: u32,
    config: &RenderConfig,
    rng: &mut dyn RngCore,
) -> Color {
    let samples = config.samples_per_pixel.max(1);
    let mut pixel_color = Color::ZERO;
    for _ in 0..samples {
        let ray = camera.get_ray(x, y, rng);
        pixel_color += trace(world, &ray, config.max_depth, &config.shading, rng);
    }
    pixel_color / samples as f32
}

/// Seed for one row of one frame.
#[inline]
pub fn row_seed(seed: u64, row: u32) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(row as u64)
}

/// Render every pixel of `camera` into `sink`.
pub fn render(camera: &Camera, world: &World, config: &RenderConfig, sink: &mut dyn PixelSink) {
    let rows: Vec<Vec<Color>> = (0..camera.image_height)
        .into_par_iter()
        .map(|y| {
            let mut rng = StdRng::seed_from_u64(row_seed(config.seed, y));
            (0..camera.image_width)
                .map(|x| render_pixel(camera, world, x, y, config, &mut rng))
                .collect()
        })
        .collect();

    for (y, row) in rows.into_iter().enumerate() {
        for (x, color) in row.into_iter().enumerate() {
            sink.set_color(x as u32, y as u32, color);
        }
    }
    log::debug!(
        "Rendered {}x{} at {} spp",
        camera.image_width,
        camera.image_height,
        config.samples_per_pixel
    );
}

/// Running average of frames for progressive rendering.
///
/// Frames rendered against an older [`World::generation`] are discarded:
/// the first frame after an edit restarts the average.
#[derive(Debug, Clone)]
pub struct Accumulator {
    width: u32,
    height: u32,
    sum: Vec<Color>,
    frames: u32,
    generation: Option<u64>,
}

impl Accumulator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sum: vec![Color::ZERO; (width * height) as usize],
            frames: 0,
            generation: None,
        }
    }

    /// Number of frames in the current average.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn reset(&mut self) {
        self.sum.fill(Vec3::ZERO);
        self.frames = 0;
    }

    /// Add a frame rendered from `world` in its current state.
    pub fn add_frame(&mut self, world: &World, frame: &ImageBuffer) {
        if self.generation != Some(world.generation()) {
            if self.frames > 0 {
                log::debug!("Scene changed, restarting accumulation");
            }
            self.reset();
            self.generation = Some(world.generation());
        }
        if frame.width != self.width || frame.height != self.height {
            log::warn!(
                "Frame {}x{} does not match accumulator {}x{}; skipped",
                frame.width,
                frame.height,
                self.width,
                self.height
            );
            return;
        }
        for (acc, px) in self.sum.iter_mut().zip(&frame.pixels) {
            *acc += *px;
        }
        self.frames += 1;
    }

    /// Render one more frame of `world` and fold it in.
    pub fn render_frame(&mut self, camera: &Camera, world: &World, config: &RenderConfig) {
        let frame_config = config.with_seed(config.seed.wrapping_add(self.frames as u64));
        let mut frame = ImageBuffer::new(self.width, self.height);
        render(camera, world, &frame_config, &mut frame);
        self.add_frame(world, &frame);
    }

    /// Write the current average to `sink`.
    pub fn resolve(&self, sink: &mut dyn PixelSink) {
        let scale = if self.frames > 0 {
            1.0 / self.frames as f32
        } else {
            0.0
        };
        for y in 0..self.height {
            for x in 0..self.width {
                sink.set_color(x, y, self.sum[(y * self.width + x) as usize] * scale);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::{Geometry, Material};
    use lumen_math::Mat4;

    fn red_sphere_world() -> World {
        let mut world = World::new();
        let sphere = world
            .add_primitive(
                Geometry::Sphere,
                Material::solid(Vec3::new(1.0, 0.0, 0.0)),
                Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)),
            )
            .unwrap();
        world.set_root(sphere).unwrap();
        world
    }

    #[test]
    fn test_linear_to_gamma() {
        assert_eq!(linear_to_gamma(0.0), 0.0);
        assert!((linear_to_gamma(1.0) - 1.0).abs() < 0.0001);
        assert!((linear_to_gamma(0.25) - 0.5).abs() < 0.0001);
    }

    #[test]
    fn test_color_to_rgba_clamps() {
        assert_eq!(color_to_rgba(Vec3::new(4.0, -1.0, 1.0)), [255, 0, 255, 255]);
    }

    #[test]
    fn test_render_hits_center() {
        let world = red_sphere_world();
        let camera = Camera::new().with_resolution(9, 9);
        let config = RenderConfig::default().with_samples(2);
        let mut image = ImageBuffer::new(9, 9);
        render(&camera, &world, &config, &mut image);

        assert_eq!(image.get(4, 4), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(image.get(0, 0), Vec3::ZERO);
    }

    #[test]
    fn test_render_is_deterministic() {
        let world = red_sphere_world();
        let camera = Camera::new().with_resolution(12, 8);
        let config = RenderConfig::default().with_samples(3).with_seed(5);
        let mut a = ImageBuffer::new(12, 8);
        let mut b = ImageBuffer::new(12, 8);
        render(&camera, &world, &config, &mut a);
        render(&camera, &world, &config, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_accumulator_resets_on_edit() {
        let mut world = red_sphere_world();
        let mut acc = Accumulator::new(2, 1);
        let mut frame = ImageBuffer::new(2, 1);
        frame.set_color(0, 0, Vec3::ONE);

        acc.add_frame(&world, &frame);
        acc.add_frame(&world, &ImageBuffer::new(2, 1));
        assert_eq!(acc.frames(), 2);
        let mut out = ImageBuffer::new(2, 1);
        acc.resolve(&mut out);
        assert_eq!(out.get(0, 0), Vec3::splat(0.5));

        let root = world.root().unwrap();
        world.set_transform(root, Mat4::IDENTITY).unwrap();
        acc.add_frame(&world, &frame);
        assert_eq!(acc.frames(), 1);
        acc.resolve(&mut out);
        assert_eq!(out.get(0, 0), Vec3::ONE);
    }
}
