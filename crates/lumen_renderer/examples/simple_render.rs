//! Renders a small demo scene to PNG.
//!
//! Usage: `simple_render [config.json]`. The optional JSON file overrides
//! any field of [`DemoConfig`]; missing fields keep their defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use lumen_core::{AreaShape, Geometry, Light, Material, MaterialColor, PhongParams, SdfNode, Transformer};
use lumen_math::{Mat4, Vec3};
use lumen_renderer::{
    Accumulator, Camera, CameraSettings, ImageBuffer, IndexParams, ObjectId, RenderConfig, World,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DemoConfig {
    width: u32,
    height: u32,
    /// Frames averaged by the accumulator.
    frames: u32,
    output: PathBuf,
    camera: CameraSettings,
    render: RenderConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            frames: 1,
            output: PathBuf::from("output.png"),
            camera: CameraSettings {
                look_from: Vec3::new(0.0, 2.5, 9.0),
                look_at: Vec3::new(0.0, 0.8, 0.0),
                vup: Vec3::Y,
                vfov: 35.0,
                defocus_angle: 0.0,
                focus_dist: 9.0,
            },
            render: RenderConfig::default(),
        }
    }
}

fn load_config() -> Result<DemoConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {path}"))
        }
        None => Ok(DemoConfig::default()),
    }
}

fn build_scene(world: &mut World) -> Result<ObjectId> {
    let floor = world.add_primitive(
        Geometry::plane(Vec3::Y, 0.0),
        Material::phong(
            PhongParams::new(MaterialColor::checkerboard(
                Vec3::splat(0.8).into(),
                Vec3::splat(0.2).into(),
                0.5,
            ))
            .with_reflectivity(0.1),
        ),
        Mat4::IDENTITY,
    )?;

    // A row of shared unit spheres, instanced behind one BVH
    let matte = Arc::new(Material::phong(PhongParams::new(Vec3::new(0.8, 0.3, 0.2))));
    let ball = world.add_primitive(Geometry::Sphere, matte, Mat4::from_scale(Vec3::splat(0.4)))?;
    let mut row = Vec::new();
    for i in 0..9 {
        let x = -4.0 + i as f32;
        row.push(world.add_transformed(ball, Mat4::from_translation(Vec3::new(x, 0.4, -2.0)))?);
    }
    let balls = world.add_bvh_aggregate(row, Mat4::IDENTITY, IndexParams::default())?;

    let glass = world.add_primitive(
        Geometry::Sphere,
        Material::fresnel(PhongParams::new(Vec3::ZERO).with_ambient(0.0), 1.5),
        Mat4::from_translation(Vec3::new(-1.5, 1.0, 1.0)),
    )?;

    let blob = SdfNode::difference(
        SdfNode::cube(Vec3::splat(0.7)).round(0.1),
        SdfNode::sphere(0.9),
    )
    .transformed(Transformer::matrix(Mat4::from_rotation_y(0.6))?);
    let sdf = world.add_primitive(
        Geometry::sdf(blob),
        Material::phong(PhongParams::new(Vec3::new(0.2, 0.5, 0.9)).with_specular(0.6, 64.0)),
        Mat4::from_translation(Vec3::new(1.6, 0.8, 0.5)),
    )?;

    world.add_light(Light::point(Vec3::new(-4.0, 6.0, 4.0), Vec3::splat(0.7)));
    world.add_light(Light::area(
        AreaShape::Square,
        Mat4::from_translation(Vec3::new(2.0, 5.0, 2.0)) * Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2),
        Vec3::splat(0.5),
        4,
    ));

    let root = world.add_aggregate(vec![floor, balls, glass, sdf], Mat4::IDENTITY)?;
    world.set_root(root)?;
    Ok(root)
}

fn main() -> Result<()> {
    env_logger::init();
    let config = load_config()?;

    let start = Instant::now();
    let mut world = World::new();
    build_scene(&mut world)?;
    log::info!("Scene built in {:?} ({} objects)", start.elapsed(), world.object_count());

    let camera = Camera::new()
        .with_resolution(config.width, config.height)
        .with_settings(config.camera);

    let start = Instant::now();
    let mut accumulator = Accumulator::new(camera.image_width, camera.image_height);
    for _ in 0..config.frames.max(1) {
        accumulator.render_frame(&camera, &world, &config.render);
    }
    log::info!(
        "Rendered {} frame(s) of {}x{} in {:?}",
        accumulator.frames(),
        camera.image_width,
        camera.image_height,
        start.elapsed()
    );

    let mut image = ImageBuffer::new(camera.image_width, camera.image_height);
    accumulator.resolve(&mut image);
    let rgba = image::RgbaImage::from_raw(image.width, image.height, image.to_rgba())
        .context("image buffer size mismatch")?;
    rgba.save(&config.output)
        .with_context(|| format!("writing {}", config.output.display()))?;
    log::info!("Saved to {}", config.output.display());
    Ok(())
}
