//! Flattened scenes must answer queries and shade exactly like the world
//! they came from.

use std::sync::Arc;

use lumen_core::{
    AreaShape, Geometry, Light, Material, MaterialColor, PhongParams, SdfNode, Texture, TextureFilter,
    Transformer,
};
use lumen_device::{flatten, DeviceLimits, DeviceScene, Interpreter};
use lumen_math::{Mat4, Ray, Vec3};
use lumen_renderer::{
    render, shading, Camera, ImageBuffer, IndexKind, IndexParams, RenderConfig, ShadingConfig, ShadingMode, World,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn phong(color: Vec3, reflectivity: f32) -> Arc<Material> {
    Arc::new(Material::phong(
        PhongParams::new(color)
            .with_specular(0.4, 24.0)
            .with_reflectivity(reflectivity),
    ))
}

fn flattened(world: &World) -> DeviceScene {
    flatten(world, &DeviceLimits::default()).unwrap()
}

/// Rays from `origin` through a grid on the plane `z = target_z`.
fn ray_fan(origin: Vec3, half_extent: f32, target_z: f32, n: u32) -> Vec<Ray> {
    let mut rays = Vec::new();
    for i in 0..n {
        for j in 0..n {
            let x = -half_extent + 2.0 * half_extent * (i as f32 + 0.5) / n as f32;
            let y = -half_extent + 2.0 * half_extent * (j as f32 + 0.5) / n as f32;
            rays.push(Ray::new(origin, Vec3::new(x, y, target_z) - origin));
        }
    }
    rays
}

fn assert_same_hits(world: &World, rays: &[Ray], distance_tolerance: f32) -> usize {
    let scene = flattened(world);
    let interpreter = Interpreter::new(&scene).unwrap();
    let mut hits = 0;
    for ray in rays {
        let cpu = world.cast_ray(ray, 1e-3, f32::INFINITY);
        let device = interpreter.cast_ray(ray, 1e-3, f32::INFINITY);
        match (cpu, device) {
            (None, None) => {}
            (Some(a), Some(b)) => {
                hits += 1;
                assert_eq!(Some(a.object), scene.source(b.object), "ray {ray:?}");
                assert_eq!(a.chain, interpreter.source_chain(&b), "ray {ray:?}");
                assert!(
                    (a.distance - b.distance).abs() <= distance_tolerance * a.distance.max(1.0),
                    "ray {ray:?}: cpu {} device {}",
                    a.distance,
                    b.distance
                );

                let surface = world.surface(ray, &a).unwrap();
                let device_surface = interpreter.surface(ray, &b);
                assert_eq!(surface.front_face, device_surface.front_face);
                assert!((surface.normal - device_surface.normal).length() < 1e-3);
            }
            (a, b) => panic!("ray {ray:?}: cpu {a:?}, device {b:?}"),
        }
    }
    hits
}

fn assert_same_image(world: &World, camera: &Camera, config: &RenderConfig, tolerance: f32) {
    let scene = flattened(world);
    let interpreter = Interpreter::new(&scene).unwrap();

    let mut cpu = ImageBuffer::new(camera.image_width, camera.image_height);
    render(camera, world, config, &mut cpu);
    let mut device = ImageBuffer::new(camera.image_width, camera.image_height);
    interpreter.render(camera, config, &mut device).unwrap();

    let mut lit = 0;
    for (i, (a, b)) in cpu.pixels.iter().zip(&device.pixels).enumerate() {
        let scale = a.max_element().max(1.0);
        assert!(
            (*a - *b).abs().max_element() <= tolerance * scale,
            "pixel {i}: cpu {a}, device {b}"
        );
        if a.max_element() > 0.0 {
            lit += 1;
        }
    }
    assert!(lit > 0, "image is black");
}

fn camera(width: u32, height: u32) -> Camera {
    Camera::new()
        .with_resolution(width, height)
        .with_position(Vec3::new(0.0, 1.5, 9.0), Vec3::new(0.0, 0.0, 0.0), Vec3::Y)
        .with_lens(40.0, 0.0, 9.0)
}

/// Ground plane, a grid of reflective spheres behind an index of `kind`,
/// one point light and one area light.
fn sphere_field(kind: IndexKind) -> World {
    let mut world = World::new();
    let sphere = Arc::new(Geometry::Sphere);
    let mut rng = StdRng::seed_from_u64(7);

    let mut spheres = Vec::new();
    for i in 0..5 {
        for j in 0..5 {
            let center = Vec3::new(i as f32 * 1.6 - 3.2, 0.0, j as f32 * -1.6 + 1.0);
            let color = Vec3::new(rng.gen_range(0.2..1.0), rng.gen_range(0.2..1.0), rng.gen_range(0.2..1.0));
            let transform = Mat4::from_translation(center) * Mat4::from_scale(Vec3::splat(0.6));
            spheres.push(
                world
                    .add_primitive(sphere.clone(), phong(color, 0.3), transform)
                    .unwrap(),
            );
        }
    }
    let field = world
        .add_bvh_aggregate(
            spheres,
            Mat4::IDENTITY,
            IndexParams::default().with_kind(kind).with_min_leaf_size(2),
        )
        .unwrap();
    let ground = world
        .add_primitive(Geometry::plane(Vec3::Y, -0.6), phong(Vec3::splat(0.7), 0.0), Mat4::IDENTITY)
        .unwrap();
    let root = world.add_aggregate(vec![ground, field], Mat4::IDENTITY).unwrap();
    world.set_root(root).unwrap();

    world.add_light(Light::point(Vec3::new(4.0, 6.0, 5.0), Vec3::splat(0.8)));
    world.add_light(Light::area(
        AreaShape::Square,
        Mat4::from_translation(Vec3::new(-2.0, 5.0, 0.0)) * Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2),
        Vec3::splat(0.6),
        4,
    ));
    world
}

#[test]
fn test_bvh_field_hits_match() {
    init_logging();
    let world = sphere_field(IndexKind::Bvh);
    let hits = assert_same_hits(&world, &ray_fan(Vec3::new(0.0, 1.5, 9.0), 5.0, -4.0, 40), 1e-5);
    assert!(hits > 100);
}

#[test]
fn test_bsp_field_hits_match() {
    let world = sphere_field(IndexKind::Bsp);
    let hits = assert_same_hits(&world, &ray_fan(Vec3::new(0.0, 1.5, 9.0), 5.0, -4.0, 40), 1e-5);
    assert!(hits > 100);
}

#[test]
fn test_whitted_field_image_matches() {
    let world = sphere_field(IndexKind::Bvh);
    let config = RenderConfig::default()
        .with_samples(2)
        .with_max_depth(4)
        .with_seed(3)
        .with_shading(ShadingConfig::default().with_background(Vec3::new(0.2, 0.3, 0.5)));
    assert_same_image(&world, &camera(16, 12), &config, 1e-4);
}

#[test]
fn test_instances_keep_their_chains() {
    let mut world = World::new();
    let material = phong(Vec3::new(0.9, 0.4, 0.2), 0.0);
    let shared = world.add_primitive(Geometry::Box, material, Mat4::IDENTITY).unwrap();
    let mut instances = Vec::new();
    for k in 0..4 {
        let transform = Mat4::from_translation(Vec3::new(k as f32 * 2.5 - 3.75, 0.0, 0.0))
            * Mat4::from_rotation_y(0.3 * k as f32)
            * Mat4::from_scale(Vec3::splat(0.8));
        instances.push(world.add_transformed(shared, transform).unwrap());
    }
    let root = world
        .add_bvh_aggregate(instances, Mat4::from_rotation_x(0.2), IndexParams::default())
        .unwrap();
    world.set_root(root).unwrap();
    world.add_light(Light::point(Vec3::new(0.0, 5.0, 5.0), Vec3::ONE));

    let scene = flattened(&world);
    assert_eq!(scene.geometries.len(), 1);

    let hits = assert_same_hits(&world, &ray_fan(Vec3::new(0.0, 0.0, 8.0), 5.0, 0.0, 32), 1e-5);
    assert!(hits > 50);
    assert_same_image(&world, &camera(12, 8), &RenderConfig::default().with_samples(1), 1e-4);
}

/// A glass sphere in front of a checkered wall.
fn glass_scene() -> World {
    let mut world = World::new();
    let glass = Arc::new(Material::fresnel(
        PhongParams::new(Vec3::splat(0.05)).with_specular(0.8, 64.0),
        1.5,
    ));
    let ball = world
        .add_primitive(Geometry::Sphere, glass, Mat4::from_scale(Vec3::splat(1.4)))
        .unwrap();

    let checker = MaterialColor::checkerboard(
        Vec3::new(0.9, 0.9, 0.9).into(),
        MaterialColor::from(Vec3::new(0.8, 0.1, 0.1)).scaled(0.5),
        4.0,
    );
    let wall = world
        .add_primitive(
            Geometry::Square,
            Arc::new(Material::phong(PhongParams::new(checker))),
            Mat4::from_translation(Vec3::new(0.0, 0.0, -4.0)) * Mat4::from_scale(Vec3::new(6.0, 6.0, 1.0)),
        )
        .unwrap();
    let tint = world
        .add_primitive(
            Geometry::Circle,
            Arc::new(Material::transparent(Vec3::new(0.6, 0.9, 0.6))),
            Mat4::from_translation(Vec3::new(2.5, 1.0, 2.0)),
        )
        .unwrap();
    let root = world.add_aggregate(vec![ball, wall, tint], Mat4::IDENTITY).unwrap();
    world.set_root(root).unwrap();
    world.add_light(Light::point(Vec3::new(3.0, 4.0, 6.0), Vec3::ONE));
    world
}

#[test]
fn test_whitted_glass_matches() {
    let world = glass_scene();
    let config = RenderConfig::default().with_samples(1).with_max_depth(6);
    assert_same_image(&world, &camera(16, 12), &config, 1e-4);
}

#[test]
fn test_stochastic_glass_matches() {
    let world = glass_scene();
    let config = RenderConfig::default()
        .with_samples(4)
        .with_max_depth(6)
        .with_seed(11)
        .with_shading(ShadingConfig::default().with_mode(ShadingMode::Stochastic));
    assert_same_image(&world, &camera(12, 8), &config, 1e-4);
}

#[test]
fn test_path_traced_room_matches() {
    let mut world = World::new();
    let matte = |color: Vec3| {
        Arc::new(Material::path_traced(
            PhongParams::new(color).with_diffuse(0.8).with_specular(0.2, 16.0),
            Vec3::ZERO,
        ))
    };
    let lamp = Arc::new(Material::path_traced(PhongParams::new(Vec3::ONE), Vec3::splat(4.0)));

    let floor = world
        .add_primitive(Geometry::plane(Vec3::Y, -1.0), matte(Vec3::splat(0.8)), Mat4::IDENTITY)
        .unwrap();
    let block = world
        .add_primitive(
            Geometry::Box,
            matte(Vec3::new(0.2, 0.5, 0.8)),
            Mat4::from_translation(Vec3::new(-1.0, 0.0, 0.0)) * Mat4::from_rotation_y(0.5),
        )
        .unwrap();
    let tube = world
        .add_primitive(
            Geometry::Cylinder,
            matte(Vec3::new(0.8, 0.6, 0.2)),
            Mat4::from_translation(Vec3::new(1.5, 0.0, 0.5)) * Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2),
        )
        .unwrap();
    let panel = world
        .add_primitive(
            Geometry::triangle(Vec3::new(-3.0, 3.0, -2.0), Vec3::new(3.0, 3.0, -2.0), Vec3::new(0.0, 3.0, 2.0)),
            lamp,
            Mat4::IDENTITY,
        )
        .unwrap();
    let root = world
        .add_aggregate(vec![floor, block, tube, panel], Mat4::IDENTITY)
        .unwrap();
    world.set_root(root).unwrap();
    world.add_light(Light::area(
        AreaShape::Circle,
        Mat4::from_translation(Vec3::new(0.0, 4.0, 3.0)),
        Vec3::splat(0.5),
        2,
    ));

    let config = RenderConfig::default()
        .with_samples(4)
        .with_max_depth(5)
        .with_seed(42)
        .with_shading(ShadingConfig::default().with_mode(ShadingMode::Stochastic));
    assert_same_image(&world, &camera(12, 8), &config, 1e-4);
}

#[test]
fn test_textured_squares_match() {
    let pixels: Vec<[f32; 4]> = (0..16)
        .map(|i| {
            let v = i as f32 / 15.0;
            [v, 1.0 - v, 0.5 * v, 1.0]
        })
        .collect();
    let texture = Arc::new(Texture::new(4, 4, pixels, "ramp").unwrap());

    let mut world = World::new();
    let mut squares = Vec::new();
    for (k, filter) in [TextureFilter::Nearest, TextureFilter::Bilinear].into_iter().enumerate() {
        let color = MaterialColor::texture(texture.clone(), filter).scaled(0.9);
        let material = Arc::new(Material::solid(color));
        let transform = Mat4::from_translation(Vec3::new(k as f32 * 2.2 - 1.1, 0.0, 0.0));
        squares.push(world.add_primitive(Geometry::Square, material, transform).unwrap());
    }
    let root = world.add_aggregate(squares, Mat4::IDENTITY).unwrap();
    world.set_root(root).unwrap();

    let scene = flattened(&world);
    assert_eq!(scene.textures.len(), 1);

    let camera = Camera::new()
        .with_resolution(16, 8)
        .with_position(Vec3::new(0.0, 0.0, 6.0), Vec3::ZERO, Vec3::Y)
        .with_lens(30.0, 0.0, 6.0);
    assert_same_image(&world, &camera, &RenderConfig::default().with_samples(2), 1e-5);
}

/// Rounded box minus a sphere, mirrored across x, next to a repeated row
/// of small spheres folded three times.
fn sdf_world() -> World {
    let carved = SdfNode::difference(
        SdfNode::cube(Vec3::new(0.8, 0.8, 0.8)).round(0.1),
        SdfNode::sphere(1.0).transformed(Transformer::matrix(Mat4::from_translation(Vec3::new(0.5, 0.5, 0.8))).unwrap()),
    )
    .transformed(Transformer::matrix(Mat4::from_translation(Vec3::new(1.5, 0.0, 0.0))).unwrap())
    .transformed(Transformer::reflection(Vec3::X, 0.0));

    let folded = SdfNode::intersection(vec![
        SdfNode::sphere(0.3).transformed(Transformer::InfiniteRepetition {
            period: Vec3::new(1.0, 0.0, 0.0),
        }),
        SdfNode::cube(Vec3::new(2.4, 1.0, 1.0)),
    ])
    .transformed(Transformer::recursive(Transformer::reflection(Vec3::new(1.0, 0.2, 0.0), 0.1), 3).unwrap());

    let mut world = World::new();
    let material = phong(Vec3::new(0.7, 0.7, 0.9), 0.0);
    let a = world
        .add_primitive(Geometry::sdf(carved), material.clone(), Mat4::IDENTITY)
        .unwrap();
    let b = world
        .add_primitive(Geometry::sdf(folded), material, Mat4::from_translation(Vec3::new(0.0, -2.0, 0.0)))
        .unwrap();
    let root = world.add_aggregate(vec![a, b], Mat4::IDENTITY).unwrap();
    world.set_root(root).unwrap();
    world.add_light(Light::point(Vec3::new(0.0, 5.0, 6.0), Vec3::ONE));
    world
}

#[test]
fn test_sdf_hits_match() {
    init_logging();
    let world = sdf_world();
    let rays = ray_fan(Vec3::new(0.0, -0.5, 8.0), 3.0, 0.0, 24);
    let hits = assert_same_hits(&world, &rays, 1e-3);
    assert!(hits > 20);
}

#[test]
fn test_sdf_shading_matches_on_solid_hits() {
    let world = sdf_world();
    let scene = flattened(&world);
    let interpreter = Interpreter::new(&scene).unwrap();
    let config = ShadingConfig::default();

    // Flat faces of both mirrored boxes, away from edges and the cavity
    for target in [Vec3::new(1.0, -0.5, 0.5), Vec3::new(-1.0, -0.5, 0.5)] {
        let origin = Vec3::new(0.0, 0.0, 8.0);
        let ray = Ray::new(origin, target - origin);
        let mut rng = StdRng::seed_from_u64(5);
        let cpu = shading::trace(&world, &ray, 3, &config, &mut rng);
        let mut rng = StdRng::seed_from_u64(5);
        let device = interpreter.trace(&ray, 3, &config, &mut rng).unwrap();
        assert!(cpu.max_element() > 0.0);
        assert!((cpu - device).abs().max_element() < 1e-3, "target {target}: cpu {cpu}, device {device}");
    }
}

#[test]
fn test_edit_invalidates_flattened_scene() {
    let mut world = sphere_field(IndexKind::Bvh);
    let scene = flattened(&world);
    assert!(scene.is_current(&world));

    let root = world.root().unwrap();
    world.set_transform(root, Mat4::from_translation(Vec3::Y)).unwrap();
    assert!(!scene.is_current(&world));

    let rays = ray_fan(Vec3::new(0.0, 1.5, 9.0), 5.0, -4.0, 16);
    assert_same_hits(&world, &rays, 1e-5);
}
