//! Native execution of a flattened scene.
//!
//! Runs the same iterative algorithms a compute kernel would: the object
//! graph is walked with a bounded frame stack and each group's heap is
//! walked without a stack; shading pops rays from a LIFO work list. Light
//! sampling and branch selection go through [`lumen_renderer::scatter`], and
//! branches are pushed in reverse so they are traced in the order the
//! recursive evaluator uses. With the same seeds both draw the same random
//! numbers.

use lumen_core::material::checker_is_even;
use lumen_core::sdf::{estimate_normal, sphere_trace};
use lumen_core::texture::sample_texels;
use lumen_core::{AreaShape, Geometry, Light, PhongLobe, SurfaceData, TextureFilter, TraceSettings};
use lumen_math::{Interval, Mat3, Mat4, Ray, Vec2, Vec3};
use lumen_renderer::{
    row_seed, scatter, Camera, Color, Interaction, ObjectId, PixelSink, RenderConfig, Response, ShadingConfig,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;

use crate::error::{check_limit, DeviceError, DeviceResult};
use crate::flatten::DeviceScene;
use crate::layout::{DeviceLimits, COLOR_STACK_CAPACITY};
use crate::records::*;
use crate::sdf_program::SdfProgram;

/// Nearest hit found by [`Interpreter::cast_ray`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceHit {
    pub distance: f32,
    /// Device index of the primitive.
    pub object: u32,
    /// Device indices from the root down to `object`, inclusive.
    pub path: Vec<u32>,
}

/// World-space shading attributes of a device hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSurface {
    pub point: Vec3,
    /// Unit normal facing against the incoming ray.
    pub normal: Vec3,
    pub uv: Vec2,
    pub front_face: bool,
    /// Material record index.
    pub material: u32,
}

/// Traversal state of one entered group.
#[derive(Debug, Clone, Copy)]
struct Frame {
    object: u32,
    /// The query ray in the group's local frame.
    ray: Ray,
    /// Next unbounded member to test.
    unbounded: u32,
    /// Current heap slot, 1-based; 0 once the walk is done.
    node: u32,
    leaf_next: u32,
    leaf_remaining: u32,
}

#[derive(Debug, Clone, Copy)]
struct WorkItem {
    ray: Ray,
    weight: Color,
    depth: u32,
}

enum Step {
    Visit(u32, Ray),
    Pop,
    Advance,
}

/// Next slot of a stackless heap walk: climb while on a right child, then
/// move to the right sibling. Returns 0 when the walk is over.
#[inline]
pub fn next_slot(mut slot: u32) -> u32 {
    while slot & 1 == 1 {
        slot >>= 1;
    }
    if slot == 0 {
        0
    } else {
        slot + 1
    }
}

/// Executes queries and shading against a [`DeviceScene`].
#[derive(Debug)]
pub struct Interpreter<'a> {
    scene: &'a DeviceScene,
    lights: Vec<Light>,
}

impl<'a> Interpreter<'a> {
    /// Validate `scene` and decode its lights.
    pub fn new(scene: &'a DeviceScene) -> DeviceResult<Self> {
        scene.validate()?;
        let lights = scene.lights.iter().map(decode_light).collect::<DeviceResult<Vec<_>>>()?;
        Ok(Self { scene, lights })
    }

    pub fn scene(&self) -> &DeviceScene {
        self.scene
    }

    fn limits(&self) -> &DeviceLimits {
        &self.scene.layout.limits
    }

    /// Nearest hit with `min < t < max`. Exact ties keep the first hit
    /// found, which may differ from the recursive traversal's order.
    pub fn cast_ray(&self, ray: &Ray, min: f32, max: f32) -> Option<DeviceHit> {
        let scene = self.scene;
        let mut best = max;
        let mut hit: Option<DeviceHit> = None;
        let mut frames: Vec<Frame> = Vec::with_capacity(scene.header.frame_depth as usize);

        self.visit(scene.root(), ray, min, &mut best, &mut frames, &mut hit);

        loop {
            let step = {
                let Some(frame) = frames.last_mut() else { break };
                let object = &scene.objects[frame.object as usize];

                if frame.unbounded < object.unbounded_len {
                    let item = scene.items[(object.unbounded_start + frame.unbounded) as usize];
                    frame.unbounded += 1;
                    Step::Visit(item, frame.ray)
                } else if frame.leaf_remaining > 0 {
                    let item = scene.items[frame.leaf_next as usize];
                    frame.leaf_next += 1;
                    frame.leaf_remaining -= 1;
                    if frame.leaf_remaining == 0 {
                        frame.node = next_slot(frame.node);
                    }
                    Step::Visit(item, frame.ray)
                } else if frame.node == 0 {
                    Step::Pop
                } else {
                    let slot = frame.node;
                    let node = (slot <= object.heap_len)
                        .then(|| &scene.heap[(object.heap_start + slot - 1) as usize]);
                    let entered = node.filter(|n| {
                        n.kind != HEAP_ABSENT && n.bbox().hit(&frame.ray, Interval::new(min, best))
                    });
                    match entered {
                        Some(n) if n.kind == HEAP_INTERNAL => frame.node = slot * 2,
                        Some(n) if n.item_count > 0 => {
                            frame.leaf_next = n.item_start;
                            frame.leaf_remaining = n.item_count;
                        }
                        _ => frame.node = next_slot(slot),
                    }
                    Step::Advance
                }
            };

            match step {
                Step::Visit(item, local) => self.visit(item, &local, min, &mut best, &mut frames, &mut hit),
                Step::Pop => {
                    frames.pop();
                }
                Step::Advance => {}
            }
        }
        hit
    }

    /// Test one object under the parent frame's ray: primitives are
    /// intersected, groups are entered.
    fn visit(
        &self,
        index: u32,
        parent_ray: &Ray,
        min: f32,
        best: &mut f32,
        frames: &mut Vec<Frame>,
        hit: &mut Option<DeviceHit>,
    ) {
        let scene = self.scene;
        let object = &scene.objects[index as usize];
        let transform = &scene.transforms[object.transform as usize];
        if transform.invertible == 0 {
            return;
        }
        let local = parent_ray.transformed(&transform.inverse());

        if object.kind == OBJECT_PRIMITIVE {
            if let Some(t) = self.intersect(object.geometry, &local, min, *best) {
                if t > min && t < *best {
                    *best = t;
                    let path = frames.iter().map(|f| f.object).chain(std::iter::once(index)).collect();
                    *hit = Some(DeviceHit {
                        distance: t,
                        object: index,
                        path,
                    });
                }
            }
            return;
        }

        if frames.len() >= self.limits().max_frame_depth {
            log::error!("Frame stack overflow entering object {index}; group skipped");
            return;
        }
        frames.push(Frame {
            object: index,
            ray: local,
            unbounded: 0,
            node: if object.heap_len > 0 { 1 } else { 0 },
            leaf_next: 0,
            leaf_remaining: 0,
        });
    }

    fn intersect(&self, geometry: u32, ray: &Ray, min: f32, max: f32) -> Option<f32> {
        let record = &self.scene.geometries[geometry as usize];
        if record.kind != GEOMETRY_SDF {
            return decode_geometry(record)?.intersect(ray, min, max);
        }
        match sphere_trace(&self.program(record), ray, min, max, &trace_settings(record)) {
            Ok(hit) => hit,
            Err(err) => {
                log::error!("{err}; ray {ray:?} abandoned");
                None
            }
        }
    }

    fn program(&self, record: &GpuGeometry) -> SdfProgram<'_> {
        let start = record.sdf_start as usize;
        SdfProgram {
            ops: &self.scene.sdf_ops[start..start + record.sdf_len as usize],
        }
    }

    /// True when anything blocks `ray` over `(min, max)`.
    pub fn occluded(&self, ray: &Ray, min: f32, max: f32) -> bool {
        self.cast_ray(ray, min, max).is_some()
    }

    /// World-space attributes for a hit returned by
    /// [`cast_ray`](Self::cast_ray) for the same ray.
    pub fn surface(&self, ray: &Ray, hit: &DeviceHit) -> DeviceSurface {
        let scene = self.scene;
        let mut world_to_local = Mat4::IDENTITY;
        for &index in &hit.path {
            let object = &scene.objects[index as usize];
            world_to_local = scene.transforms[object.transform as usize].inverse() * world_to_local;
        }

        let object = &scene.objects[hit.object as usize];
        let record = &scene.geometries[object.geometry as usize];
        let local_ray = ray.transformed(&world_to_local);
        let data = if record.kind == GEOMETRY_SDF {
            let point = local_ray.at(hit.distance);
            SurfaceData {
                point,
                normal: estimate_normal(&self.program(record), point, record.params[0][1]),
                uv: Vec2::ZERO,
            }
        } else {
            decode_geometry(record).map_or(
                SurfaceData {
                    point: local_ray.at(hit.distance),
                    normal: Vec3::ZERO,
                    uv: Vec2::ZERO,
                },
                |g| g.material_data(&local_ray, hit.distance),
            )
        };

        let outward = (Mat3::from_mat4(world_to_local).transpose() * data.normal).normalize_or_zero();
        let front_face = ray.direction().dot(outward) < 0.0;
        DeviceSurface {
            point: ray.at(hit.distance),
            normal: if front_face { outward } else { -outward },
            uv: data.uv,
            front_face,
            material: object.material,
        }
    }

    /// Evaluate a material record at `uv`.
    pub fn response(&self, material: u32, uv: Vec2) -> Response {
        let record = &self.scene.materials[material as usize];
        let base = self.color(record.color, uv);
        let lobe = PhongLobe {
            ambient: record.lobe[0],
            diffuse: record.lobe[1],
            specular: record.lobe[2],
            shininess: record.lobe[3],
            reflectivity: record.extra[0],
        };
        match record.kind {
            MATERIAL_SOLID => Response::Unlit(base),
            MATERIAL_TRANSPARENT => Response::Transparent(base),
            MATERIAL_PHONG => Response::Phong { base, lobe },
            MATERIAL_FRESNEL => Response::Fresnel {
                base,
                lobe,
                ior: record.extra[1],
            },
            // MATERIAL_PATH_TRACED; validate() rejects anything else
            _ => Response::PathTraced {
                base,
                lobe,
                emission: unpack3(&record.emission),
            },
        }
    }

    /// Walk a color program from its root. Scale factors are collected on
    /// the way down and applied innermost first.
    pub fn color(&self, root: u32, uv: Vec2) -> Color {
        let scene = self.scene;
        let mut factors = [0.0f32; COLOR_STACK_CAPACITY];
        let mut count = 0;
        let mut index = root;

        let mut value = loop {
            let record = &scene.colors[index as usize];
            match record.kind {
                COLOR_SCALED => {
                    if count < factors.len() {
                        factors[count] = record.value[3];
                        count += 1;
                    }
                    index = record.a;
                }
                COLOR_CHECKER => {
                    index = if checker_is_even(uv, record.value[3]) {
                        record.a
                    } else {
                        record.b
                    };
                }
                COLOR_TEXTURE => {
                    let texture = &scene.textures[record.a as usize];
                    let start = texture.offset as usize;
                    let len = (texture.width * texture.height) as usize;
                    let filter = if record.b == FILTER_NEAREST {
                        TextureFilter::Nearest
                    } else {
                        TextureFilter::Bilinear
                    };
                    break sample_texels(
                        &scene.texels[start..start + len],
                        texture.width,
                        texture.height,
                        uv,
                        filter,
                    );
                }
                _ => break unpack3(&record.value),
            }
        };
        for factor in factors[..count].iter().rev() {
            value = value * *factor;
        }
        value
    }

    /// Radiance arriving along `ray` with `depth` bounces left.
    pub fn trace(
        &self,
        ray: &Ray,
        depth: u32,
        config: &ShadingConfig,
        rng: &mut dyn RngCore,
    ) -> DeviceResult<Color> {
        check_limit(
            "shading work list",
            DeviceLimits::work_items_for_depth(depth),
            self.limits().max_work_items,
        )?;
        Ok(self.radiance(ray, depth, config, rng))
    }

    fn radiance(&self, ray: &Ray, depth: u32, config: &ShadingConfig, rng: &mut dyn RngCore) -> Color {
        let mut total = Color::ZERO;
        let mut work: Vec<WorkItem> = Vec::with_capacity(DeviceLimits::work_items_for_depth(depth));
        work.push(WorkItem {
            ray: *ray,
            weight: Color::ONE,
            depth,
        });

        while let Some(item) = work.pop() {
            if item.depth == 0 {
                continue;
            }
            let Some(hit) = self.cast_ray(&item.ray, config.ray_epsilon, f32::INFINITY) else {
                total += item.weight * config.background;
                continue;
            };

            let surface = self.surface(&item.ray, &hit);
            let response = self.response(surface.material, surface.uv);
            let interaction = Interaction {
                point: surface.point,
                normal: surface.normal,
                front_face: surface.front_face,
                incoming: item.ray.direction(),
            };
            let mut occluded = |shadow: &Ray, min: f32, max: f32| self.occluded(shadow, min, max);
            let result = scatter(&response, &interaction, &self.lights, config, &mut occluded, rng);

            total += item.weight * result.emitted;
            if item.depth > 1 {
                for branch in result.branches.iter().rev() {
                    work.push(WorkItem {
                        ray: branch.ray,
                        weight: item.weight * branch.weight,
                        depth: item.depth - 1,
                    });
                }
            }
        }
        total
    }

    /// Average of `samples_per_pixel` traced samples through pixel `(x, y)`.
    pub fn render_pixel(
        &self,
        camera: &Camera,
        x: u32,
        y: u32,
        config: &RenderConfig,
        rng: &mut dyn RngCore,
    ) -> DeviceResult<Color> {
        check_limit(
            "shading work list",
            DeviceLimits::work_items_for_depth(config.max_depth),
            self.limits().max_work_items,
        )?;
        Ok(self.pixel(camera, x, y, config, rng))
    }

    fn pixel(&self, camera: &Camera, x: u32, y: u32, config: &RenderConfig, rng: &mut dyn RngCore) -> Color {
        let samples = config.samples_per_pixel.max(1);
        let mut pixel_color = Color::ZERO;
        for _ in 0..samples {
            let ray = camera.get_ray(x, y, rng);
            pixel_color += self.radiance(&ray, config.max_depth, &config.shading, rng);
        }
        pixel_color / samples as f32
    }

    /// Render every pixel of `camera` into `sink`, seeding rows exactly as
    /// [`lumen_renderer::render`] does.
    pub fn render(&self, camera: &Camera, config: &RenderConfig, sink: &mut dyn PixelSink) -> DeviceResult<()> {
        check_limit(
            "shading work list",
            DeviceLimits::work_items_for_depth(config.max_depth),
            self.limits().max_work_items,
        )?;

        let rows: Vec<Vec<Color>> = (0..camera.image_height)
            .into_par_iter()
            .map(|y| {
                let mut rng = StdRng::seed_from_u64(row_seed(config.seed, y));
                (0..camera.image_width)
                    .map(|x| self.pixel(camera, x, y, config, &mut rng))
                    .collect()
            })
            .collect();

        for (y, row) in rows.into_iter().enumerate() {
            for (x, color) in row.into_iter().enumerate() {
                sink.set_color(x as u32, y as u32, color);
            }
        }
        log::debug!(
            "Device interpreter rendered {}x{} at {} spp",
            camera.image_width,
            camera.image_height,
            config.samples_per_pixel
        );
        Ok(())
    }

    /// Source handles along a hit's path.
    pub fn source_chain(&self, hit: &DeviceHit) -> Vec<ObjectId> {
        hit.path.iter().filter_map(|&index| self.scene.source(index)).collect()
    }
}

/// Rebuild an analytic shape from its record. `None` for SDF records.
fn decode_geometry(record: &GpuGeometry) -> Option<Geometry> {
    let geometry = match record.kind {
        GEOMETRY_PLANE => Geometry::Plane {
            normal: unpack3(&record.params[0]),
            delta: record.params[0][3],
        },
        GEOMETRY_SQUARE => Geometry::Square,
        GEOMETRY_CIRCLE => Geometry::Circle,
        GEOMETRY_SPHERE => Geometry::Sphere,
        GEOMETRY_BOX => Geometry::Box,
        GEOMETRY_CYLINDER => Geometry::Cylinder,
        GEOMETRY_TRIANGLE => Geometry::Triangle {
            a: unpack3(&record.params[0]),
            b: unpack3(&record.params[1]),
            c: unpack3(&record.params[2]),
        },
        _ => return None,
    };
    Some(geometry)
}

fn trace_settings(record: &GpuGeometry) -> TraceSettings {
    TraceSettings {
        epsilon: record.params[0][0],
        normal_epsilon: record.params[0][1],
        max_steps: record.max_steps,
        max_trace_distance: record.params[0][2],
    }
}

fn decode_light(record: &GpuLight) -> DeviceResult<Light> {
    let color = unpack3(&record.color);
    match record.kind {
        LIGHT_POINT => Ok(Light::SimplePoint {
            position: unpack3(&record.position),
            color,
        }),
        LIGHT_AREA => {
            let shape = match record.shape {
                SHAPE_SQUARE => AreaShape::Square,
                SHAPE_CIRCLE => AreaShape::Circle,
                SHAPE_SPHERE => AreaShape::Sphere,
                other => return Err(DeviceError::Unsupported(format!("area light shape {other}"))),
            };
            Ok(Light::RandomSampleArea {
                shape,
                transform: Mat4::from_cols_array_2d(&record.transform),
                color,
                samples: record.samples,
            })
        }
        other => Err(DeviceError::Unsupported(format!("light kind {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten;
    use lumen_core::{Material, PhongParams};
    use lumen_renderer::{IndexParams, World};
    use std::sync::Arc;

    #[test]
    fn test_next_slot_walk_order() {
        // Full tree of 7 slots, preorder with every subtree skipped
        assert_eq!(next_slot(1), 0);
        assert_eq!(next_slot(2), 3);
        assert_eq!(next_slot(3), 0);
        assert_eq!(next_slot(4), 5);
        assert_eq!(next_slot(5), 3);
        assert_eq!(next_slot(6), 7);
        assert_eq!(next_slot(7), 0);
    }

    fn sphere_grid() -> World {
        let mut world = World::new();
        let geometry = Arc::new(Geometry::Sphere);
        let material = Arc::new(Material::phong(PhongParams::new(Vec3::splat(0.5))));
        let mut children = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                let center = Vec3::new(i as f32 * 2.5 - 6.0, j as f32 * 2.5 - 6.0, -10.0);
                children.push(
                    world
                        .add_primitive(geometry.clone(), material.clone(), Mat4::from_translation(center))
                        .unwrap(),
                );
            }
        }
        let root = world
            .add_bvh_aggregate(children, Mat4::IDENTITY, IndexParams::default().with_min_leaf_size(1))
            .unwrap();
        world.set_root(root).unwrap();
        world
    }

    #[test]
    fn test_cast_ray_matches_world() {
        let world = sphere_grid();
        let scene = flatten(&world, &DeviceLimits::default()).unwrap();
        let interpreter = Interpreter::new(&scene).unwrap();

        for i in 0..24 {
            for j in 0..24 {
                let target = Vec3::new(i as f32 * 0.6 - 7.0, j as f32 * 0.6 - 7.0, -10.0);
                let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), target - Vec3::new(0.0, 0.0, 5.0));
                let cpu = world.cast_ray(&ray, 0.001, f32::INFINITY);
                let device = interpreter.cast_ray(&ray, 0.001, f32::INFINITY);
                match (cpu, device) {
                    (None, None) => {}
                    (Some(a), Some(b)) => {
                        assert_eq!(Some(a.object), scene.source(b.object));
                        assert_eq!(a.chain, interpreter.source_chain(&b));
                        assert_eq!(a.distance, b.distance);
                    }
                    (a, b) => panic!("ray {ray:?}: cpu {a:?}, device {b:?}"),
                }
            }
        }
    }

    #[test]
    fn test_singular_member_is_skipped() {
        let mut world = World::new();
        let material = Arc::new(Material::solid(Vec3::ONE));
        let front = world
            .add_primitive(Geometry::Sphere, material.clone(), Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)))
            .unwrap();
        let back = world
            .add_primitive(Geometry::Sphere, material, Mat4::from_translation(Vec3::new(0.0, 0.0, -8.0)))
            .unwrap();
        let root = world.add_aggregate(vec![front, back], Mat4::IDENTITY).unwrap();
        world.set_root(root).unwrap();
        world.set_transform(front, Mat4::from_scale(Vec3::ZERO)).unwrap();

        let scene = flatten(&world, &DeviceLimits::default()).unwrap();
        let interpreter = Interpreter::new(&scene).unwrap();
        let hit = interpreter.cast_ray(&Ray::new(Vec3::ZERO, Vec3::NEG_Z), 0.001, f32::INFINITY).unwrap();
        assert_eq!(scene.source(hit.object), Some(back));
        assert!((hit.distance - 7.0).abs() < 1e-4);
    }

    #[test]
    fn test_work_list_limit() {
        let world = sphere_grid();
        let limits = DeviceLimits::default().with_max_work_items(4);
        let scene = flatten(&world, &limits).unwrap();
        let interpreter = Interpreter::new(&scene).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        let config = ShadingConfig::default();
        assert!(interpreter.trace(&ray, 3, &config, &mut rng).is_ok());
        assert!(matches!(
            interpreter.trace(&ray, 8, &config, &mut rng),
            Err(DeviceError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn test_unknown_light_shape_rejected() {
        let mut record = GpuLight {
            kind: LIGHT_AREA,
            shape: 9,
            samples: 1,
            _pad: 0,
            position: [0.0; 4],
            color: [1.0; 4],
            transform: Mat4::IDENTITY.to_cols_array_2d(),
        };
        assert!(decode_light(&record).is_err());
        record.shape = SHAPE_CIRCLE;
        assert!(matches!(
            decode_light(&record),
            Ok(Light::RandomSampleArea {
                shape: AreaShape::Circle,
                ..
            })
        ));
    }
}
