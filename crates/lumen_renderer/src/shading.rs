//! Whitted and stochastic light transport.
//!
//! Shading one hit is split in two: [`scatter`] turns a surface response
//! into locally emitted radiance plus a list of weighted continuation rays,
//! and [`shade`] follows those rays recursively. The split lets an iterative
//! evaluator drive the same scattering with an explicit work list.

use lumen_core::brdf::{fresnel, phong_ambient, phong_direct, reflect, refract};
use lumen_core::sampling::{cosine_hemisphere, gen_f32};
use lumen_core::{Light, LightSample, Material, PhongLobe};
use lumen_math::{Ray, Vec2, Vec3};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::world::{RayHit, Surface, World};

/// Type alias for color (RGB stored as Vec3)
pub type Color = Vec3;

/// How branching materials are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShadingMode {
    /// Follow every reflection and refraction branch.
    #[default]
    Whitted,
    /// Pick one branch per bounce; averaging many samples is unbiased.
    Stochastic,
}

/// Shading settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadingConfig {
    pub mode: ShadingMode,
    /// Returned by rays that leave the scene.
    pub background: Color,
    /// Minimum hit distance for camera and continuation rays.
    pub ray_epsilon: f32,
    /// Minimum hit distance for shadow rays, in units of the distance to
    /// the light sample.
    pub shadow_epsilon: f32,
}

impl Default for ShadingConfig {
    fn default() -> Self {
        Self {
            mode: ShadingMode::Whitted,
            background: Color::ZERO,
            ray_epsilon: 1e-3,
            shadow_epsilon: 1e-3,
        }
    }
}

impl ShadingConfig {
    pub fn with_mode(mut self, mode: ShadingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }
}

/// A material evaluated at one surface point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Response {
    Unlit(Color),
    Transparent(Color),
    Phong {
        base: Color,
        lobe: PhongLobe,
    },
    Fresnel {
        base: Color,
        lobe: PhongLobe,
        ior: f32,
    },
    PathTraced {
        base: Color,
        lobe: PhongLobe,
        emission: Color,
    },
}

impl Response {
    pub fn evaluate(material: &Material, uv: Vec2) -> Self {
        match material {
            Material::SolidColor(color) => Response::Unlit(color.evaluate(uv)),
            Material::Transparent { tint } => Response::Transparent(tint.evaluate(uv)),
            Material::Phong(p) => Response::Phong {
                base: p.color.evaluate(uv),
                lobe: p.lobe,
            },
            Material::FresnelPhong { phong, ior } => Response::Fresnel {
                base: phong.color.evaluate(uv),
                lobe: phong.lobe,
                ior: *ior,
            },
            Material::PhongPathTracing { phong, emission } => Response::PathTraced {
                base: phong.color.evaluate(uv),
                lobe: phong.lobe,
                emission: *emission,
            },
        }
    }
}

/// Geometric side of a hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interaction {
    pub point: Vec3,
    /// Unit normal facing against `incoming`.
    pub normal: Vec3,
    pub front_face: bool,
    /// Direction of the ray that arrived, any length.
    pub incoming: Vec3,
}

impl Interaction {
    pub fn new(surface: &Surface<'_>, ray: &Ray) -> Self {
        Self {
            point: surface.point,
            normal: surface.normal,
            front_face: surface.front_face,
            incoming: ray.direction(),
        }
    }
}

/// A continuation ray and the factor its radiance is scaled by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Branch {
    pub ray: Ray,
    pub weight: Color,
}

/// Output of one scattering event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scatter {
    /// Radiance leaving the surface without further tracing.
    pub emitted: Color,
    /// Continuations, in the order they must be traced.
    pub branches: Vec<Branch>,
}

/// Evaluate one hit: local lighting plus the rays to follow.
///
/// `occluded(ray, min, max)` answers shadow queries. Random numbers are
/// drawn in a fixed order (light samples first, then branch choices) so
/// any evaluator tracing branches depth first in the returned order
/// reproduces the same sequence.
pub fn scatter(
    response: &Response,
    hit: &Interaction,
    lights: &[Light],
    config: &ShadingConfig,
    occluded: &mut dyn FnMut(&Ray, f32, f32) -> bool,
    rng: &mut dyn RngCore,
) -> Scatter {
    let view = hit.incoming.normalize_or_zero();
    let mut out = Scatter::default();

    match *response {
        Response::Unlit(color) => out.emitted = color,
        Response::Transparent(tint) => out.branches.push(Branch {
            ray: Ray::new(hit.point, hit.incoming),
            weight: tint,
        }),
        Response::Phong { base, lobe } => {
            out.emitted = local_lighting(&lobe, base, hit, view, lights, config, occluded, rng);
            push_mirror(&mut out, hit, view, lobe.reflectivity);
        }
        Response::Fresnel { base, lobe, ior } => {
            out.emitted = local_lighting(&lobe, base, hit, view, lights, config, occluded, rng);
            push_fresnel(&mut out, hit, view, ior, config.mode, rng);
        }
        Response::PathTraced {
            base,
            lobe,
            emission,
        } => {
            out.emitted = emission + local_lighting(&lobe, base, hit, view, lights, config, occluded, rng);
            match config.mode {
                ShadingMode::Whitted => push_mirror(&mut out, hit, view, lobe.reflectivity),
                ShadingMode::Stochastic => push_bounce(&mut out, hit, view, &lobe, base, rng),
            }
        }
    }
    out
}

/// Ambient plus shadowed direct light from every light sample.
#[allow(clippy::too_many_arguments)]
fn local_lighting(
    lobe: &PhongLobe,
    base: Color,
    hit: &Interaction,
    view: Vec3,
    lights: &[Light],
    config: &ShadingConfig,
    occluded: &mut dyn FnMut(&Ray, f32, f32) -> bool,
    rng: &mut dyn RngCore,
) -> Color {
    let mut color = phong_ambient(lobe, base);
    let mirrored = reflect(view, hit.normal);
    let mut samples: Vec<LightSample> = Vec::new();

    for light in lights {
        samples.clear();
        light.sample_into(hit.point, rng, &mut samples);
        for sample in &samples {
            let shadow = Ray::new(hit.point, sample.direction);
            if occluded(&shadow, config.shadow_epsilon, 1.0) {
                continue;
            }
            let to_light = sample.direction.normalize_or_zero();
            color += phong_direct(lobe, base, hit.normal, mirrored, to_light, sample.radiance);
        }
    }
    color
}

fn push_mirror(out: &mut Scatter, hit: &Interaction, view: Vec3, reflectivity: f32) {
    if reflectivity > 0.0 {
        out.branches.push(Branch {
            ray: Ray::new(hit.point, reflect(view, hit.normal)),
            weight: Color::splat(reflectivity),
        });
    }
}

fn push_fresnel(
    out: &mut Scatter,
    hit: &Interaction,
    view: Vec3,
    ior: f32,
    mode: ShadingMode,
    rng: &mut dyn RngCore,
) {
    // Leaving the medium through a back face inverts the ratio
    let eta = if hit.front_face { 1.0 / ior } else { ior };
    let kr = fresnel(-view.dot(hit.normal), eta);
    let reflected = Ray::new(hit.point, reflect(view, hit.normal));
    let refracted = if kr < 1.0 {
        refract(view, hit.normal, eta).map(|d| Ray::new(hit.point, d))
    } else {
        None
    };

    match mode {
        ShadingMode::Whitted => {
            if kr > 0.0 {
                out.branches.push(Branch {
                    ray: reflected,
                    weight: Color::splat(kr),
                });
            }
            if let Some(ray) = refracted {
                out.branches.push(Branch {
                    ray,
                    weight: Color::splat(1.0 - kr),
                });
            }
        }
        ShadingMode::Stochastic => {
            let u = gen_f32(rng);
            let ray = match refracted {
                Some(ray) if u >= kr => ray,
                _ => reflected,
            };
            out.branches.push(Branch {
                ray,
                weight: Color::ONE,
            });
        }
    }
}

/// One importance-sampled bounce: mirror or cosine-weighted diffuse,
/// chosen in proportion to the lobe weights.
fn push_bounce(
    out: &mut Scatter,
    hit: &Interaction,
    view: Vec3,
    lobe: &PhongLobe,
    base: Color,
    rng: &mut dyn RngCore,
) {
    let total = lobe.diffuse + lobe.specular;
    if total <= 0.0 {
        return;
    }
    let p_specular = lobe.specular / total;
    let u = gen_f32(rng);
    if u < p_specular {
        out.branches.push(Branch {
            ray: Ray::new(hit.point, reflect(view, hit.normal)),
            weight: Color::splat(lobe.specular / p_specular),
        });
    } else {
        let direction = cosine_hemisphere(hit.normal, rng);
        out.branches.push(Branch {
            ray: Ray::new(hit.point, direction),
            weight: base * (lobe.diffuse / (1.0 - p_specular)),
        });
    }
}

/// Radiance arriving along `ray` with `depth` bounces left.
pub fn trace(world: &World, ray: &Ray, depth: u32, config: &ShadingConfig, rng: &mut dyn RngCore) -> Color {
    if depth == 0 {
        return Color::ZERO;
    }
    match world.cast_ray(ray, config.ray_epsilon, f32::INFINITY) {
        Some(hit) => shade(world, ray, &hit, depth, config, rng),
        None => config.background,
    }
}

/// Radiance leaving the hit toward the ray origin.
///
/// Each branch is traced with `depth - 1`, independently of its siblings.
pub fn shade(
    world: &World,
    ray: &Ray,
    hit: &RayHit,
    depth: u32,
    config: &ShadingConfig,
    rng: &mut dyn RngCore,
) -> Color {
    if depth == 0 {
        return Color::ZERO;
    }
    let surface = match world.surface(ray, hit) {
        Ok(surface) => surface,
        Err(err) => {
            log::error!("Cannot shade hit on object {}: {err}", hit.object.0);
            return Color::ZERO;
        }
    };

    let response = Response::evaluate(surface.material, surface.uv);
    let interaction = Interaction::new(&surface, ray);
    let mut occluded = |shadow: &Ray, min: f32, max: f32| world.occluded(shadow, min, max);
    let result = scatter(&response, &interaction, world.lights(), config, &mut occluded, rng);

    let mut color = result.emitted;
    for branch in &result.branches {
        color += branch.weight * trace(world, &branch.ray, depth - 1, config, rng);
    }
    color
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::{Geometry, PhongParams};
    use lumen_math::Mat4;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn single(material: Material, transform: Mat4) -> World {
        let mut world = World::new();
        let id = world.add_primitive(Geometry::Sphere, material, transform).unwrap();
        world.set_root(id).unwrap();
        world
    }

    fn close(a: Vec3, b: Vec3, tol: f32) -> bool {
        (a - b).abs().max_element() < tol
    }

    #[test]
    fn test_depth_zero_is_black() {
        let world = single(Material::solid(Vec3::ONE), Mat4::IDENTITY);
        let mut rng = StdRng::seed_from_u64(1);
        let config = ShadingConfig::default().with_background(Vec3::ONE);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        assert_eq!(trace(&world, &ray, 0, &config, &mut rng), Vec3::ZERO);
    }

    #[test]
    fn test_miss_returns_background() {
        let world = single(Material::solid(Vec3::ONE), Mat4::IDENTITY);
        let mut rng = StdRng::seed_from_u64(1);
        let config = ShadingConfig::default().with_background(Vec3::new(0.2, 0.3, 0.4));
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::Z);
        assert_eq!(trace(&world, &ray, 4, &config, &mut rng), Vec3::new(0.2, 0.3, 0.4));
    }

    #[test]
    fn test_solid_color_is_unlit() {
        let world = single(Material::solid(Vec3::new(0.9, 0.1, 0.1)), Mat4::IDENTITY);
        let mut rng = StdRng::seed_from_u64(1);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        let color = trace(&world, &ray, 3, &ShadingConfig::default(), &mut rng);
        assert!(close(color, Vec3::new(0.9, 0.1, 0.1), 1e-6));
    }

    #[test]
    fn test_occluded_point_light_leaves_ambient() {
        let mut world = World::new();
        let base = Vec3::new(0.5, 0.6, 0.7);
        let floor = world
            .add_primitive(
                Geometry::plane(Vec3::Y, 0.0),
                Material::phong(PhongParams::new(base)),
                Mat4::IDENTITY,
            )
            .unwrap();
        // Square lying in y = 2, between the light and the origin
        let blocker = world
            .add_primitive(
                Geometry::Square,
                Material::solid(Vec3::ZERO),
                Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0))
                    * Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2)
                    * Mat4::from_scale(Vec3::splat(3.0)),
            )
            .unwrap();
        let root = world.add_aggregate(vec![floor, blocker], Mat4::IDENTITY).unwrap();
        world.set_root(root).unwrap();
        world.add_light(Light::point(Vec3::new(0.0, 5.0, 0.0), Vec3::ONE));

        // Look at the origin from below the blocker
        let ray = Ray::new(Vec3::new(0.0, 1.0, 1.0), Vec3::new(0.0, -1.0, -1.0));
        let hit = world.cast_ray(&ray, 1e-3, f32::INFINITY).unwrap();
        assert_eq!(hit.object, floor);

        let mut rng = StdRng::seed_from_u64(3);
        let color = shade(&world, &ray, &hit, 1, &ShadingConfig::default(), &mut rng);
        assert!(close(color, base * PhongLobe::default().ambient, 1e-6));

        // Without the blocker the light contributes
        world.set_transform(blocker, Mat4::from_scale(Vec3::ZERO)).unwrap();
        let color = shade(&world, &ray, &hit, 1, &ShadingConfig::default(), &mut rng);
        assert!(color.x > base.x * 0.5);
    }

    #[test]
    fn test_transparent_passes_tinted() {
        let mut world = World::new();
        let glass = world
            .add_primitive(
                Geometry::Square,
                Material::transparent(Vec3::new(0.5, 1.0, 1.0)),
                Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0)),
            )
            .unwrap();
        let wall = world
            .add_primitive(
                Geometry::Square,
                Material::solid(Vec3::splat(0.8)),
                Mat4::from_translation(Vec3::new(0.0, 0.0, -4.0)),
            )
            .unwrap();
        let root = world.add_aggregate(vec![glass, wall], Mat4::IDENTITY).unwrap();
        world.set_root(root).unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        let color = trace(&world, &ray, 2, &ShadingConfig::default(), &mut rng);
        assert!(close(color, Vec3::new(0.4, 0.8, 0.8), 1e-6));

        // Not enough depth to get through
        let color = trace(&world, &ray, 1, &ShadingConfig::default(), &mut rng);
        assert_eq!(color, Vec3::ZERO);
    }

    #[test]
    fn test_reflectivity_adds_mirror_image() {
        let mut world = World::new();
        let mirror = world
            .add_primitive(
                Geometry::Square,
                Material::phong(
                    PhongParams::new(Vec3::ZERO)
                        .with_ambient(0.0)
                        .with_specular(0.0, 1.0)
                        .with_reflectivity(0.5),
                ),
                Mat4::from_scale(Vec3::splat(10.0)),
            )
            .unwrap();
        world.set_root(mirror).unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let config = ShadingConfig::default().with_background(Vec3::ONE);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.2, -1.0));
        let color = trace(&world, &ray, 2, &config, &mut rng);
        assert!(close(color, Vec3::splat(0.5), 1e-6));
    }

    #[test]
    fn test_fresnel_branches_conserve_weight() {
        let response = Response::Fresnel {
            base: Vec3::ZERO,
            lobe: PhongLobe {
                ambient: 0.0,
                ..PhongLobe::default()
            },
            ior: 1.5,
        };
        let hit = Interaction {
            point: Vec3::ZERO,
            normal: Vec3::Z,
            front_face: true,
            incoming: Vec3::new(0.3, 0.0, -1.0),
        };
        let mut never = |_: &Ray, _: f32, _: f32| false;
        let mut rng = StdRng::seed_from_u64(1);
        let out = scatter(&response, &hit, &[], &ShadingConfig::default(), &mut never, &mut rng);

        assert_eq!(out.branches.len(), 2);
        let reflected = out.branches[0];
        let refracted = out.branches[1];
        assert!(reflected.ray.direction.z > 0.0);
        assert!(refracted.ray.direction.z < 0.0);
        assert!((reflected.weight.x + refracted.weight.x - 1.0).abs() < 1e-6);
        // Near normal incidence glass reflects about 4%
        assert!(reflected.weight.x > 0.03 && reflected.weight.x < 0.06);
    }

    #[test]
    fn test_total_internal_reflection_has_single_branch() {
        let response = Response::Fresnel {
            base: Vec3::ZERO,
            lobe: PhongLobe::default(),
            ior: 1.5,
        };
        // Grazing exit from inside the glass
        let hit = Interaction {
            point: Vec3::ZERO,
            normal: Vec3::NEG_Z,
            front_face: false,
            incoming: Vec3::new(1.0, 0.0, 0.2),
        };
        let mut never = |_: &Ray, _: f32, _: f32| false;
        let mut rng = StdRng::seed_from_u64(1);
        for mode in [ShadingMode::Whitted, ShadingMode::Stochastic] {
            let config = ShadingConfig::default().with_mode(mode);
            let out = scatter(&response, &hit, &[], &config, &mut never, &mut rng);
            assert_eq!(out.branches.len(), 1);
            assert!(out.branches[0].ray.direction.z < 0.0);
            assert_eq!(out.branches[0].weight, Vec3::ONE);
        }
    }

    #[test]
    fn test_stochastic_bounce_is_reproducible() {
        let material = Material::path_traced(PhongParams::new(Vec3::splat(0.7)), Vec3::new(0.1, 0.0, 0.0));
        let mut world = World::new();
        let floor = world
            .add_primitive(Geometry::plane(Vec3::Y, 0.0), Arc::new(material), Mat4::IDENTITY)
            .unwrap();
        world.set_root(floor).unwrap();
        world.add_light(Light::point(Vec3::new(0.0, 4.0, 0.0), Vec3::ONE));

        let config = ShadingConfig::default()
            .with_mode(ShadingMode::Stochastic)
            .with_background(Vec3::splat(0.5));
        let ray = Ray::new(Vec3::new(0.0, 2.0, 2.0), Vec3::new(0.0, -1.0, -1.0));
        let a = trace(&world, &ray, 4, &config, &mut StdRng::seed_from_u64(9));
        let b = trace(&world, &ray, 4, &config, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
        // Emission always reaches the eye
        assert!(a.x >= 0.1);
    }
}
