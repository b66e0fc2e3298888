//! Fixed-size GPU records.
//!
//! Every record is `#[repr(C)]` and `Pod` so buffers can be viewed as bytes
//! with `bytemuck::cast_slice`. Vectors are padded to 16 bytes to match
//! WGSL storage-buffer alignment.

use bytemuck::{Pod, Zeroable};
use lumen_math::{Aabb, Mat4, Ray, Vec3};
use lumen_renderer::{RenderConfig, ShadingMode};

/// Index value meaning "no record".
pub const NONE: u32 = u32::MAX;

pub const GEOMETRY_PLANE: u32 = 0;
pub const GEOMETRY_SQUARE: u32 = 1;
pub const GEOMETRY_CIRCLE: u32 = 2;
pub const GEOMETRY_SPHERE: u32 = 3;
pub const GEOMETRY_BOX: u32 = 4;
pub const GEOMETRY_CYLINDER: u32 = 5;
pub const GEOMETRY_TRIANGLE: u32 = 6;
pub const GEOMETRY_SDF: u32 = 7;

pub const MATERIAL_SOLID: u32 = 0;
pub const MATERIAL_TRANSPARENT: u32 = 1;
pub const MATERIAL_PHONG: u32 = 2;
pub const MATERIAL_FRESNEL: u32 = 3;
pub const MATERIAL_PATH_TRACED: u32 = 4;

pub const COLOR_SOLID: u32 = 0;
pub const COLOR_SCALED: u32 = 1;
pub const COLOR_CHECKER: u32 = 2;
pub const COLOR_TEXTURE: u32 = 3;

pub const FILTER_NEAREST: u32 = 0;
pub const FILTER_BILINEAR: u32 = 1;

pub const LIGHT_POINT: u32 = 0;
pub const LIGHT_AREA: u32 = 1;

pub const SHAPE_SQUARE: u32 = 0;
pub const SHAPE_CIRCLE: u32 = 1;
pub const SHAPE_SPHERE: u32 = 2;

pub const OBJECT_PRIMITIVE: u32 = 0;
pub const OBJECT_GROUP: u32 = 1;

pub const HEAP_ABSENT: u32 = 0;
pub const HEAP_INTERNAL: u32 = 1;
pub const HEAP_LEAF: u32 = 2;

#[inline]
pub fn pack3(v: Vec3, w: f32) -> [f32; 4] {
    [v.x, v.y, v.z, w]
}

#[inline]
pub fn unpack3(v: &[f32; 4]) -> Vec3 {
    Vec3::new(v[0], v[1], v[2])
}

/// Scene-wide values read by every kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuHeader {
    pub root: u32,
    pub object_count: u32,
    pub light_count: u32,
    /// Deepest chain of nested groups below the root.
    pub frame_depth: u32,
}

/// One shape. `params` holds plane `[normal, delta]`, triangle vertices,
/// or SDF trace settings `[epsilon, normal_epsilon, max_trace_distance, _]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuGeometry {
    pub kind: u32,
    pub sdf_start: u32,
    pub sdf_len: u32,
    pub max_steps: u32,
    pub params: [[f32; 4]; 3],
}

/// One instruction of a postfix SDF program.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuSdfOp {
    pub op: u32,
    /// Operand count for n-ary combinators.
    pub arg: u32,
    /// Radius, size or distance factor.
    pub scalar: f32,
    pub _pad: u32,
    /// Inverse matrix columns, or a vector in `data[0]`.
    pub data: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub kind: u32,
    /// Root of this material's color program.
    pub color: u32,
    pub _pad: [u32; 2],
    /// `[ambient, diffuse, specular, shininess]`
    pub lobe: [f32; 4],
    /// `[reflectivity, ior, _, _]`
    pub extra: [f32; 4],
    pub emission: [f32; 4],
}

/// A node of a material color expression. Children precede parents.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuColor {
    pub kind: u32,
    /// Inner / even child, or texture index.
    pub a: u32,
    /// Odd child, or texture filter (0 nearest, 1 bilinear).
    pub b: u32,
    pub _pad: u32,
    /// Solid rgb; `w` holds the scale factor or checker frequency.
    pub value: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuTexture {
    pub width: u32,
    pub height: u32,
    /// First texel in the shared texel buffer.
    pub offset: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    pub kind: u32,
    pub shape: u32,
    pub samples: u32,
    pub _pad: u32,
    pub position: [f32; 4],
    pub color: [f32; 4],
    pub transform: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuTransform {
    pub matrix: [[f32; 4]; 4],
    pub inverse: [[f32; 4]; 4],
    pub invertible: u32,
    pub _pad: [u32; 3],
}

impl GpuTransform {
    #[inline]
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.matrix)
    }

    #[inline]
    pub fn inverse(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.inverse)
    }
}

/// A scene object. Groups own a slice of the heap and a slice of `items`
/// holding their unbounded children.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuObject {
    pub kind: u32,
    pub transform: u32,
    pub geometry: u32,
    pub material: u32,
    pub heap_start: u32,
    pub heap_len: u32,
    pub unbounded_start: u32,
    pub unbounded_len: u32,
    /// Handle of the object in the source world.
    pub source: u32,
    pub _pad: [u32; 3],
}

/// A slot of a group's implicit heap. Slot `i` (1-based) has children
/// `2i` and `2i + 1`; it is stored at `heap_start + i - 1`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuBvhNode {
    pub aabb_min: [f32; 4],
    pub aabb_max: [f32; 4],
    pub item_start: u32,
    pub item_count: u32,
    pub kind: u32,
    pub _pad: u32,
}

impl GpuBvhNode {
    pub fn new(kind: u32, bbox: &Aabb, item_start: u32, item_count: u32) -> Self {
        Self {
            aabb_min: pack3(bbox.min, 0.0),
            aabb_max: pack3(bbox.max, 0.0),
            item_start,
            item_count,
            kind,
            _pad: 0,
        }
    }

    #[inline]
    pub fn bbox(&self) -> Aabb {
        Aabb::new(unpack3(&self.aabb_min), unpack3(&self.aabb_max))
    }
}

/// Per-dispatch uniform of the emitted kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuFrame {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u32,
    pub max_depth: u32,
    /// 0 Whitted, 1 stochastic.
    pub mode: u32,
    pub seed_lo: u32,
    pub seed_hi: u32,
    pub _pad: u32,
    pub background: [f32; 4],
    /// `[ray_epsilon, shadow_epsilon, _, _]`
    pub epsilons: [f32; 4],
}

impl GpuFrame {
    pub fn new(config: &RenderConfig, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            samples_per_pixel: config.samples_per_pixel.max(1),
            max_depth: config.max_depth,
            mode: match config.shading.mode {
                ShadingMode::Whitted => 0,
                ShadingMode::Stochastic => 1,
            },
            seed_lo: config.seed as u32,
            seed_hi: (config.seed >> 32) as u32,
            _pad: 0,
            background: pack3(config.shading.background, 0.0),
            epsilons: [config.shading.ray_epsilon, config.shading.shadow_epsilon, 0.0, 0.0],
        }
    }
}

/// A host-generated primary ray.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuRay {
    pub origin: [f32; 4],
    pub direction: [f32; 4],
}

impl From<&Ray> for GpuRay {
    fn from(ray: &Ray) -> Self {
        Self {
            origin: pack3(ray.origin, 0.0),
            direction: pack3(ray.direction, 0.0),
        }
    }
}
