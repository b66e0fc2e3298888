//! WGSL emission and the host compiler seam.
//!
//! [`emit_wgsl`] writes a compute shader for one [`LayoutDescriptor`]: the
//! record kinds and kernel capacities as constants, one struct per record,
//! one storage binding per scene buffer, then the fixed trace kernel. The
//! kernel mirrors [`Interpreter`](crate::Interpreter) step for step but
//! draws random numbers from its own PCG stream, so device images agree
//! with the host only statistically.

use std::fmt::Write;

use lumen_renderer::{row_seed, Camera, RenderConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::error::{DeviceError, DeviceResult};
use crate::flatten::DeviceScene;
use crate::layout::*;
use crate::records::*;
use crate::sdf_program::*;

/// The trace kernel body. Expects the declarations written by
/// [`emit_wgsl`] ahead of it.
pub const TRACE_KERNEL: &str = include_str!("shaders/trace.wgsl");

/// WGSL declaration of one record: name, Rust size and fields.
struct RecordDecl {
    name: &'static str,
    size: usize,
    fields: &'static [(&'static str, &'static str)],
}

const U32: &str = "u32";
const F32: &str = "f32";
const VEC4: &str = "vec4<f32>";
const MAT4: &str = "mat4x4<f32>";

fn record_decls() -> [RecordDecl; 12] {
    use std::mem::size_of;
    [
        RecordDecl {
            name: "GpuHeader",
            size: size_of::<GpuHeader>(),
            fields: &[("root", U32), ("object_count", U32), ("light_count", U32), ("frame_depth", U32)],
        },
        RecordDecl {
            name: "GpuGeometry",
            size: size_of::<GpuGeometry>(),
            fields: &[
                ("kind", U32),
                ("sdf_start", U32),
                ("sdf_len", U32),
                ("max_steps", U32),
                ("params", "array<vec4<f32>, 3>"),
            ],
        },
        RecordDecl {
            name: "GpuSdfOp",
            size: size_of::<GpuSdfOp>(),
            fields: &[("op", U32), ("arg", U32), ("scalar", F32), ("pad0", U32), ("data", MAT4)],
        },
        RecordDecl {
            name: "GpuMaterial",
            size: size_of::<GpuMaterial>(),
            fields: &[
                ("kind", U32),
                ("color", U32),
                ("pad0", U32),
                ("pad1", U32),
                ("lobe", VEC4),
                ("extra", VEC4),
                ("emission", VEC4),
            ],
        },
        RecordDecl {
            name: "GpuColor",
            size: size_of::<GpuColor>(),
            fields: &[("kind", U32), ("a", U32), ("b", U32), ("pad0", U32), ("value", VEC4)],
        },
        RecordDecl {
            name: "GpuTexture",
            size: size_of::<GpuTexture>(),
            fields: &[("width", U32), ("height", U32), ("offset", U32), ("pad0", U32)],
        },
        RecordDecl {
            name: "GpuLight",
            size: size_of::<GpuLight>(),
            fields: &[
                ("kind", U32),
                ("shape", U32),
                ("samples", U32),
                ("pad0", U32),
                ("position", VEC4),
                ("color", VEC4),
                ("transform", MAT4),
            ],
        },
        RecordDecl {
            name: "GpuTransform",
            size: size_of::<GpuTransform>(),
            fields: &[
                ("matrix", MAT4),
                ("inverse", MAT4),
                ("invertible", U32),
                ("pad0", U32),
                ("pad1", U32),
                ("pad2", U32),
            ],
        },
        RecordDecl {
            name: "GpuObject",
            size: size_of::<GpuObject>(),
            fields: &[
                ("kind", U32),
                ("transform", U32),
                ("geometry", U32),
                ("material", U32),
                ("heap_start", U32),
                ("heap_len", U32),
                ("unbounded_start", U32),
                ("unbounded_len", U32),
                ("source", U32),
                ("pad0", U32),
                ("pad1", U32),
                ("pad2", U32),
            ],
        },
        RecordDecl {
            name: "GpuBvhNode",
            size: size_of::<GpuBvhNode>(),
            fields: &[
                ("aabb_min", VEC4),
                ("aabb_max", VEC4),
                ("item_start", U32),
                ("item_count", U32),
                ("kind", U32),
                ("pad0", U32),
            ],
        },
        RecordDecl {
            name: "GpuFrame",
            size: size_of::<GpuFrame>(),
            fields: &[
                ("width", U32),
                ("height", U32),
                ("samples_per_pixel", U32),
                ("max_depth", U32),
                ("mode", U32),
                ("seed_lo", U32),
                ("seed_hi", U32),
                ("pad0", U32),
                ("background", VEC4),
                ("epsilons", VEC4),
            ],
        },
        RecordDecl {
            name: "GpuRay",
            size: size_of::<GpuRay>(),
            fields: &[("origin", VEC4), ("direction", VEC4)],
        },
    ]
}

fn kind_constants() -> Vec<(&'static str, u32)> {
    vec![
        ("NONE", NONE),
        ("GEOMETRY_PLANE", GEOMETRY_PLANE),
        ("GEOMETRY_SQUARE", GEOMETRY_SQUARE),
        ("GEOMETRY_CIRCLE", GEOMETRY_CIRCLE),
        ("GEOMETRY_SPHERE", GEOMETRY_SPHERE),
        ("GEOMETRY_BOX", GEOMETRY_BOX),
        ("GEOMETRY_CYLINDER", GEOMETRY_CYLINDER),
        ("GEOMETRY_TRIANGLE", GEOMETRY_TRIANGLE),
        ("GEOMETRY_SDF", GEOMETRY_SDF),
        ("MATERIAL_SOLID", MATERIAL_SOLID),
        ("MATERIAL_TRANSPARENT", MATERIAL_TRANSPARENT),
        ("MATERIAL_PHONG", MATERIAL_PHONG),
        ("MATERIAL_FRESNEL", MATERIAL_FRESNEL),
        ("MATERIAL_PATH_TRACED", MATERIAL_PATH_TRACED),
        ("COLOR_SOLID", COLOR_SOLID),
        ("COLOR_SCALED", COLOR_SCALED),
        ("COLOR_CHECKER", COLOR_CHECKER),
        ("COLOR_TEXTURE", COLOR_TEXTURE),
        ("FILTER_NEAREST", FILTER_NEAREST),
        ("FILTER_BILINEAR", FILTER_BILINEAR),
        ("LIGHT_POINT", LIGHT_POINT),
        ("LIGHT_AREA", LIGHT_AREA),
        ("SHAPE_SQUARE", SHAPE_SQUARE),
        ("SHAPE_CIRCLE", SHAPE_CIRCLE),
        ("SHAPE_SPHERE", SHAPE_SPHERE),
        ("OBJECT_PRIMITIVE", OBJECT_PRIMITIVE),
        ("OBJECT_GROUP", OBJECT_GROUP),
        ("HEAP_ABSENT", HEAP_ABSENT),
        ("HEAP_INTERNAL", HEAP_INTERNAL),
        ("HEAP_LEAF", HEAP_LEAF),
        ("OP_SPHERE", OP_SPHERE),
        ("OP_BOX", OP_BOX),
        ("OP_PLANE", OP_PLANE),
        ("OP_TETRAHEDRON", OP_TETRAHEDRON),
        ("OP_UNION", OP_UNION),
        ("OP_INTERSECTION", OP_INTERSECTION),
        ("OP_DIFFERENCE", OP_DIFFERENCE),
        ("OP_ROUND", OP_ROUND),
        ("OP_PUSH_FRAME", OP_PUSH_FRAME),
        ("OP_MATRIX", OP_MATRIX),
        ("OP_REFLECT", OP_REFLECT),
        ("OP_REPEAT", OP_REPEAT),
        ("OP_POP_FRAME", OP_POP_FRAME),
    ]
}

/// Fixed array sizes of the kernel, from the layout's limits.
fn capacity_constants(limits: &DeviceLimits) -> [(&'static str, usize); 4] {
    [
        ("MAX_FRAME_DEPTH", limits.max_frame_depth.max(1)),
        ("SDF_STACK", limits.max_sdf_stack.clamp(1, SDF_STACK_CAPACITY)),
        ("COLOR_DEPTH", limits.max_color_depth.min(COLOR_STACK_CAPACITY)),
        ("MAX_WORK_ITEMS", limits.max_work_items.max(1)),
    ]
}

/// WGSL type bound at a scene buffer's binding.
fn binding_type(binding: u32) -> Option<&'static str> {
    let ty = match binding {
        BINDING_HEADER => "GpuHeader",
        BINDING_GEOMETRIES => "array<GpuGeometry>",
        BINDING_SDF_OPS => "array<GpuSdfOp>",
        BINDING_MATERIALS => "array<GpuMaterial>",
        BINDING_COLORS => "array<GpuColor>",
        BINDING_TEXTURES => "array<GpuTexture>",
        BINDING_TEXELS => "array<vec4<f32>>",
        BINDING_LIGHTS => "array<GpuLight>",
        BINDING_TRANSFORMS => "array<GpuTransform>",
        BINDING_OBJECTS => "array<GpuObject>",
        BINDING_ITEMS => "array<u32>",
        BINDING_HEAP => "array<GpuBvhNode>",
        _ => return None,
    };
    Some(ty)
}

/// Generate the complete compute shader for `layout`.
///
/// Scene buffers are read-only storage in bind group 0 at their layout
/// bindings. Bind group 1 holds the [`GpuFrame`] uniform, the primary rays
/// (`samples_per_pixel` consecutive rays per pixel, row-major) and the
/// output pixels. Entry point `main`, workgroup size 8x8.
pub fn emit_wgsl(layout: &LayoutDescriptor) -> String {
    let mut src = String::with_capacity(TRACE_KERNEL.len() + 8 * 1024);
    src.push_str("// Generated by lumen_device. Do not edit.\n\n");

    for (name, value) in kind_constants() {
        let _ = writeln!(src, "const {name}: u32 = {value}u;");
    }
    src.push('\n');
    for (name, value) in capacity_constants(&layout.limits) {
        let _ = writeln!(src, "const {name}: u32 = {value}u;");
    }
    src.push('\n');

    for record in record_decls() {
        let _ = writeln!(src, "// {} bytes", record.size);
        let _ = writeln!(src, "struct {} {{", record.name);
        for (field, ty) in record.fields {
            let _ = writeln!(src, "    {field}: {ty},");
        }
        src.push_str("}\n\n");
    }

    for buffer in &layout.buffers {
        match binding_type(buffer.binding) {
            Some(ty) => {
                let _ = writeln!(
                    src,
                    "@group(0) @binding({}) var<storage, read> {}: {};",
                    buffer.binding, buffer.name, ty
                );
            }
            None => log::warn!("Buffer '{}' has no kernel binding; skipped", buffer.name),
        }
    }
    let _ = writeln!(src, "@group(1) @binding({DISPATCH_FRAME}) var<uniform> frame: GpuFrame;");
    let _ = writeln!(src, "@group(1) @binding({DISPATCH_RAYS}) var<storage, read> rays: array<GpuRay>;");
    let _ = writeln!(
        src,
        "@group(1) @binding({DISPATCH_PIXELS}) var<storage, read_write> pixels: array<vec4<f32>>;"
    );
    src.push('\n');

    src.push_str(TRACE_KERNEL);
    src
}

/// Primary rays for a kernel dispatch: `samples_per_pixel` per pixel,
/// row-major, drawn with the same per-row seeds as the host renderer.
pub fn primary_rays(camera: &Camera, config: &RenderConfig) -> Vec<GpuRay> {
    let samples = config.samples_per_pixel.max(1);
    (0..camera.image_height)
        .into_par_iter()
        .flat_map_iter(|y| {
            let mut rng = StdRng::seed_from_u64(row_seed(config.seed, y));
            let mut row = Vec::with_capacity((camera.image_width * samples) as usize);
            for x in 0..camera.image_width {
                for _ in 0..samples {
                    row.push(GpuRay::from(&camera.get_ray(x, y, &mut rng)));
                }
            }
            row
        })
        .collect()
}

/// A host backend that turns emitted source into an executable program
/// and allocates its buffers.
pub trait DeviceCompiler {
    type Program;
    type Error: std::error::Error + Send + Sync + 'static;

    fn compile(&mut self, layout: &LayoutDescriptor, source: &str) -> Result<Self::Program, Self::Error>;
}

/// Emit the kernel for `scene` and hand it to `compiler`.
pub fn compile_scene<C: DeviceCompiler>(compiler: &mut C, scene: &DeviceScene) -> DeviceResult<C::Program> {
    let source = emit_wgsl(&scene.layout);
    log::info!(
        "Compiling device kernel: {} bytes of WGSL, {} bytes of scene buffers",
        source.len(),
        scene.byte_size()
    );
    compiler
        .compile(&scene.layout, &source)
        .map_err(|err| DeviceError::Compile(err.to_string()))
}
