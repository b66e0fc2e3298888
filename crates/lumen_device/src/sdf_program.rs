//! SDF expression trees compiled to postfix programs.
//!
//! Primitives push a distance, combinators pop their operands and push the
//! result, and a transform brackets its child between `PUSH_FRAME` and
//! `POP_FRAME`. Transformer steps in between rewrite the current point and
//! fold their distance factor into the frame; recursive transformers are
//! unrolled. Evaluation needs two fixed-size stacks and no recursion.

use bytemuck::Zeroable;
use lumen_core::sdf::{
    reflect_point, repeat_point, sdf_box, sdf_plane, sdf_sphere, sdf_tetrahedron, DistanceField,
};
use lumen_core::{SdfNode, Transformer};
use lumen_math::{Mat4, Vec3};

use crate::error::{check_limit, DeviceResult};
use crate::records::{pack3, unpack3, GpuSdfOp};

pub const OP_SPHERE: u32 = 0;
pub const OP_BOX: u32 = 1;
pub const OP_PLANE: u32 = 2;
pub const OP_TETRAHEDRON: u32 = 3;
pub const OP_UNION: u32 = 16;
pub const OP_INTERSECTION: u32 = 17;
pub const OP_DIFFERENCE: u32 = 18;
pub const OP_ROUND: u32 = 19;
pub const OP_PUSH_FRAME: u32 = 32;
pub const OP_MATRIX: u32 = 33;
pub const OP_REFLECT: u32 = 34;
pub const OP_REPEAT: u32 = 35;
pub const OP_POP_FRAME: u32 = 36;

/// Capacity of the evaluation stacks.
pub const SDF_STACK_CAPACITY: usize = 64;

/// A compiled program plus the stack depths it needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledSdf {
    pub ops: Vec<GpuSdfOp>,
    pub value_depth: usize,
    pub frame_depth: usize,
}

/// Compile `node`, rejecting programs longer than `max_ops` or needing
/// more than `max_stack` slots on either stack.
pub fn compile(node: &SdfNode, max_ops: usize, max_stack: usize) -> DeviceResult<CompiledSdf> {
    let mut out = CompiledSdf::default();
    let mut depth = Depth::default();
    emit_node(node, &mut out.ops, &mut depth, max_ops)?;
    out.value_depth = depth.value_max;
    out.frame_depth = depth.frame_max;

    let stack_limit = max_stack.min(SDF_STACK_CAPACITY);
    check_limit("SDF value stack", out.value_depth, stack_limit)?;
    check_limit("SDF frame stack", out.frame_depth, stack_limit)?;
    Ok(out)
}

#[derive(Default)]
struct Depth {
    value: usize,
    value_max: usize,
    frame: usize,
    frame_max: usize,
}

impl Depth {
    fn push_value(&mut self) {
        self.value += 1;
        self.value_max = self.value_max.max(self.value);
    }
}

fn op(code: u32) -> GpuSdfOp {
    GpuSdfOp {
        op: code,
        ..GpuSdfOp::zeroed()
    }
}

fn with_vector(code: u32, v: Vec3, w: f32) -> GpuSdfOp {
    let mut o = op(code);
    o.data[0] = pack3(v, w);
    o
}

fn push(ops: &mut Vec<GpuSdfOp>, o: GpuSdfOp, max_ops: usize) -> DeviceResult<()> {
    check_limit("SDF program length", ops.len() + 1, max_ops)?;
    ops.push(o);
    Ok(())
}

fn emit_node(node: &SdfNode, ops: &mut Vec<GpuSdfOp>, depth: &mut Depth, max_ops: usize) -> DeviceResult<()> {
    match node {
        SdfNode::Sphere { radius } => {
            let mut o = op(OP_SPHERE);
            o.scalar = *radius;
            push(ops, o, max_ops)?;
            depth.push_value();
        }
        SdfNode::Box { half_extents } => {
            push(ops, with_vector(OP_BOX, *half_extents, 0.0), max_ops)?;
            depth.push_value();
        }
        SdfNode::Plane { normal, delta } => {
            push(ops, with_vector(OP_PLANE, *normal, *delta), max_ops)?;
            depth.push_value();
        }
        SdfNode::Tetrahedron { size } => {
            let mut o = op(OP_TETRAHEDRON);
            o.scalar = *size;
            push(ops, o, max_ops)?;
            depth.push_value();
        }
        SdfNode::Union(children) | SdfNode::Intersection(children) => {
            for child in children {
                emit_node(child, ops, depth, max_ops)?;
            }
            let code = if matches!(node, SdfNode::Union(_)) {
                OP_UNION
            } else {
                OP_INTERSECTION
            };
            let mut o = op(code);
            o.arg = children.len() as u32;
            push(ops, o, max_ops)?;
            depth.value -= children.len();
            depth.push_value();
        }
        SdfNode::Difference { positive, negative } => {
            emit_node(positive, ops, depth, max_ops)?;
            emit_node(negative, ops, depth, max_ops)?;
            push(ops, op(OP_DIFFERENCE), max_ops)?;
            depth.value -= 1;
        }
        SdfNode::Round { child, radius } => {
            emit_node(child, ops, depth, max_ops)?;
            let mut o = op(OP_ROUND);
            o.scalar = *radius;
            push(ops, o, max_ops)?;
        }
        SdfNode::Transform { transformer, child } => {
            push(ops, op(OP_PUSH_FRAME), max_ops)?;
            depth.frame += 1;
            depth.frame_max = depth.frame_max.max(depth.frame);
            emit_steps(transformer, ops, max_ops)?;
            emit_node(child, ops, depth, max_ops)?;
            push(ops, op(OP_POP_FRAME), max_ops)?;
            depth.frame -= 1;
        }
    }
    Ok(())
}

fn emit_steps(transformer: &Transformer, ops: &mut Vec<GpuSdfOp>, max_ops: usize) -> DeviceResult<()> {
    match transformer {
        Transformer::Matrix { inverse, factor, .. } => {
            let mut o = op(OP_MATRIX);
            o.scalar = *factor;
            o.data = inverse.to_cols_array_2d();
            push(ops, o, max_ops)
        }
        Transformer::Sequence(steps) => {
            for step in steps {
                emit_steps(step, ops, max_ops)?;
            }
            Ok(())
        }
        Transformer::Recursive { inner, iterations } => {
            for _ in 0..*iterations {
                emit_steps(inner, ops, max_ops)?;
            }
            Ok(())
        }
        Transformer::Reflection { normal, delta } => push(ops, with_vector(OP_REFLECT, *normal, *delta), max_ops),
        Transformer::InfiniteRepetition { period } => push(ops, with_vector(OP_REPEAT, *period, 0.0), max_ops),
    }
}

/// Evaluate a program at `p`.
///
/// Programs produced by [`compile`] are well formed; a malformed slice
/// (stack underflow or overflow) evaluates to NaN, which sphere tracing
/// reports as a fault.
pub fn evaluate(ops: &[GpuSdfOp], p: Vec3) -> f32 {
    let mut values = [0.0f32; SDF_STACK_CAPACITY];
    let mut sp = 0usize;
    let mut frames = [(Vec3::ZERO, 1.0f32); SDF_STACK_CAPACITY];
    let mut fp = 0usize;
    let mut point = p;
    let mut factor = 1.0f32;

    for o in ops {
        match o.op {
            OP_SPHERE | OP_BOX | OP_PLANE | OP_TETRAHEDRON => {
                if sp == SDF_STACK_CAPACITY {
                    return f32::NAN;
                }
                values[sp] = match o.op {
                    OP_SPHERE => sdf_sphere(point, o.scalar),
                    OP_BOX => sdf_box(point, unpack3(&o.data[0])),
                    OP_PLANE => sdf_plane(point, unpack3(&o.data[0]), o.data[0][3]),
                    _ => sdf_tetrahedron(point, o.scalar),
                };
                sp += 1;
            }
            OP_UNION | OP_INTERSECTION => {
                let n = o.arg as usize;
                if n > sp || (n == 0 && sp == SDF_STACK_CAPACITY) {
                    return f32::NAN;
                }
                let operands = &values[sp - n..sp];
                let d = if o.op == OP_UNION {
                    operands.iter().fold(f32::INFINITY, |d, v| d.min(*v))
                } else {
                    operands.iter().fold(f32::NEG_INFINITY, |d, v| d.max(*v))
                };
                sp -= n;
                values[sp] = d;
                sp += 1;
            }
            OP_DIFFERENCE => {
                if sp < 2 {
                    return f32::NAN;
                }
                let negative = values[sp - 1];
                let positive = values[sp - 2];
                sp -= 1;
                values[sp - 1] = positive.max(-negative);
            }
            OP_ROUND => {
                if sp == 0 {
                    return f32::NAN;
                }
                values[sp - 1] -= o.scalar;
            }
            OP_PUSH_FRAME => {
                if fp == SDF_STACK_CAPACITY {
                    return f32::NAN;
                }
                frames[fp] = (point, factor);
                fp += 1;
                factor = 1.0;
            }
            OP_MATRIX => {
                point = Mat4::from_cols_array_2d(&o.data).transform_point3(point);
                factor *= o.scalar;
            }
            OP_REFLECT => point = reflect_point(point, unpack3(&o.data[0]), o.data[0][3]),
            OP_REPEAT => point = repeat_point(point, unpack3(&o.data[0])),
            OP_POP_FRAME => {
                if fp == 0 || sp == 0 {
                    return f32::NAN;
                }
                values[sp - 1] *= factor;
                fp -= 1;
                (point, factor) = frames[fp];
            }
            _ => return f32::NAN,
        }
    }

    if sp == 1 {
        values[0]
    } else {
        f32::NAN
    }
}

/// A program slice that can be sphere traced.
#[derive(Debug, Clone, Copy)]
pub struct SdfProgram<'a> {
    pub ops: &'a [GpuSdfOp],
}

impl DistanceField for SdfProgram<'_> {
    #[inline]
    fn distance(&self, p: Vec3) -> f32 {
        evaluate(self.ops, p)
    }
}
