//! Lumen Device - a recursion-free, pointer-free form of a [`World`].
//!
//! [`flatten`] turns the object graph into integer-indexed `Pod` buffers
//! described by a [`LayoutDescriptor`]. Two backends share that layout:
//!
//! - [`Interpreter`]: runs the iterative traversal and work-list shading in
//!   process, with results identical to the recursive evaluator
//! - [`emit_wgsl`]: writes the same algorithm as a compute shader, handed to
//!   a host [`DeviceCompiler`]
//!
//! A flattened scene is a snapshot; [`DeviceScene::is_current`] tells when
//! an edit to the world requires flattening again.
//!
//! [`World`]: lumen_renderer::World

pub mod emit;
pub mod error;
pub mod flatten;
pub mod interpreter;
pub mod layout;
pub mod records;
pub mod sdf_program;

pub use emit::{compile_scene, emit_wgsl, primary_rays, DeviceCompiler, TRACE_KERNEL};
pub use error::{DeviceError, DeviceResult};
pub use flatten::{flatten, DeviceScene};
pub use interpreter::{DeviceHit, DeviceSurface, Interpreter};
pub use layout::{BufferLayout, DeviceLimits, LayoutDescriptor};
pub use sdf_program::{CompiledSdf, SdfProgram};
