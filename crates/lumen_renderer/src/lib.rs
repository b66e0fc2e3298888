//! Lumen Renderer - scene graph, spatial indices and shading.
//!
//! A [`World`] is an arena of objects forming a multi-parent DAG. Groups can
//! carry a private [`SpatialIndex`] (BVH or BSP) over their children. Rays
//! are answered by [`World::cast_ray`] and turned into radiance by
//! [`shading::trace`], either deterministically (Whitted) or by sampling one
//! branch per bounce.
//!
//! Transform edits take effect immediately: cached bounds are invalidated up
//! the graph and indices are refitted, never rebuilt.

pub mod accel;
pub mod camera;
pub mod renderer;
pub mod shading;
pub mod world;

pub use accel::{BspNode, BspTree, BvhNode, IndexKind, IndexParams, SpatialIndex};
pub use camera::{Camera, CameraSettings};
pub use renderer::{
    color_to_rgba, linear_to_gamma, render, render_pixel, row_seed, Accumulator, ImageBuffer, PixelSink,
    RenderConfig,
};
pub use shading::{scatter, shade, trace, Branch, Color, Interaction, Response, Scatter, ShadingConfig, ShadingMode};
pub use world::{NodeTransform, ObjectId, RayHit, Surface, TransformId, World, WorldObject};

/// Re-export math types from lumen_math
pub use lumen_math::{Aabb, Interval, Ray, Vec3};
