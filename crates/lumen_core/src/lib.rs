//! Lumen Core - shapes, signed distance fields, materials and lights.
//!
//! Everything here is an immutable value built at scene-construction time
//! and shared between scene nodes through `Arc`:
//!
//! - **Geometry**: closed-form intersection kernels in a local unit frame
//! - **SDF**: CSG expression trees traced by sphere tracing
//! - **Materials**: Phong family plus unlit and transparent surfaces
//! - **Lights**: point and sampled area lights
//!
//! # Example
//!
//! ```
//! use lumen_core::Geometry;
//! use lumen_math::{Ray, Vec3};
//!
//! let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
//! let t = Geometry::Sphere.intersect(&ray, 0.001, f32::INFINITY);
//! assert!(t.is_some());
//! ```

pub mod brdf;
pub mod error;
pub mod geometry;
pub mod light;
pub mod material;
pub mod sampling;
pub mod sdf;
pub mod texture;

// Re-export commonly used types
pub use error::{SceneError, SceneResult, SdfError, SdfResult};
pub use geometry::{Geometry, SdfGeometry, SurfaceData};
pub use light::{AreaShape, Light, LightSample};
pub use material::{Material, MaterialColor, PhongLobe, PhongParams};
pub use sdf::{SdfNode, TraceSettings, Transformer};
pub use texture::{Texture, TextureError, TextureFilter, TextureResult};
