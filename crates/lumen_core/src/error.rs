//! Error types for scene construction and SDF evaluation.

use thiserror::Error;

/// Errors raised while evaluating or building signed distance fields.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SdfError {
    /// The field returned NaN for a finite query point. This means the SDF
    /// graph itself is malformed; the ray is abandoned.
    #[error("SDF evaluation produced NaN at ray parameter {t}")]
    NanDistance { t: f32 },

    #[error("SDF transform matrix is not invertible")]
    DegenerateTransform,

    #[error("recursive transformer requests {requested} iterations (limit {limit})")]
    TooManyIterations { requested: u32, limit: u32 },
}

pub type SdfResult<T> = Result<T, SdfError>;

/// Errors raised by scene-building code.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("unknown object handle {0}")]
    InvalidObject(u32),

    #[error("unknown transform handle {0}")]
    InvalidTransform(u32),

    #[error("object {0} is not a primitive")]
    NotAPrimitive(u32),

    #[error("transform matrix is not finite")]
    NonFiniteTransform,

    #[error(transparent)]
    Sdf(#[from] SdfError),

    #[error(transparent)]
    Texture(#[from] crate::texture::TextureError),
}

pub type SceneResult<T> = Result<T, SceneError>;
