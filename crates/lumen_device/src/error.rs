//! Error types for flattening and device compilation.

use lumen_core::SceneError;
use thiserror::Error;

/// Errors raised while flattening a scene or building a device program.
///
/// All of these are fatal at flatten time: a scene either fits the device
/// layout completely or is rejected before any render starts.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("world has no root object")]
    NoRoot,

    #[error("unsupported on device: {0}")]
    Unsupported(String),

    #[error("{what} needs {needed}, device limit is {limit}")]
    LimitExceeded {
        what: &'static str,
        needed: usize,
        limit: usize,
    },

    #[error("dangling {what} reference {index}")]
    DanglingReference { what: &'static str, index: u32 },

    #[error("device compiler failed: {0}")]
    Compile(String),

    #[error(transparent)]
    Scene(#[from] SceneError),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Fail with [`DeviceError::LimitExceeded`] when `needed > limit`.
pub(crate) fn check_limit(what: &'static str, needed: usize, limit: usize) -> DeviceResult<()> {
    if needed > limit {
        Err(DeviceError::LimitExceeded { what, needed, limit })
    } else {
        Ok(())
    }
}
