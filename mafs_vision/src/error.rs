//! Error types for the land-masking engine and its job queue.

use crate::core_modules::detection::DetectionError;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LandMaskError>;

/// Everything that can end a job in the `Failed` state, plus construction errors.
#[derive(Error, Debug)]
pub enum LandMaskError {
    #[error("could not decode input image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("input image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("raster size mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("detector failed: {0}")]
    Detection(#[from] DetectionError),

    #[error("job queue is closed")]
    QueueClosed,

    #[error("worker task aborted: {0}")]
    Worker(String),
}

impl LandMaskError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn worker<S: Into<String>>(msg: S) -> Self {
        Self::Worker(msg.into())
    }
}
