//! Error types for pixel validation
//!
//! Validation failures are rejected before admission control and are never
//! retried.

use thiserror::Error;

/// Reasons a pixel request is rejected before it reaches the pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("x coordinate must be between 0 and {max}")]
    XOutOfRange { max: u32 },

    #[error("y coordinate must be between 0 and {max}")]
    YOutOfRange { max: u32 },

    #[error("color must be in #RRGGBB format")]
    InvalidColor,

    #[error("userId is required")]
    MissingUserId,
}
