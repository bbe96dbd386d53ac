//! Error types for Atlas Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("Feature store error: {0}")]
    Store(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Insufficient correspondence points: {found} shared, {required} required")]
    InsufficientCorrespondence { found: usize, required: usize },

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type AtlasResult<T> = Result<T, AtlasError>;
