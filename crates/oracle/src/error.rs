//! Error types for model loading and evaluation

use cellfuse_common::SegmentationError;
use thiserror::Error;

/// Errors raised while loading or evaluating a segmentation model
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Invalid model input: {0}")]
    InvalidInput(String),

    #[error("Failed to load model {model}: {reason}")]
    Load { model: String, reason: String },

    #[error("Model {0} does not support this workflow")]
    Unsupported(String),

    #[error("Model output shape {actual:?} does not match input shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Model evaluation failed: {0}")]
    Evaluation(String),

    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
}

impl From<OracleError> for SegmentationError {
    fn from(err: OracleError) -> Self {
        SegmentationError::Other(err.to_string())
    }
}

/// Result type for oracle operations
pub type Result<T> = std::result::Result<T, OracleError>;
