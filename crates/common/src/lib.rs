/// Common types and utilities for tile segmentation and label fusion
pub mod boundary;
pub mod dims;
pub mod stats;

use thiserror::Error;

pub use dims::{DimensionUtils, PhysicalSize, PhysicalUnit, TileAxis, TileDimensions};
pub use stats::{percentile, percentiles};

/// Intensity volume in canonical `(Z, Y, X)` order. 2D data has a Z extent of 1.
pub type Volume = ndarray::Array3<f32>;

/// Label volume in canonical `(Z, Y, X)` order. 0 is background.
pub type LabelVolume = ndarray::Array3<u32>;

/// Segmentation errors
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("Invalid dimension order: {0}")]
    InvalidDimensionOrder(String),

    #[error("Tile has no {0} axis")]
    MissingAxis(TileAxis),

    #[error("Tile rank mismatch: dimension order has {expected} axes, array has {actual}")]
    RankMismatch { expected: usize, actual: usize },

    #[error("Invalid tile selection: {0}")]
    InvalidSelection(String),

    #[error("Channel {channel} out of range (tile has {available} channels)")]
    ChannelOutOfRange { channel: usize, available: usize },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Label ID space exhausted: offset {offset} + label {label} exceeds u32")]
    LabelOverflow { offset: u32, label: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for segmentation operations
pub type Result<T> = std::result::Result<T, SegmentationError>;

/// Largest label in a volume, 0 for an empty or all-background volume
#[must_use]
pub fn max_label(labels: &LabelVolume) -> u32 {
    labels.iter().copied().max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_max_label() {
        let mut labels = Array3::<u32>::zeros((1, 3, 3));
        assert_eq!(max_label(&labels), 0);

        labels[[0, 1, 1]] = 7;
        labels[[0, 2, 0]] = 3;
        assert_eq!(max_label(&labels), 7);
    }

    #[test]
    fn test_error_messages() {
        let err = SegmentationError::ChannelOutOfRange {
            channel: 4,
            available: 2,
        };
        assert_eq!(err.to_string(), "Channel 4 out of range (tile has 2 channels)");

        let err = SegmentationError::MissingAxis(TileAxis::C);
        assert_eq!(err.to_string(), "Tile has no C axis");
    }
}
