//! Segmentation model adapter
//!
//! Models are opaque oracles turning a preprocessed intensity volume into an
//! instance label mask. This crate resolves model identifiers against a
//! [`ModelRegistry`], loads models through an injected [`OracleProvider`]
//! (cached per resolved source), and reports every failure as an
//! [`OracleOutcome::Failed`] instead of aborting the tile.
//!
//! # Features
//! - `onnx`: [`onnx::OnnxSegmenter`] and [`onnx::OnnxProvider`], running
//!   foreground models through ONNX Runtime
//!
//! # Example
//! ```
//! use cellfuse_common::{LabelVolume, Volume};
//! use cellfuse_oracle::{InMemoryProvider, ModelRegistry, OracleAdapter, OracleError};
//! use std::sync::Arc;
//!
//! let registry = ModelRegistry::new(["threshold"], "models");
//! let oracle = |image: &Volume, _: f32, _: bool| -> Result<LabelVolume, OracleError> {
//!     Ok(image.mapv(|v| u32::from(v > 0.5)))
//! };
//! let provider = InMemoryProvider::new().with_oracle(registry.resolve("threshold"), Arc::new(oracle));
//! let adapter = OracleAdapter::new(registry, Arc::new(provider));
//!
//! let image = Volume::from_elem((1, 8, 8), 0.9);
//! let mask = adapter
//!     .segment("threshold", &image, 10.0, false)
//!     .into_mask_or_empty("threshold", image.dim());
//! assert!(mask.iter().all(|&v| v == 1));
//! ```

pub mod adapter;
pub mod error;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod oracle;
pub mod registry;

pub use adapter::{OracleAdapter, OracleOutcome};
pub use error::{OracleError, Result};
pub use oracle::{
    CompartmentMasks, CompartmentOracle, InMemoryProvider, OracleProvider, SegmentationOracle,
};
pub use registry::{ModelRegistry, ModelSource};
