//! Multi-model segmentation fusion
//!
//! Runs every configured model on a tile selection and fuses the results
//! into one label volume with globally unique instance IDs.
//!
//! Per model: channel compositing, intensity preprocessing, model
//! invocation through the oracle adapter and optional fragment merging.
//! Masks are then merged in configuration order. The dual-compartment
//! workflow reconciles each model's nucleus and whole-cell masks onto shared
//! IDs before merging the pairs.
//!
//! # Example
//! ```
//! use cellfuse_common::{LabelVolume, TileDimensions, Volume};
//! use cellfuse_oracle::{InMemoryProvider, OracleError};
//! use cellfuse_pipeline::{PipelineConfig, PredictSlice, SegmentationPipeline, TileSelection};
//! use ndarray::ArrayD;
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::from_yaml(
//!     "registry:\n  known_models: [bright]\nmodels:\n  - model: bright\n    cell_channels: [0]\n    cell_diameter: 10.0\n",
//! )?;
//! let bright = |image: &Volume, _: f32, _: bool| -> Result<LabelVolume, OracleError> {
//!     Ok(image.mapv(|v| u32::from(v > 0.5)))
//! };
//! let provider = InMemoryProvider::new().with_oracle(config.registry.resolve("bright"), Arc::new(bright));
//! let pipeline = SegmentationPipeline::from_config(&config, Arc::new(provider));
//!
//! let mut tile = ArrayD::<f32>::zeros(vec![1, 8, 8]);
//! tile[[0, 2, 2]] = 1.0;
//! let dims = TileDimensions::from_order("CYX")?;
//! let labels = pipeline.predict_slice(tile.view(), &dims, &TileSelection::full(tile.shape()))?;
//! assert_eq!(labels.base[[0, 2, 2]], 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod pipeline;
pub mod report;

pub use cellfuse_preprocess::TileSelection;
pub use config::{CompartmentModelConfig, ConfigError, ModelConfig, PipelineConfig};
pub use pipeline::{CompartmentPipeline, PredictSlice, SegmentationPipeline, SliceLabels};
pub use report::{ModelReport, ModelStatus, SliceReport};
