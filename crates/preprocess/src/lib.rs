//! Channel compositing and intensity preprocessing for segmentation models
//!
//! Turns a selected tile region into the single intensity volume a model is
//! evaluated on:
//!
//! 1. **Compositing**: elementwise maximum over the model's channels
//! 2. **Thresholding**: absolute and percentile floor-and-shift
//! 3. **Filtering**: disk/ball median and gaussian smoothing
//! 4. **Normalization**: percentile rescale to [0, 1]
//!
//! It also converts physical cell diameters into pixels for the model.
//!
//! # Example
//! ```
//! use cellfuse_common::TileDimensions;
//! use cellfuse_preprocess::{ChannelStack, IntensityPreprocessor, IntensitySettings, TileSelection};
//! use ndarray::ArrayD;
//!
//! let tile = ArrayD::<f32>::zeros(vec![2, 16, 16]);
//! let dims = TileDimensions::from_order("CYX").unwrap();
//! let stack = ChannelStack::select(tile.view(), &dims, &TileSelection::full(tile.shape())).unwrap();
//!
//! let volume = stack.composite(&[0, 1]).unwrap().expect("channels selected");
//! let settings = IntensitySettings { normalise: Some(99.0), ..Default::default() };
//! let prepared = IntensityPreprocessor::new(settings).apply(volume, stack.is_volumetric());
//! assert_eq!(prepared.dim(), (1, 16, 16));
//! ```

pub mod composite;
pub mod filters;
pub mod intensity;
pub mod scale;

pub use composite::{composite_channels, ChannelStack, TileSelection};
pub use filters::{gaussian_filter, median_filter};
pub use intensity::{
    floor_shift, normalize_percentile, relative_floor_shift, IntensityPreprocessor,
    IntensitySettings, Normalization,
};
pub use scale::{diameter_to_pixels, pixel_size_um, tile_diameter_px};
