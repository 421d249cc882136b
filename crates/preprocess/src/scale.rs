//! Physical diameter to pixel conversion

use cellfuse_common::{DimensionUtils, PhysicalSize, TileAxis};
use tracing::warn;

/// Convert a cell diameter given in micrometers into pixels along X.
///
/// Pixel sizes in millimeters (or nanometers) are converted to micrometers
/// first. A missing or non-positive pixel size leaves the diameter as is.
#[must_use]
pub fn diameter_to_pixels(diameter: f32, pixel_size: Option<PhysicalSize>) -> f32 {
    match pixel_size.map(|size| size.in_micrometers()) {
        Some(um_per_px) if um_per_px > 0.0 && um_per_px.is_finite() => {
            (f64::from(diameter) / um_per_px) as f32
        }
        _ => {
            warn!(
                "No usable physical pixel size along X, using diameter {} as pixels",
                diameter
            );
            diameter
        }
    }
}

/// [`diameter_to_pixels`] with the X pixel size of the current tile
#[must_use]
pub fn tile_diameter_px(diameter: f32, dims: &dyn DimensionUtils) -> f32 {
    diameter_to_pixels(diameter, dims.physical_size(TileAxis::X))
}

/// X pixel size of the tile in micrometers, 1.0 when unknown
#[must_use]
pub fn pixel_size_um(dims: &dyn DimensionUtils) -> f64 {
    match dims.physical_size(TileAxis::X).map(|size| size.in_micrometers()) {
        Some(um_per_px) if um_per_px > 0.0 && um_per_px.is_finite() => um_per_px,
        _ => {
            warn!("No usable physical pixel size along X, assuming 1 um per pixel");
            1.0
        }
    }
}
