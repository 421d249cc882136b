//! Intensity preprocessing ahead of model inference
//!
//! Steps run in a fixed order: absolute threshold, relative (percentile)
//! threshold, median filter, gaussian filter, percentile normalization.
//! Every step is optional; an unset or non-positive setting skips it.

use crate::filters::{gaussian_filter, median_filter};
use cellfuse_common::{percentile, percentiles, Volume};
use ndarray::{Array, Dimension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Intensity preprocessing settings for one model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntensitySettings {
    /// Absolute intensity floor subtracted from the volume
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Percentile (0-100) whose value is used as intensity floor
    #[serde(default)]
    pub rel_threshold: Option<f64>,
    /// Radius of the disk/ball median filter
    #[serde(default)]
    pub median_filter: Option<u32>,
    /// Gaussian sigma in pixels
    #[serde(default)]
    pub gaussian_filter: Option<f32>,
    /// Upper percentile for normalization; the lower bound is `100 - p`
    #[serde(default)]
    pub normalise: Option<f64>,
}

/// Outcome of percentile normalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// Rescaled with the given bounds
    Applied { low: f32, high: f32 },
    /// Bounds coincide; the volume was zeroed
    Degenerate { value: f32 },
    /// Nothing to normalize
    Empty,
}

/// Clamp values below `threshold` to it, then subtract it.
///
/// Afterwards no value is negative and values above the threshold keep
/// their order, shifted by the constant.
pub fn floor_shift<D: Dimension>(volume: &mut Array<f32, D>, threshold: f32) {
    volume.mapv_inplace(|v| v.max(threshold) - threshold);
}

/// Floor-and-shift with the value of percentile `q`. Returns the computed floor.
pub fn relative_floor_shift<D: Dimension>(volume: &mut Array<f32, D>, q: f64) -> Option<f32> {
    let floor = percentile(volume.iter(), q)?;
    floor_shift(volume, floor);
    Some(floor)
}

/// Rescale to [0, 1] between the `100 - q` and `q` percentiles, clipping
/// values outside.
///
/// When both percentiles coincide there is no dynamic range to rescale and
/// the volume is set to zero.
pub fn normalize_percentile<D: Dimension>(volume: &mut Array<f32, D>, q: f64) -> Normalization {
    let Some(bounds) = percentiles(volume.iter(), &[q, 100.0 - q]) else {
        return Normalization::Empty;
    };
    let (high, low) = (bounds[0], bounds[1]);
    let range = high - low;

    if range.abs() <= f32::EPSILON * high.abs().max(low.abs()).max(1.0) {
        volume.fill(0.0);
        return Normalization::Degenerate { value: high };
    }

    volume.mapv_inplace(|v| ((v - low) / range).clamp(0.0, 1.0));
    Normalization::Applied { low, high }
}

/// Applies [`IntensitySettings`] to composited volumes
#[derive(Debug, Clone, Default)]
pub struct IntensityPreprocessor {
    settings: IntensitySettings,
}

impl IntensityPreprocessor {
    #[must_use]
    pub fn new(settings: IntensitySettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &IntensitySettings {
        &self.settings
    }

    /// Run all configured steps on `volume`
    #[must_use]
    pub fn apply(&self, mut volume: Volume, volumetric: bool) -> Volume {
        let s = &self.settings;

        if let Some(threshold) = s.threshold.filter(|t| *t > 0.0) {
            floor_shift(&mut volume, threshold);
            debug!("Applied absolute threshold {}", threshold);
        }

        if let Some(q) = s.rel_threshold.filter(|q| *q > 0.0) {
            if let Some(floor) = relative_floor_shift(&mut volume, q) {
                debug!("Applied relative threshold p{} = {}", q, floor);
            }
        }

        if let Some(radius) = s.median_filter.filter(|r| *r > 0) {
            volume = median_filter(&volume, radius, volumetric);
            debug!("Applied median filter (radius {})", radius);
        }

        volume = gaussian_filter(&volume, s.gaussian_filter.unwrap_or(0.0), volumetric);

        if let Some(q) = s.normalise.filter(|q| *q > 0.0) {
            match normalize_percentile(&mut volume, q) {
                Normalization::Applied { low, high } => {
                    debug!("Normalized to p{} range [{}, {}]", q, low, high);
                }
                Normalization::Degenerate { value } => {
                    warn!(
                        "Percentile normalization has no dynamic range (p{} == p{} == {}), volume zeroed",
                        q,
                        100.0 - q,
                        value
                    );
                }
                Normalization::Empty => {}
            }
        }

        volume
    }
}
