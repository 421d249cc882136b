//! Per-slice segmentation across all configured models

use crate::config::{CompartmentModelConfig, ModelConfig, PipelineConfig};
use crate::report::{ModelStatus, SliceReport};
use cellfuse_common::{max_label, DimensionUtils, LabelVolume, Result};
use cellfuse_labels::{merge_label_masks, merge_label_pairs, reconcile, LabelPostProcessor};
use cellfuse_oracle::{CompartmentMasks, OracleAdapter, OracleOutcome, OracleProvider};
use cellfuse_preprocess::{
    pixel_size_um, tile_diameter_px, ChannelStack, IntensityPreprocessor, IntensitySettings,
    TileSelection,
};
use ndarray::{ArrayD, ArrayViewD, Axis};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Labels predicted for one tile selection, in `(Z, Y, X)` order
#[derive(Debug, Clone, PartialEq)]
pub struct SliceLabels {
    /// Merged cell (whole-cell) labels
    pub base: LabelVolume,
    /// Nucleus labels sharing IDs with `base`, dual-compartment runs only
    pub nuc: Option<LabelVolume>,
}

impl SliceLabels {
    /// Labels with all unit axes removed
    pub fn squeezed(self) -> (ArrayD<u32>, Option<ArrayD<u32>>) {
        (squeeze(self.base), self.nuc.map(squeeze))
    }
}

fn squeeze(labels: LabelVolume) -> ArrayD<u32> {
    let mut out = labels.into_dyn();
    for axis in (0..out.ndim()).rev() {
        if out.len_of(Axis(axis)) == 1 {
            out = out.index_axis_move(Axis(axis), 0);
        }
    }
    out
}

/// Slice-level prediction shared by both workflows
pub trait PredictSlice: Sync {
    /// Predict labels for `selection` of `tile`, with a run summary
    fn predict_slice_with_report(
        &self,
        tile: ArrayViewD<'_, f32>,
        dims: &dyn DimensionUtils,
        selection: &TileSelection,
    ) -> Result<(SliceLabels, SliceReport)>;

    /// Predict labels for `selection` of `tile`.
    ///
    /// Model failures are logged and contribute empty masks; malformed input
    /// is an error.
    fn predict_slice(
        &self,
        tile: ArrayViewD<'_, f32>,
        dims: &dyn DimensionUtils,
        selection: &TileSelection,
    ) -> Result<SliceLabels> {
        self.predict_slice_with_report(tile, dims, selection)
            .map(|(labels, _)| labels)
    }

    /// Predict many selections of one tile in parallel. Results keep the
    /// order of `selections`.
    fn predict_slices(
        &self,
        tile: ArrayViewD<'_, f32>,
        dims: &dyn DimensionUtils,
        selections: &[TileSelection],
    ) -> Vec<Result<SliceLabels>> {
        info!("Predicting {} selections in parallel", selections.len());
        selections
            .par_iter()
            .map(|selection| self.predict_slice(tile.view(), dims, selection))
            .collect()
    }
}

/// Single-compartment workflow: every model yields one mask, masks are merged
/// into one label space
pub struct SegmentationPipeline {
    models: Vec<ModelConfig>,
    adapter: Arc<OracleAdapter>,
}

impl SegmentationPipeline {
    pub fn new(models: Vec<ModelConfig>, adapter: Arc<OracleAdapter>) -> Self {
        Self { models, adapter }
    }

    pub fn from_config(config: &PipelineConfig, provider: Arc<dyn OracleProvider>) -> Self {
        let adapter = OracleAdapter::new(config.registry.clone(), provider);
        Self::new(config.models.clone(), Arc::new(adapter))
    }

    pub fn models(&self) -> &[ModelConfig] {
        &self.models
    }

    pub fn adapter(&self) -> &Arc<OracleAdapter> {
        &self.adapter
    }

    fn run_model(
        &self,
        model: &ModelConfig,
        stack: &ChannelStack<'_>,
        dims: &dyn DimensionUtils,
    ) -> Result<(Option<LabelVolume>, ModelStatus)> {
        let Some(volume) = stack.composite(&model.cell_channels)? else {
            debug!("Model {} has no channels configured, skipping", model.model);
            return Ok((None, ModelStatus::Skipped));
        };

        let volumetric = stack.is_volumetric();
        let prepared = IntensityPreprocessor::new(model.intensity.clone()).apply(volume, volumetric);
        let diameter_px = tile_diameter_px(model.cell_diameter, dims);

        let outcome = self
            .adapter
            .segment(&model.model, &prepared, diameter_px, volumetric);
        let status = match &outcome {
            OracleOutcome::Failed { reason } => ModelStatus::Failed {
                reason: reason.clone(),
            },
            OracleOutcome::Mask(_) => ModelStatus::Segmented { instances: 0 },
        };

        let mut mask = outcome.into_mask_or_empty(&model.model, stack.spatial_shape());
        if model.merge_labels {
            mask = LabelPostProcessor::new(model.post).merge_fragments(&mask, volumetric);
        }

        let status = match status {
            ModelStatus::Segmented { .. } => ModelStatus::Segmented {
                instances: max_label(&mask),
            },
            other => other,
        };
        Ok((Some(mask), status))
    }
}

impl PredictSlice for SegmentationPipeline {
    fn predict_slice_with_report(
        &self,
        tile: ArrayViewD<'_, f32>,
        dims: &dyn DimensionUtils,
        selection: &TileSelection,
    ) -> Result<(SliceLabels, SliceReport)> {
        let stack = ChannelStack::select(tile, dims, selection)?;
        let shape = stack.spatial_shape();

        let mut report = SliceReport::default();
        let mut masks = Vec::with_capacity(self.models.len());
        for model in &self.models {
            let (mask, status) = self.run_model(model, &stack, dims)?;
            report.record(&model.model, status);
            masks.extend(mask);
        }

        let base = merge_label_masks(shape, &masks)?;
        report.max_label = max_label(&base);
        debug!(
            "Slice {:?}: {} models, max label {}",
            shape,
            masks.len(),
            report.max_label
        );

        Ok((SliceLabels { base, nuc: None }, report))
    }
}

/// Dual-compartment workflow: every model yields a nucleus and a whole-cell
/// mask, reconciled onto shared IDs before merging
pub struct CompartmentPipeline {
    models: Vec<CompartmentModelConfig>,
    adapter: Arc<OracleAdapter>,
}

impl CompartmentPipeline {
    pub fn new(models: Vec<CompartmentModelConfig>, adapter: Arc<OracleAdapter>) -> Self {
        Self { models, adapter }
    }

    pub fn from_config(config: &PipelineConfig, provider: Arc<dyn OracleProvider>) -> Self {
        let adapter = OracleAdapter::new(config.registry.clone(), provider);
        Self::new(config.compartment_models.clone(), Arc::new(adapter))
    }

    pub fn models(&self) -> &[CompartmentModelConfig] {
        &self.models
    }
}

impl PredictSlice for CompartmentPipeline {
    fn predict_slice_with_report(
        &self,
        tile: ArrayViewD<'_, f32>,
        dims: &dyn DimensionUtils,
        selection: &TileSelection,
    ) -> Result<(SliceLabels, SliceReport)> {
        let stack = ChannelStack::select(tile, dims, selection)?;
        let shape = stack.spatial_shape();
        let volumetric = stack.is_volumetric();
        let pixel_size = pixel_size_um(dims);

        let mut report = SliceReport::default();
        let mut pairs = Vec::with_capacity(self.models.len());
        for model in &self.models {
            let nuclear = stack.composite(&model.nucleus_channels)?;
            let whole_cell = stack.composite(&model.cyto_channels)?;
            let (Some(nuclear), Some(whole_cell)) = (nuclear, whole_cell) else {
                debug!("Model {} is missing compartment channels, skipping", model.model);
                report.record(&model.model, ModelStatus::Skipped);
                continue;
            };

            let normalizer = IntensityPreprocessor::new(IntensitySettings {
                normalise: model.normalise_percentile,
                ..Default::default()
            });
            let nuclear = normalizer.apply(nuclear, volumetric);
            let whole_cell = normalizer.apply(whole_cell, volumetric);

            let outcome =
                self.adapter
                    .segment_compartments(&model.model, &nuclear, &whole_cell, pixel_size);
            let failure = match &outcome {
                OracleOutcome::Failed { reason } => Some(reason.clone()),
                OracleOutcome::Mask(_) => None,
            };
            let masks = outcome.or_empty_with(&model.model, || CompartmentMasks::empty(shape));

            let pair = reconcile(&masks.nuclear, &masks.whole_cell)?;
            let status = match failure {
                Some(reason) => ModelStatus::Failed { reason },
                None => ModelStatus::Segmented {
                    instances: max_label(&pair.cytoplasm),
                },
            };
            report.record(&model.model, status);
            pairs.push(pair);
        }

        let (nuc, base) = merge_label_pairs(
            shape,
            pairs.iter().map(|pair| (&pair.nucleus, &pair.cytoplasm)),
        )?;
        report.max_label = max_label(&base);

        Ok((
            SliceLabels {
                base,
                nuc: Some(nuc),
            },
            report,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squeeze_2d_labels() {
        let labels = SliceLabels {
            base: LabelVolume::zeros((1, 4, 5)),
            nuc: Some(LabelVolume::zeros((1, 4, 5))),
        };
        let (base, nuc) = labels.squeezed();
        assert_eq!(base.shape(), &[4, 5]);
        assert_eq!(nuc.unwrap().shape(), &[4, 5]);
    }

    #[test]
    fn test_squeeze_keeps_volumes() {
        let labels = SliceLabels {
            base: LabelVolume::zeros((3, 1, 5)),
            nuc: None,
        };
        let (base, nuc) = labels.squeezed();
        assert_eq!(base.shape(), &[3, 5]);
        assert!(nuc.is_none());
    }
}
