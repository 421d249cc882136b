//! Segmentation model interfaces

use crate::error::{OracleError, Result};
use crate::registry::ModelSource;
use cellfuse_common::{LabelVolume, Volume};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A model turning a preprocessed intensity volume into an instance mask.
///
/// The returned mask must have the shape of `image`. `diameter_px` is the
/// expected cell diameter in pixels along X.
pub trait SegmentationOracle: Send + Sync {
    fn evaluate(&self, image: &Volume, diameter_px: f32, is_volumetric: bool)
        -> Result<LabelVolume>;
}

impl<F> SegmentationOracle for F
where
    F: Fn(&Volume, f32, bool) -> Result<LabelVolume> + Send + Sync,
{
    fn evaluate(
        &self,
        image: &Volume,
        diameter_px: f32,
        is_volumetric: bool,
    ) -> Result<LabelVolume> {
        self(image, diameter_px, is_volumetric)
    }
}

/// Nucleus and whole-cell masks predicted from one tile
#[derive(Debug, Clone, PartialEq)]
pub struct CompartmentMasks {
    pub nuclear: LabelVolume,
    pub whole_cell: LabelVolume,
}

impl CompartmentMasks {
    pub fn empty(shape: (usize, usize, usize)) -> Self {
        Self {
            nuclear: LabelVolume::zeros(shape),
            whole_cell: LabelVolume::zeros(shape),
        }
    }
}

/// A model predicting nucleus and whole-cell instances from a nuclear and a
/// whole-cell intensity volume.
///
/// `pixel_size_um` is the X pixel size in micrometers.
pub trait CompartmentOracle: Send + Sync {
    fn evaluate(
        &self,
        nuclear: &Volume,
        whole_cell: &Volume,
        pixel_size_um: f64,
    ) -> Result<CompartmentMasks>;
}

/// Loads oracles for resolved model sources
pub trait OracleProvider: Send + Sync {
    fn load(&self, source: &ModelSource) -> Result<Arc<dyn SegmentationOracle>>;

    fn load_compartment(&self, source: &ModelSource) -> Result<Arc<dyn CompartmentOracle>> {
        Err(OracleError::Unsupported(source.to_string()))
    }
}

/// Provider serving oracles registered in-process
#[derive(Default)]
pub struct InMemoryProvider {
    oracles: HashMap<ModelSource, Arc<dyn SegmentationOracle>>,
    compartment_oracles: HashMap<ModelSource, Arc<dyn CompartmentOracle>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a segmentation oracle for `source`
    pub fn register(&mut self, source: ModelSource, oracle: Arc<dyn SegmentationOracle>) {
        info!("Registering model: {}", source);
        self.oracles.insert(source, oracle);
    }

    /// Register a compartment oracle for `source`
    pub fn register_compartment(&mut self, source: ModelSource, oracle: Arc<dyn CompartmentOracle>) {
        info!("Registering compartment model: {}", source);
        self.compartment_oracles.insert(source, oracle);
    }

    pub fn with_oracle(mut self, source: ModelSource, oracle: Arc<dyn SegmentationOracle>) -> Self {
        self.register(source, oracle);
        self
    }

    pub fn with_compartment_oracle(
        mut self,
        source: ModelSource,
        oracle: Arc<dyn CompartmentOracle>,
    ) -> Self {
        self.register_compartment(source, oracle);
        self
    }
}

impl OracleProvider for InMemoryProvider {
    fn load(&self, source: &ModelSource) -> Result<Arc<dyn SegmentationOracle>> {
        self.oracles
            .get(source)
            .cloned()
            .ok_or_else(|| OracleError::Load {
                model: source.to_string(),
                reason: "model not registered".to_string(),
            })
    }

    fn load_compartment(&self, source: &ModelSource) -> Result<Arc<dyn CompartmentOracle>> {
        self.compartment_oracles
            .get(source)
            .cloned()
            .ok_or_else(|| OracleError::Load {
                model: source.to_string(),
                reason: "compartment model not registered".to_string(),
            })
    }
}
