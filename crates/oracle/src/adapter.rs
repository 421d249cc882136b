//! Model resolution, caching and failure containment
//!
//! The adapter resolves model identifiers through the [`ModelRegistry`],
//! loads each resolved model once through its [`OracleProvider`], and turns
//! every load or evaluation failure into [`OracleOutcome::Failed`] so a tile
//! run can carry on with an empty mask.

use crate::error::{OracleError, Result};
use crate::oracle::{CompartmentMasks, CompartmentOracle, OracleProvider, SegmentationOracle};
use crate::registry::{ModelRegistry, ModelSource};
use cellfuse_common::{LabelVolume, Volume};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Result of one model invocation
#[derive(Debug, Clone, PartialEq)]
pub enum OracleOutcome<T = LabelVolume> {
    Mask(T),
    Failed { reason: String },
}

impl<T> OracleOutcome<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, OracleOutcome::Failed { .. })
    }

    pub fn into_mask(self) -> Option<T> {
        match self {
            OracleOutcome::Mask(mask) => Some(mask),
            OracleOutcome::Failed { .. } => None,
        }
    }

    /// The mask, or `empty()` with a warning when the model failed
    pub fn or_empty_with<F>(self, model_id: &str, empty: F) -> T
    where
        F: FnOnce() -> T,
    {
        match self {
            OracleOutcome::Mask(mask) => mask,
            OracleOutcome::Failed { reason } => {
                warn!(
                    "Segmentation with model {} failed, using empty mask: {}",
                    model_id, reason
                );
                empty()
            }
        }
    }
}

impl OracleOutcome<LabelVolume> {
    pub fn into_mask_or_empty(self, model_id: &str, shape: (usize, usize, usize)) -> LabelVolume {
        self.or_empty_with(model_id, || LabelVolume::zeros(shape))
    }
}

impl<T> From<Result<T>> for OracleOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(mask) => OracleOutcome::Mask(mask),
            Err(err) => OracleOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }
}

type Cache<O> = Mutex<HashMap<ModelSource, Arc<O>>>;

/// Resolves, caches and invokes segmentation models
pub struct OracleAdapter {
    registry: ModelRegistry,
    provider: Arc<dyn OracleProvider>,
    oracles: Cache<dyn SegmentationOracle>,
    compartment_oracles: Cache<dyn CompartmentOracle>,
}

impl OracleAdapter {
    pub fn new(registry: ModelRegistry, provider: Arc<dyn OracleProvider>) -> Self {
        Self {
            registry,
            provider,
            oracles: Mutex::new(HashMap::new()),
            compartment_oracles: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn resolve(&self, model_id: &str) -> ModelSource {
        self.registry.resolve(model_id)
    }

    /// Number of models loaded so far
    pub fn cached_models(&self) -> usize {
        let segmenters = self.oracles.lock().map(|m| m.len()).unwrap_or(0);
        let compartments = self
            .compartment_oracles
            .lock()
            .map(|m| m.len())
            .unwrap_or(0);
        segmenters + compartments
    }

    /// Run the model `model_id` on `image`
    pub fn segment(
        &self,
        model_id: &str,
        image: &Volume,
        diameter_px: f32,
        is_volumetric: bool,
    ) -> OracleOutcome {
        let result = self.try_segment(model_id, image, diameter_px, is_volumetric);
        if let Err(err) = &result {
            debug!("Model {} returned an error: {:?}", model_id, err);
        }
        result.into()
    }

    fn try_segment(
        &self,
        model_id: &str,
        image: &Volume,
        diameter_px: f32,
        is_volumetric: bool,
    ) -> Result<LabelVolume> {
        if !diameter_px.is_finite() || diameter_px <= 0.0 {
            return Err(OracleError::InvalidInput(format!(
                "cell diameter must be a positive number of pixels, got {}",
                diameter_px
            )));
        }

        let source = self.resolve(model_id);
        let oracle = load_cached(&self.oracles, &source, |s| self.provider.load(s))?;

        debug!(
            "Evaluating {} on {:?} (diameter {:.1} px, volumetric: {})",
            source,
            image.dim(),
            diameter_px,
            is_volumetric
        );
        let mask = oracle.evaluate(image, diameter_px, is_volumetric)?;
        check_shape(image.dim(), &mask)?;
        Ok(mask)
    }

    /// Run the compartment model `model_id` on a nuclear/whole-cell pair
    pub fn segment_compartments(
        &self,
        model_id: &str,
        nuclear: &Volume,
        whole_cell: &Volume,
        pixel_size_um: f64,
    ) -> OracleOutcome<CompartmentMasks> {
        self.try_segment_compartments(model_id, nuclear, whole_cell, pixel_size_um)
            .into()
    }

    fn try_segment_compartments(
        &self,
        model_id: &str,
        nuclear: &Volume,
        whole_cell: &Volume,
        pixel_size_um: f64,
    ) -> Result<CompartmentMasks> {
        if nuclear.dim() != whole_cell.dim() {
            return Err(OracleError::InvalidInput(format!(
                "nuclear volume {:?} and whole-cell volume {:?} differ in shape",
                nuclear.dim(),
                whole_cell.dim()
            )));
        }
        if !pixel_size_um.is_finite() || pixel_size_um <= 0.0 {
            return Err(OracleError::InvalidInput(format!(
                "pixel size must be positive, got {}",
                pixel_size_um
            )));
        }

        let source = self.resolve(model_id);
        let oracle = load_cached(&self.compartment_oracles, &source, |s| {
            self.provider.load_compartment(s)
        })?;

        let masks = oracle.evaluate(nuclear, whole_cell, pixel_size_um)?;
        check_shape(nuclear.dim(), &masks.nuclear)?;
        check_shape(nuclear.dim(), &masks.whole_cell)?;
        Ok(masks)
    }
}

/// Fetch a loaded oracle or load and cache it. Failed loads are not cached.
fn load_cached<O, F>(cache: &Cache<O>, source: &ModelSource, load: F) -> Result<Arc<O>>
where
    O: ?Sized,
    F: FnOnce(&ModelSource) -> Result<Arc<O>>,
{
    let mut models = cache.lock().map_err(|e| OracleError::Load {
        model: source.to_string(),
        reason: format!("model cache lock poisoned: {}", e),
    })?;

    if let Some(oracle) = models.get(source) {
        return Ok(Arc::clone(oracle));
    }

    info!("Loading model {} (first time only)", source);
    let oracle = load(source)?;
    models.insert(source.clone(), Arc::clone(&oracle));
    Ok(oracle)
}

fn check_shape(expected: (usize, usize, usize), mask: &LabelVolume) -> Result<()> {
    if mask.dim() != expected {
        return Err(OracleError::ShapeMismatch {
            expected: vec![expected.0, expected.1, expected.2],
            actual: mask.shape().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::InMemoryProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        loads: AtomicUsize,
    }

    impl OracleProvider for CountingProvider {
        fn load(&self, _source: &ModelSource) -> Result<Arc<dyn SegmentationOracle>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(
                |image: &Volume, _: f32, _: bool| -> Result<LabelVolume> {
                    Ok(image.mapv(|v| u32::from(v > 0.0)))
                },
            ))
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new(["cyto"], "models")
    }

    #[test]
    fn test_models_are_loaded_once() {
        let provider = Arc::new(CountingProvider {
            loads: AtomicUsize::new(0),
        });
        let adapter = OracleAdapter::new(registry(), provider.clone());
        let image = Volume::ones((1, 4, 4));

        for _ in 0..3 {
            let outcome = adapter.segment("cyto", &image, 12.0, false);
            assert!(!outcome.is_failed());
        }
        adapter.segment("custom_model", &image, 12.0, false);

        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.cached_models(), 2);
    }

    #[test]
    fn test_load_failure_becomes_empty_mask() {
        let adapter = OracleAdapter::new(registry(), Arc::new(InMemoryProvider::new()));
        let image = Volume::ones((1, 3, 5));

        let outcome = adapter.segment("cyto", &image, 12.0, false);
        assert!(outcome.is_failed());

        let mask = outcome.into_mask_or_empty("cyto", image.dim());
        assert_eq!(mask.dim(), (1, 3, 5));
        assert!(mask.iter().all(|&v| v == 0));
        assert_eq!(adapter.cached_models(), 0);
    }

    #[test]
    fn test_evaluation_error_is_contained() {
        let source = ModelSource::Registry {
            name: "cyto".to_string(),
        };
        let provider = InMemoryProvider::new().with_oracle(
            source,
            Arc::new(|_: &Volume, _: f32, _: bool| -> Result<LabelVolume> {
                Err(OracleError::InvalidInput("values out of range".to_string()))
            }),
        );
        let adapter = OracleAdapter::new(registry(), Arc::new(provider));

        let outcome = adapter.segment("cyto", &Volume::zeros((1, 2, 2)), 8.0, false);
        match outcome {
            OracleOutcome::Failed { reason } => assert!(reason.contains("values out of range")),
            OracleOutcome::Mask(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_wrong_output_shape_fails() {
        let source = ModelSource::Registry {
            name: "cyto".to_string(),
        };
        let provider = InMemoryProvider::new().with_oracle(
            source,
            Arc::new(|_: &Volume, _: f32, _: bool| -> Result<LabelVolume> {
                Ok(LabelVolume::zeros((1, 1, 1)))
            }),
        );
        let adapter = OracleAdapter::new(registry(), Arc::new(provider));

        let outcome = adapter.segment("cyto", &Volume::zeros((1, 4, 4)), 8.0, false);
        assert!(outcome.is_failed());
    }

    #[test]
    fn test_invalid_diameter_fails() {
        let adapter = OracleAdapter::new(
            registry(),
            Arc::new(CountingProvider {
                loads: AtomicUsize::new(0),
            }),
        );
        let image = Volume::ones((1, 2, 2));

        assert!(adapter.segment("cyto", &image, 0.0, false).is_failed());
        assert!(adapter.segment("cyto", &image, f32::NAN, false).is_failed());
    }

    #[test]
    fn test_compartments_unsupported_by_default() {
        let adapter = OracleAdapter::new(
            registry(),
            Arc::new(CountingProvider {
                loads: AtomicUsize::new(0),
            }),
        );
        let volume = Volume::ones((1, 2, 2));

        let outcome = adapter.segment_compartments("cyto", &volume, &volume, 0.5);
        assert!(outcome.is_failed());

        let masks = outcome.or_empty_with("cyto", || CompartmentMasks::empty((1, 2, 2)));
        assert_eq!(masks, CompartmentMasks::empty((1, 2, 2)));
    }
}
