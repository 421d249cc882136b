//! ONNX Runtime backed foreground segmentation
//!
//! The model is expected to take a single `[1, 1, H, W]` intensity plane and
//! return a foreground probability map shaped `[1, H, W]` or `[1, 1, H, W]`.
//! Planes are rescaled so cells have the model's nominal diameter, the
//! thresholded foreground is resized back with nearest-neighbour sampling,
//! and instances are split by connectivity.

use crate::error::{OracleError, Result};
use crate::oracle::{OracleProvider, SegmentationOracle};
use crate::registry::ModelSource;
use cellfuse_common::{LabelVolume, Volume};
use cellfuse_labels::connected_components;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{Array4, ArrayView2, Axis};
use once_cell::sync::OnceCell;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Settings shared by all ONNX segmentation models of a provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnnxSettings {
    /// Cell diameter in pixels the model was trained on
    #[serde(default = "default_nominal_diameter")]
    pub nominal_diameter: f32,
    /// Foreground probability cut-off
    #[serde(default = "default_probability_threshold")]
    pub probability_threshold: f32,
}

fn default_nominal_diameter() -> f32 {
    30.0
}

fn default_probability_threshold() -> f32 {
    0.5
}

impl Default for OnnxSettings {
    fn default() -> Self {
        Self {
            nominal_diameter: default_nominal_diameter(),
            probability_threshold: default_probability_threshold(),
        }
    }
}

fn load_error<E: Display>(model_path: &Path) -> impl Fn(E) -> OracleError + '_ {
    move |e| OracleError::Load {
        model: model_path.display().to_string(),
        reason: e.to_string(),
    }
}

fn build_session(model_path: &Path, num_threads: usize, with_coreml: bool) -> Result<Session> {
    let mut providers = Vec::with_capacity(3);
    if with_coreml {
        providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
    }
    providers.push(CUDAExecutionProvider::default().build());
    providers.push(CPUExecutionProvider::default().build());

    Session::builder()
        .map_err(load_error(model_path))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(load_error(model_path))?
        .with_intra_threads(num_threads)
        .map_err(load_error(model_path))?
        .with_memory_pattern(true)
        .map_err(load_error(model_path))?
        .with_execution_providers(providers)
        .map_err(load_error(model_path))?
        .commit_from_file(model_path)
        .map_err(load_error(model_path))
}

/// Create an ONNX Runtime session with graph optimizations and hardware
/// execution providers (CoreML, CUDA, CPU fallback).
///
/// The intra-op thread count defaults to the number of physical cores and
/// can be overridden with `CELLFUSE_THREADS`. When CoreML cannot compile the
/// model the session is rebuilt with CUDA/CPU only.
pub fn create_optimized_session(model_path: &Path) -> Result<Session> {
    if !model_path.exists() {
        return Err(load_error(model_path)("model file not found"));
    }

    let num_threads = std::env::var("CELLFUSE_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or_else(num_cpus::get_physical);

    match build_session(model_path, num_threads, true) {
        Ok(session) => Ok(session),
        Err(err) => {
            let message = err.to_string();
            if message.contains("CoreML") || message.contains("MLModel") {
                warn!(
                    "CoreML failed for {}, retrying with CUDA/CPU: {}",
                    model_path.display(),
                    message
                );
                build_session(model_path, num_threads, false)
            } else {
                Err(err)
            }
        }
    }
}

/// Plane size after rescaling by `scale`, at least one pixel per axis
fn scaled_size(height: usize, width: usize, scale: f32) -> (usize, usize) {
    let scale_axis = |len: usize| ((len as f32 * scale).round() as usize).max(1);
    (scale_axis(height), scale_axis(width))
}

/// Foreground segmenter running one ONNX model per Z plane
pub struct OnnxSegmenter {
    model_path: PathBuf,
    settings: OnnxSettings,
    /// Session created on first evaluation and reused afterwards
    session: OnceCell<Mutex<Session>>,
}

impl OnnxSegmenter {
    /// # Errors
    /// Returns [`OracleError::Load`] when the model file does not exist.
    pub fn new(model_path: impl Into<PathBuf>, settings: OnnxSettings) -> Result<Self> {
        let model_path = model_path.into();
        if !model_path.exists() {
            return Err(load_error(&model_path)("model file not found"));
        }
        Ok(Self {
            model_path,
            settings,
            session: OnceCell::new(),
        })
    }

    fn session(&self) -> Result<&Mutex<Session>> {
        self.session.get_or_try_init(|| {
            info!(
                "Loading segmentation model from {} (first time only)",
                self.model_path.display()
            );
            let session = create_optimized_session(&self.model_path)?;
            info!("Segmentation model loaded and cached for reuse");
            Ok(Mutex::new(session))
        })
    }

    /// Binary foreground of one plane at its original size
    fn foreground_plane(
        &self,
        session: &Mutex<Session>,
        plane: ArrayView2<'_, f32>,
        scale: f32,
    ) -> Result<Vec<u8>> {
        let (height, width) = plane.dim();
        let (scaled_h, scaled_w) = scaled_size(height, width, scale);

        let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(width as u32, height as u32, plane.iter().copied().collect())
                .ok_or_else(|| OracleError::InvalidInput("plane buffer too small".to_string()))?;
        let resized = if (scaled_h, scaled_w) != (height, width) {
            imageops::resize(&buffer, scaled_w as u32, scaled_h as u32, FilterType::Triangle)
        } else {
            buffer
        };

        let input = Array4::from_shape_vec((1, 1, scaled_h, scaled_w), resized.into_raw())
            .map_err(|e| OracleError::InvalidInput(e.to_string()))?;

        let mut session = session
            .lock()
            .map_err(|e| OracleError::Evaluation(format!("Failed to lock session mutex: {}", e)))?;

        // Extract output name BEFORE running inference to avoid borrow conflicts
        let output_name = session.outputs[0].name.clone();
        let input_tensor = TensorRef::from_array_view(input.view())?;
        let outputs = session.run(ort::inputs![input_tensor])?;
        let (shape, probabilities) = outputs[output_name.as_str()].try_extract_tensor::<f32>()?;

        let (out_h, out_w) = match shape.len() {
            3 => (shape[1] as usize, shape[2] as usize),
            4 => (shape[2] as usize, shape[3] as usize),
            _ => {
                return Err(OracleError::ShapeMismatch {
                    expected: vec![1, 1, scaled_h, scaled_w],
                    actual: shape.iter().map(|&d| d.max(0) as usize).collect(),
                })
            }
        };
        if probabilities.len() < out_h * out_w {
            return Err(OracleError::Evaluation(format!(
                "model returned {} values for a {}x{} plane",
                probabilities.len(),
                out_h,
                out_w
            )));
        }

        let threshold = self.settings.probability_threshold;
        let mask: Vec<u8> = probabilities[..out_h * out_w]
            .iter()
            .map(|&p| if p >= threshold { 255 } else { 0 })
            .collect();
        let mask: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_raw(out_w as u32, out_h as u32, mask)
                .ok_or_else(|| OracleError::Evaluation("mask buffer too small".to_string()))?;

        let restored = imageops::resize(&mask, width as u32, height as u32, FilterType::Nearest);
        Ok(restored.into_raw())
    }
}

impl SegmentationOracle for OnnxSegmenter {
    fn evaluate(
        &self,
        image: &Volume,
        diameter_px: f32,
        is_volumetric: bool,
    ) -> Result<LabelVolume> {
        let scale = self.settings.nominal_diameter / diameter_px;
        let session = self.session()?;
        debug!(
            "Running {} on {:?} with scale {:.3}",
            self.model_path.display(),
            image.dim(),
            scale
        );

        let mut foreground = LabelVolume::zeros(image.raw_dim());
        for (z, plane) in image.axis_iter(Axis(0)).enumerate() {
            let mask = self.foreground_plane(session, plane, scale)?;
            let mut out = foreground.index_axis_mut(Axis(0), z);
            for (voxel, value) in out.iter_mut().zip(mask) {
                *voxel = u32::from(value > 0);
            }
        }

        Ok(connected_components(&foreground, is_volumetric))
    }
}

/// Provider loading `.onnx` models from disk
pub struct OnnxProvider {
    registry_dir: PathBuf,
    settings: OnnxSettings,
}

impl OnnxProvider {
    /// `registry_dir` holds the pretrained models known by name
    pub fn new(registry_dir: impl Into<PathBuf>, settings: OnnxSettings) -> Self {
        Self {
            registry_dir: registry_dir.into(),
            settings,
        }
    }

    pub fn model_path(&self, source: &ModelSource) -> PathBuf {
        match source {
            ModelSource::Registry { name } => self.registry_dir.join(format!("{}.onnx", name)),
            ModelSource::Custom { path } if path.extension().is_none() => {
                path.with_extension("onnx")
            }
            ModelSource::Custom { path } => path.clone(),
        }
    }
}

impl OracleProvider for OnnxProvider {
    fn load(&self, source: &ModelSource) -> Result<Arc<dyn SegmentationOracle>> {
        let segmenter = OnnxSegmenter::new(self.model_path(source), self.settings)?;
        Ok(Arc::new(segmenter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_size() {
        assert_eq!(scaled_size(100, 60, 0.5), (50, 30));
        assert_eq!(scaled_size(10, 10, 1.5), (15, 15));
        assert_eq!(scaled_size(3, 3, 0.01), (1, 1));
    }

    #[test]
    fn test_model_paths() {
        let provider = OnnxProvider::new("/opt/pretrained", OnnxSettings::default());

        let registry = ModelSource::Registry {
            name: "cyto".to_string(),
        };
        assert_eq!(
            provider.model_path(&registry),
            PathBuf::from("/opt/pretrained/cyto.onnx")
        );

        let custom = ModelSource::Custom {
            path: PathBuf::from("models/tissue"),
        };
        assert_eq!(
            provider.model_path(&custom),
            PathBuf::from("models/tissue.onnx")
        );
    }

    #[test]
    fn test_missing_model_fails_to_load() {
        let provider = OnnxProvider::new("/nonexistent", OnnxSettings::default());
        let source = ModelSource::Registry {
            name: "cyto".to_string(),
        };
        assert!(matches!(
            provider.load(&source),
            Err(OracleError::Load { .. })
        ));
    }
}
