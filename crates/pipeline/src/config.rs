//! Pipeline configuration records and YAML loading
//!
//! ```yaml
//! registry:
//!   known_models: [cyto, nuclei]
//!   models_dir: /srv/models
//! models:
//!   - model: cyto
//!     cell_channels: [0, 2]
//!     cell_diameter: 12.0
//!     normalise: 99.8
//!     gaussian_filter: 1.0
//!     merge_labels: true
//! ```

use cellfuse_common::SegmentationError;
use cellfuse_labels::PostProcessSettings;
use cellfuse_oracle::ModelRegistry;
use cellfuse_preprocess::IntensitySettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid model configuration {model}: {reason}")]
    InvalidModel { model: String, reason: String },
}

impl From<ConfigError> for SegmentationError {
    fn from(err: ConfigError) -> Self {
        SegmentationError::Config(err.to_string())
    }
}

/// One segmentation model and how its input is prepared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Registry name or path below the models directory
    pub model: String,
    /// Channels composited into the model input. Empty skips the model.
    #[serde(default)]
    pub cell_channels: Vec<usize>,
    /// Expected cell diameter in physical units (micrometers)
    pub cell_diameter: f32,
    #[serde(flatten)]
    pub intensity: IntensitySettings,
    /// Rebuild instances from connectivity after segmentation
    #[serde(default)]
    pub merge_labels: bool,
    #[serde(flatten)]
    pub post: PostProcessSettings,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>, cell_channels: Vec<usize>, cell_diameter: f32) -> Self {
        Self {
            model: model.into(),
            cell_channels,
            cell_diameter,
            intensity: IntensitySettings::default(),
            merge_labels: false,
            post: PostProcessSettings::default(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidModel {
            model: self.model.clone(),
            reason: reason.to_string(),
        };
        if self.model.trim().is_empty() {
            return Err(invalid("model identifier is empty"));
        }
        if !self.cell_diameter.is_finite() || self.cell_diameter <= 0.0 {
            return Err(invalid("cell_diameter must be positive"));
        }
        for (key, q) in [
            ("rel_threshold", self.intensity.rel_threshold),
            ("normalise", self.intensity.normalise),
        ] {
            if q.is_some_and(|q| !(0.0..=100.0).contains(&q)) {
                return Err(invalid(&format!("{} must be a percentile in 0-100", key)));
            }
        }
        Ok(())
    }
}

/// Dual-compartment model fed with nucleus and whole-cell channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompartmentModelConfig {
    pub model: String,
    #[serde(default)]
    pub nucleus_channels: Vec<usize>,
    #[serde(default)]
    pub cyto_channels: Vec<usize>,
    /// Upper percentile for normalizing both inputs
    #[serde(default)]
    pub normalise_percentile: Option<f64>,
}

impl CompartmentModelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel {
                model: self.model.clone(),
                reason: "model identifier is empty".to_string(),
            });
        }
        if self
            .normalise_percentile
            .is_some_and(|q| !(0.0..=100.0).contains(&q))
        {
            return Err(ConfigError::InvalidModel {
                model: self.model.clone(),
                reason: "normalise_percentile must be a percentile in 0-100".to_string(),
            });
        }
        Ok(())
    }
}

/// Registry and the ordered model list of a segmentation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub registry: ModelRegistry,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub compartment_models: Vec<CompartmentModelConfig>,
}

impl PipelineConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.models.iter().try_for_each(ModelConfig::validate)?;
        self.compartment_models
            .iter()
            .try_for_each(CompartmentModelConfig::validate)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
registry:
  known_models: [cyto, nuclei]
  models_dir: /srv/models
models:
  - model: cyto
    cell_channels: [0, 2]
    cell_diameter: 12.0
    normalise: 99.8
    gaussian_filter: 1.0
    merge_labels: true
    min_filter_size: 3
  - model: custom/tissue
    cell_channels: [1]
    cell_diameter: 8.5
    threshold: 20.0
"#;

    #[test]
    fn test_parse_config() {
        let config = PipelineConfig::from_yaml(CONFIG).unwrap();

        assert!(config.registry.is_known("nuclei"));
        assert_eq!(config.models.len(), 2);

        let cyto = &config.models[0];
        assert_eq!(cyto.cell_channels, vec![0, 2]);
        assert_eq!(cyto.intensity.normalise, Some(99.8));
        assert_eq!(cyto.intensity.gaussian_filter, Some(1.0));
        assert_eq!(cyto.intensity.threshold, None);
        assert!(cyto.merge_labels);
        assert_eq!(cyto.post.min_filter_size, 3);
        assert_eq!(cyto.post.expand_distance, 1.0);

        let custom = &config.models[1];
        assert_eq!(custom.intensity.threshold, Some(20.0));
        assert!(!custom.merge_labels);
        assert_eq!(custom.post, PostProcessSettings::default());
    }

    #[test]
    fn test_missing_required_keys() {
        let no_diameter = "models:\n  - model: cyto\n    cell_channels: [0]\n";
        assert!(matches!(
            PipelineConfig::from_yaml(no_diameter),
            Err(ConfigError::Yaml(_))
        ));

        let no_model = "models:\n  - cell_channels: [0]\n    cell_diameter: 10.0\n";
        assert!(matches!(
            PipelineConfig::from_yaml(no_model),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_invalid_values() {
        let zero_diameter = "models:\n  - model: cyto\n    cell_diameter: 0.0\n";
        assert!(matches!(
            PipelineConfig::from_yaml(zero_diameter),
            Err(ConfigError::InvalidModel { .. })
        ));

        let bad_percentile = "models:\n  - model: cyto\n    cell_diameter: 5.0\n    normalise: 120.0\n";
        assert!(PipelineConfig::from_yaml(bad_percentile).is_err());
    }

    #[test]
    fn test_compartment_models() {
        let yaml = r#"
compartment_models:
  - model: mesmer
    nucleus_channels: [0]
    cyto_channels: [1, 2]
    normalise_percentile: 99.0
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert!(config.models.is_empty());
        assert_eq!(config.compartment_models[0].cyto_channels, vec![1, 2]);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = PipelineConfig::from_yaml(CONFIG).unwrap();
        let yaml = config.to_yaml().unwrap();
        assert_eq!(PipelineConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_config_error_converts() {
        let err: SegmentationError = ConfigError::InvalidModel {
            model: "cyto".to_string(),
            reason: "bad".to_string(),
        }
        .into();
        assert!(matches!(err, SegmentationError::Config(_)));
    }
}
