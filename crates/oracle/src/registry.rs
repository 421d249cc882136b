//! Model identifier resolution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where a model comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSource {
    /// Pretrained model known to the backend by name
    Registry { name: String },
    /// Custom model stored under the models directory
    Custom { path: PathBuf },
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Registry { name } => write!(f, "{}", name),
            ModelSource::Custom { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Known pretrained model names and the directory custom models live in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRegistry {
    #[serde(default)]
    pub known_models: Vec<String>,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self {
            known_models: Vec::new(),
            models_dir: default_models_dir(),
        }
    }
}

impl ModelRegistry {
    pub fn new<I, S>(known_models: I, models_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_models: known_models.into_iter().map(Into::into).collect(),
            models_dir: models_dir.into(),
        }
    }

    pub fn is_known(&self, model_id: &str) -> bool {
        self.known_models.iter().any(|name| name == model_id)
    }

    /// Known names resolve to the registry, anything else to a file under
    /// `models_dir`
    pub fn resolve(&self, model_id: &str) -> ModelSource {
        if self.is_known(model_id) {
            ModelSource::Registry {
                name: model_id.to_string(),
            }
        } else {
            ModelSource::Custom {
                path: self.models_dir.join(model_id),
            }
        }
    }
}
