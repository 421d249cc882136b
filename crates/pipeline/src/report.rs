//! Per-slice run summaries

use serde::{Deserialize, Serialize};

/// What happened to one configured model on one slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    /// Model ran; `instances` is the highest label of its mask
    Segmented { instances: u32 },
    /// Model failed and contributed an empty mask
    Failed { reason: String },
    /// No channels were configured
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub model: String,
    #[serde(flatten)]
    pub status: ModelStatus,
}

/// Summary of one `predict_slice` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceReport {
    pub models: Vec<ModelReport>,
    /// Highest ID in the merged base mask
    pub max_label: u32,
}

impl SliceReport {
    pub(crate) fn record(&mut self, model: &str, status: ModelStatus) {
        self.models.push(ModelReport {
            model: model.to_string(),
            status,
        });
    }

    pub fn failed(&self) -> usize {
        self.models
            .iter()
            .filter(|m| matches!(m.status, ModelStatus::Failed { .. }))
            .count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
