use serde::{Deserialize, Serialize};
use tracing::debug;

use std::fs;
use std::path::Path;

use crate::error::LprError;

/// Optional override file looked up inside the model directory.
pub const CONFIG_FILE_NAME: &str = "lpr.json";

/// A frozen graph and the nodes fed and fetched from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub file: String,
    pub input: String,
    pub outputs: Vec<String>,
}

impl GraphConfig {
    fn new(file: &str, input: &str, outputs: &[&str]) -> Self {
        Self {
            file: file.to_string(),
            input: input.to_string(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LprConfig {
    pub detection: GraphConfig,
    pub fine_mapping: GraphConfig,
    pub ocr: GraphConfig,
    /// detections scoring at or below this are dropped
    pub detect_threshold: f32,
    /// decoded plates under this confidence are dropped
    pub min_confidence: f32,
}

impl Default for LprConfig {
    fn default() -> Self {
        Self {
            detection: GraphConfig::new("detect.pb", "image_tensor", &["detection_boxes", "detection_scores"]),
            fine_mapping: GraphConfig::new("fine_mapping.pb", "input_1", &["relu4/Relu"]),
            ocr: GraphConfig::new("ocr_plate_all_gru.pb", "input_1", &["dense_2/truediv"]),
            detect_threshold: 0.6,
            min_confidence: 0.0,
        }
    }
}

impl LprConfig {
    /// Read `lpr.json` from the model directory, falling back to defaults
    /// when the file is absent. Fields missing from the file keep their
    /// default values.
    pub fn load(model_dir: impl AsRef<Path>) -> Result<Self, LprError> {
        let model_dir = model_dir.as_ref();
        if !model_dir.is_dir() {
            return Err(LprError::model_load(model_dir, "model directory does not exist"));
        }
        let path = model_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            debug!("no {} in {}, using defaults", CONFIG_FILE_NAME, model_dir.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| LprError::model_load(&path, e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| LprError::model_load(&path, e))?;
        config.validate().map_err(|reason| LprError::model_load(&path, reason))?;
        debug!("loaded {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.detect_threshold) {
            return Err(format!("detect_threshold {} is outside [0, 1]", self.detect_threshold));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(format!("min_confidence {} is outside [0, 1]", self.min_confidence));
        }
        if self.detection.outputs.len() != 2 {
            return Err("detection graph needs a boxes and a scores output".to_string());
        }
        for graph in [&self.fine_mapping, &self.ocr] {
            if graph.outputs.len() != 1 {
                return Err(format!("{} needs exactly one output", graph.file));
            }
        }
        Ok(())
    }
}
