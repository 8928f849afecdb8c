pub mod detection;
pub mod engine;
pub mod loader;
pub mod seeta;

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use detection::{BoundingBox, Detection, DetectionResult, ValidationOutcome};
pub use engine::FaceValidationEngine;
pub use loader::ModelLoader;
pub use seeta::SeetaDetectorFactory;

pub const DEFAULT_MIN_FACE_SIZE_PX: u32 = 100;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FaceError {
    #[error("face detector failed to initialize: {0}")]
    DetectorInit(String),
    #[error("face detector is not ready yet")]
    DetectorNotReady,
    #[error("face detection failed: {0}")]
    Inference(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RunningMode {
    /// One still frame per call.
    #[default]
    Image,
    Video,
}

/// Fixed construction parameters for the detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub running_mode: RunningMode,
    /// Smallest window the detector scans for, in pixels. Independent from
    /// the validation minimum, which applies to what was found.
    pub min_window_px: u32,
    pub score_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/seeta_fd_frontal_v1.0.bin"),
            running_mode: RunningMode::Image,
            min_window_px: 40,
            score_threshold: 2.0,
        }
    }
}

/// A constructed detector. Inference is single-frame.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(&self, frame: Arc<RgbImage>) -> anyhow::Result<Vec<Detection>>;
}

pub type ModelHandle = Arc<dyn FaceDetector>;

/// Builds a detector from its configuration, typically by loading model
/// weights from disk or the network.
#[async_trait]
pub trait DetectorFactory: Send + Sync {
    async fn construct(&self, config: &DetectorConfig) -> anyhow::Result<ModelHandle>;
}
