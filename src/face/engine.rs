use std::sync::Arc;

use image::RgbImage;

use super::{
    detection::validate_detection, DetectionResult, FaceError, ModelLoader, ValidationOutcome,
    DEFAULT_MIN_FACE_SIZE_PX,
};

/// Runs the detector on a still frame and judges whether the result is a
/// usable single face.
#[derive(Clone)]
pub struct FaceValidationEngine {
    loader: ModelLoader,
    min_face_size_px: u32,
}

impl FaceValidationEngine {
    pub fn new(loader: ModelLoader) -> Self {
        Self::with_min_face_size(loader, DEFAULT_MIN_FACE_SIZE_PX)
    }

    pub fn with_min_face_size(loader: ModelLoader, min_face_size_px: u32) -> Self {
        Self {
            loader,
            min_face_size_px,
        }
    }

    pub fn loader(&self) -> &ModelLoader {
        &self.loader
    }

    pub fn min_face_size_px(&self) -> u32 {
        self.min_face_size_px
    }

    /// Never waits for the model: if it has not finished loading the call
    /// fails with `DetectorNotReady`.
    pub async fn detect(&self, frame: Arc<RgbImage>) -> Result<DetectionResult, FaceError> {
        let handle = self.loader.handle().ok_or(FaceError::DetectorNotReady)?;
        let detections = handle
            .detect(frame)
            .await
            .map_err(|err| FaceError::Inference(format!("{err:#}")))?;
        Ok(DetectionResult::from_detections(&detections))
    }

    pub fn validate(&self, result: &DetectionResult) -> ValidationOutcome {
        validate_detection(result, self.min_face_size_px)
    }
}
