use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One candidate face as reported by the detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub bounding_box: Option<BoundingBox>,
    pub confidence: Option<f32>,
}

/// Summary of one frame's detections. Never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub face_count: usize,
    /// Only set when exactly one face was found.
    pub bounding_box: Option<BoundingBox>,
    pub confidence: Option<f32>,
}

impl DetectionResult {
    pub fn from_detections(detections: &[Detection]) -> Self {
        match detections {
            [single] => Self {
                face_count: 1,
                bounding_box: single.bounding_box,
                confidence: single.confidence,
            },
            many => Self {
                face_count: many.len(),
                bounding_box: None,
                confidence: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub message: String,
    pub face_count: usize,
    pub bounding_box: Option<BoundingBox>,
    pub confidence: Option<f32>,
}

impl ValidationOutcome {
    fn rejected(result: &DetectionResult, message: String) -> Self {
        Self {
            is_valid: false,
            message,
            face_count: result.face_count,
            bounding_box: result.bounding_box,
            confidence: result.confidence,
        }
    }
}

/// Applies the face rules in order: none, several, unknown size, too small.
/// Anything left is a usable single face.
pub fn validate_detection(result: &DetectionResult, min_face_size_px: u32) -> ValidationOutcome {
    if result.face_count == 0 {
        return ValidationOutcome::rejected(
            result,
            "No face detected. Please position your face clearly in front of the camera.".into(),
        );
    }

    if result.face_count > 1 {
        return ValidationOutcome::rejected(
            result,
            format!(
                "Multiple faces detected ({}). Please make sure only your face is visible.",
                result.face_count
            ),
        );
    }

    let Some(bounding_box) = result.bounding_box else {
        return ValidationOutcome::rejected(
            result,
            "Unable to determine the face size. Please retry.".into(),
        );
    };

    let min = min_face_size_px as f32;
    if bounding_box.width < min || bounding_box.height < min {
        return ValidationOutcome::rejected(
            result,
            format!(
                "Face too small ({:.0}x{:.0}px, minimum {}px). Please move closer to the camera.",
                bounding_box.width, bounding_box.height, min_face_size_px
            ),
        );
    }

    let message = match result.confidence {
        Some(confidence) => format!("Face verified ({:.0}% confidence).", confidence * 100.0),
        None => "Face verified.".to_string(),
    };

    ValidationOutcome {
        is_valid: true,
        message,
        face_count: 1,
        bounding_box: Some(bounding_box),
        confidence: result.confidence,
    }
}
