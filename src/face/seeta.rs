use std::{
    path::Path,
    sync::{mpsc, Arc},
    thread,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use rustface::{Detector, ImageData};
use tokio::sync::oneshot;

use super::{
    BoundingBox, Detection, DetectorConfig, DetectorFactory, FaceDetector, ModelHandle,
    RunningMode,
};
use crate::{log_debug, log_error, log_info};

const ENABLE_LOGS: bool = true;

struct DetectJob {
    frame: Arc<RgbImage>,
    reply: oneshot::Sender<Vec<Detection>>,
}

/// Builds SeetaFace frontal detectors through `rustface`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeetaDetectorFactory;

#[async_trait]
impl DetectorFactory for SeetaDetectorFactory {
    async fn construct(&self, config: &DetectorConfig) -> Result<ModelHandle> {
        if config.running_mode != RunningMode::Image {
            bail!("SeetaFace detector only supports single image mode");
        }

        let model_path = config
            .model_path
            .to_str()
            .ok_or_else(|| anyhow!("model path is not valid UTF-8"))?
            .to_string();
        if !Path::new(&model_path).is_file() {
            bail!("model file not found at {model_path}");
        }

        let min_window_px = config.min_window_px;
        let score_threshold = config.score_threshold;
        let (job_tx, job_rx) = mpsc::channel::<DetectJob>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        // rustface detectors are neither shared nor cheap to build, so one
        // thread owns the instance and serves frames in order.
        thread::Builder::new()
            .name("face-detector".into())
            .spawn(move || {
                let mut detector = match rustface::create_detector(&model_path) {
                    Ok(detector) => detector,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow!(
                            "failed to load face model {model_path}: {err}"
                        )));
                        return;
                    }
                };
                detector.set_min_face_size(min_window_px);
                detector.set_score_thresh(score_threshold);
                detector.set_pyramid_scale_factor(0.8);
                detector.set_slide_window_step(4, 4);

                if ready_tx.send(Ok(())).is_err() {
                    log_error!("Detector requester went away before the model was ready");
                    return;
                }

                while let Ok(job) = job_rx.recv() {
                    let detections = run_detection(detector.as_mut(), &job.frame);
                    if job.reply.send(detections).is_err() {
                        log_debug!("Detection caller dropped before receiving result");
                    }
                }

                log_info!("Face detector thread shutting down");
            })
            .context("failed to spawn face detector thread")?;

        ready_rx
            .await
            .context("face detector thread exited before signaling readiness")??;

        Ok(Arc::new(SeetaDetector { jobs: job_tx }))
    }
}

struct SeetaDetector {
    jobs: mpsc::Sender<DetectJob>,
}

#[async_trait]
impl FaceDetector for SeetaDetector {
    async fn detect(&self, frame: Arc<RgbImage>) -> Result<Vec<Detection>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(DetectJob {
                frame,
                reply: reply_tx,
            })
            .map_err(|_| anyhow!("face detector thread is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("face detector thread terminated unexpectedly"))
    }
}

fn run_detection(detector: &mut dyn Detector, frame: &RgbImage) -> Vec<Detection> {
    let (width, height) = frame.dimensions();
    let gray = DynamicImage::ImageRgb8(frame.clone()).to_luma8();
    let image = ImageData::new(gray.as_raw(), width, height);

    let faces = detector.detect(&image);
    log_debug!("Detector found {} face(s) in {}x{} frame", faces.len(), width, height);

    faces
        .iter()
        .map(|face| {
            let bbox = face.bbox();
            // SeetaFace scores are unbounded classifier margins, not
            // probabilities.
            Detection {
                bounding_box: Some(BoundingBox::new(
                    bbox.x().max(0) as f32,
                    bbox.y().max(0) as f32,
                    bbox.width() as f32,
                    bbox.height() as f32,
                )),
                confidence: None,
            }
        })
        .collect()
}
