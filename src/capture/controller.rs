use std::{io::Cursor, sync::Arc};

use chrono::NaiveDateTime;
use image::{DynamicImage, ImageFormat, RgbImage};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    attendance::{SameDayGuard, TimePolicy},
    backend::{AttendanceGateway, GatewayError},
    camera::{CameraConstraints, CameraDevice, CameraError},
    clock::Clock,
    db::models::AttendanceRecord,
    error::{CaptureError, ErrorKind},
    face::{FaceValidationEngine, ValidationOutcome},
    location::{GeoPoint, Geofence, Geolocator, LocationError},
    log_debug, log_error, log_info, log_warn,
};

use super::{CaptureListener, CaptureSession, CaptureSnapshot, CaptureStatus, CapturedPhoto};

const ENABLE_LOGS: bool = true;

/// Collaborators of the orchestrator. Everything is injected so the state
/// machine can run against fakes.
#[derive(Clone)]
pub struct CaptureServices {
    pub camera: Arc<dyn CameraDevice>,
    pub locator: Arc<dyn Geolocator>,
    pub engine: FaceValidationEngine,
    pub gateway: Arc<dyn AttendanceGateway>,
    pub policy: TimePolicy,
    pub clock: Arc<dyn Clock>,
    pub geofence: Option<Geofence>,
    pub constraints: CameraConstraints,
}

/// Drives one camera from request to stored attendance record.
///
/// Stages run one at a time: an action issued while another is still running
/// fails with `InvalidState`. The session lock is never held across a call
/// into the camera, the detector or the gateway; each stage re-checks the
/// session's cancellation token once its call returns and throws the result
/// away if `cancel` ran in the meantime.
#[derive(Clone)]
pub struct CaptureOrchestrator {
    session: Arc<Mutex<CaptureSession>>,
    services: CaptureServices,
    guard: SameDayGuard,
    listener: Arc<dyn CaptureListener>,
}

struct Submission {
    subject_id: String,
    photo: CapturedPhoto,
    position: Option<GeoPoint>,
}

impl CaptureOrchestrator {
    pub fn new(services: CaptureServices, listener: Arc<dyn CaptureListener>) -> Self {
        let guard = SameDayGuard::new(services.gateway.clone());
        Self {
            session: Arc::new(Mutex::new(CaptureSession::new())),
            services,
            guard,
            listener,
        }
    }

    pub fn services(&self) -> &CaptureServices {
        &self.services
    }

    pub async fn snapshot(&self) -> CaptureSnapshot {
        let session = self.session.lock().await;
        self.snapshot_of(&session)
    }

    /// Asks the camera for a stream on behalf of `subject_id` and, once it is
    /// granted, takes a location fix. Also starts loading the detector in
    /// the background so it is usually ready by the time a frame is taken.
    pub async fn start_camera(&self, subject_id: &str) -> Result<CaptureSnapshot, CaptureError> {
        let token = {
            let mut session = self.session.lock().await;
            if !session.status.accepts_start() {
                return Err(CaptureError::InvalidState {
                    action: "start the camera",
                    state: session.status,
                });
            }
            session.reset();
            session.subject_id = Some(subject_id.to_string());
            self.transition(&mut session, CaptureStatus::CameraRequested);
            session.cancel_token.clone()
        };

        self.warm_up_detector();

        let opened = tokio::select! {
            _ = token.cancelled() => Err(CaptureError::Cancelled),
            result = self.services.camera.open(&self.services.constraints) => {
                result.map_err(CaptureError::from)
            }
        };

        {
            let mut session = self.session.lock().await;
            if token.is_cancelled() {
                if let Ok(mut stream) = opened {
                    stream.stop();
                }
                return Err(CaptureError::Cancelled);
            }

            match opened {
                Ok(stream) => {
                    session.stream = Some(stream);
                    self.transition(&mut session, CaptureStatus::CameraActive);
                }
                Err(err) => {
                    log_warn!("Camera request for {} failed: {}", subject_id, err);
                    session.subject_id = None;
                    session.record_error(&err);
                    self.transition(&mut session, CaptureStatus::Idle);
                    return Err(err);
                }
            }
        }

        let fix = tokio::select! {
            _ = token.cancelled() => return Err(CaptureError::Cancelled),
            fix = self.services.locator.current_position() => fix,
        };

        let mut session = self.session.lock().await;
        if token.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        self.apply_location(&mut session, fix);
        self.notify(&session);
        Ok(self.snapshot_of(&session))
    }

    /// Grabs the current frame and runs it through face validation. A
    /// rejected frame leaves the camera running for another attempt.
    pub async fn capture(&self) -> Result<CaptureSnapshot, CaptureError> {
        let (frame, token) = {
            let mut session = self.session.lock().await;
            if !session.status.accepts_capture() {
                return Err(CaptureError::InvalidState {
                    action: "capture a frame",
                    state: session.status,
                });
            }

            session.clear_error();
            session.validation = None;
            session.photo = None;
            self.transition(&mut session, CaptureStatus::Capturing);

            let grabbed = match session.stream.as_mut() {
                Some(stream) => stream.grab_frame().map_err(CaptureError::from),
                None => Err(CaptureError::Camera(CameraError::Other(
                    "camera stream is not open".into(),
                ))),
            };
            let frame = match grabbed {
                Ok(frame) => Arc::new(frame),
                Err(err) => {
                    log_warn!("Frame grab failed: {}", err);
                    session.record_error(&err);
                    self.transition(&mut session, CaptureStatus::CameraActive);
                    return Err(err);
                }
            };

            self.transition(&mut session, CaptureStatus::Validating);
            (frame, session.cancel_token.clone())
        };

        let verdict = self.validate_frame(frame).await;

        let mut session = self.session.lock().await;
        if token.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }

        match verdict {
            Ok((outcome, photo)) => {
                log_info!(
                    "Captured {}x{} photo ({} bytes)",
                    photo.width,
                    photo.height,
                    photo.jpeg.len()
                );
                session.message = Some(outcome.message.clone());
                session.validation = Some(outcome);
                session.photo = Some(photo);
                self.transition(&mut session, CaptureStatus::Captured);
                Ok(self.snapshot_of(&session))
            }
            Err(CaptureError::FaceRejected(outcome)) => {
                log_info!("Frame rejected: {}", outcome.message);
                session.validation = Some(outcome.clone());
                let err = CaptureError::FaceRejected(outcome);
                session.record_error(&err);
                self.transition(&mut session, CaptureStatus::ValidationFailed);
                Err(err)
            }
            Err(err) => {
                log_warn!("Frame validation failed: {}", err);
                session.record_error(&err);
                self.transition(&mut session, CaptureStatus::CameraActive);
                Err(err)
            }
        }
    }

    /// Checks the same-day rule and the time policy, uploads the photo and
    /// inserts the record. Business-rule rejections return to `Captured`;
    /// transport failures land in `SubmitFailed`, from where the same photo
    /// can be submitted again.
    pub async fn submit(&self) -> Result<CaptureSnapshot, CaptureError> {
        let (submission, token) = {
            let mut session = self.session.lock().await;
            if !session.status.accepts_submit() {
                return Err(CaptureError::InvalidState {
                    action: "submit attendance",
                    state: session.status,
                });
            }
            let (Some(subject_id), Some(photo)) =
                (session.subject_id.clone(), session.photo.clone())
            else {
                return Err(CaptureError::InvalidState {
                    action: "submit attendance without a photo",
                    state: session.status,
                });
            };

            session.clear_error();
            self.transition(&mut session, CaptureStatus::Submitting);
            let submission = Submission {
                subject_id,
                photo,
                position: session.position,
            };
            (submission, session.cancel_token.clone())
        };

        let outcome = self.run_submission(&token, &submission).await;

        let mut session = self.session.lock().await;
        if token.is_cancelled() {
            let orphaned = match &outcome {
                Ok(record) => {
                    log_warn!(
                        "Capture cancelled after attendance for {} on {} was stored",
                        record.subject_id,
                        record.date
                    );
                    None
                }
                Err(err) => err.orphaned_upload().map(str::to_string),
            };
            let Some(orphaned_path) = orphaned else {
                return Err(CaptureError::Cancelled);
            };
            // The session was reset by `cancel`; only the path is carried over.
            log_warn!("Capture cancelled; {} left in storage", orphaned_path);
            let err = CaptureError::CancelledAfterUpload { orphaned_path };
            session.record_error(&err);
            self.notify(&session);
            return Err(err);
        }

        match outcome {
            Ok(record) => {
                log_info!(
                    "Attendance stored for {} on {} at {} ({})",
                    record.subject_id,
                    record.date,
                    record.check_in_time.format("%H:%M"),
                    record.status.as_str()
                );
                session.release_stream();
                session.photo = None;
                session.message = Some(format!(
                    "Attendance marked: {} at {}.",
                    record.status.as_str(),
                    record.check_in_time.format("%H:%M")
                ));
                session.record = Some(record.clone());
                self.transition(&mut session, CaptureStatus::Success);
                let snapshot = self.snapshot_of(&session);
                drop(session);

                self.spawn_touch_last_seen(record.subject_id, self.services.clock.now());
                Ok(snapshot)
            }
            Err(CaptureError::Cancelled) => Err(CaptureError::Cancelled),
            Err(err) => {
                let next = match err.kind() {
                    ErrorKind::Transport => CaptureStatus::SubmitFailed,
                    _ => CaptureStatus::Captured,
                };
                match err.kind() {
                    ErrorKind::Transport => log_error!("Submission failed: {}", err),
                    _ => log_info!("Submission refused: {}", err),
                }
                session.record_error(&err);
                self.transition(&mut session, next);
                Err(err)
            }
        }
    }

    /// Stops the stream and returns to `Idle` from any state. Work still in
    /// flight finishes but its result is dropped.
    pub async fn cancel(&self) -> CaptureSnapshot {
        let mut session = self.session.lock().await;
        session.cancel_token.cancel();
        session.cancel_token = CancellationToken::new();

        let previous = session.status;
        session.reset();
        if previous != CaptureStatus::Idle {
            log_info!("Capture cancelled from {:?}", previous);
        }
        self.notify(&session);
        self.snapshot_of(&session)
    }

    /// Starts (or joins) detector construction. After a failure this is the
    /// only way to try again.
    pub async fn prepare_detector(&self) -> Result<CaptureSnapshot, CaptureError> {
        let result = self.services.engine.loader().initialize().await;

        let mut session = self.session.lock().await;
        if let Err(err) = result {
            let err = CaptureError::from(err);
            session.record_error(&err);
            self.notify(&session);
            return Err(err);
        }
        if session.error_kind == Some(ErrorKind::Environment) {
            session.clear_error();
        }
        self.notify(&session);
        Ok(self.snapshot_of(&session))
    }

    /// Deletes a photo left in storage by a failed insert.
    pub async fn discard_orphaned_upload(&self) -> Result<CaptureSnapshot, CaptureError> {
        let path = {
            let session = self.session.lock().await;
            match session.orphaned_upload.clone() {
                Some(path) => path,
                None => return Ok(self.snapshot_of(&session)),
            }
        };

        let result = self.services.gateway.delete_image(&path).await;

        let mut session = self.session.lock().await;
        match result {
            Ok(()) => {
                log_info!("Removed orphaned upload {}", path);
                if session.orphaned_upload.as_deref() == Some(path.as_str()) {
                    session.orphaned_upload = None;
                }
                self.notify(&session);
                Ok(self.snapshot_of(&session))
            }
            Err(err) => {
                let err = CaptureError::Cleanup(err);
                log_warn!("{}", err);
                session.record_error(&err);
                self.notify(&session);
                Err(err)
            }
        }
    }

    async fn validate_frame(
        &self,
        frame: Arc<RgbImage>,
    ) -> Result<(ValidationOutcome, CapturedPhoto), CaptureError> {
        let engine = &self.services.engine;
        let detection = engine.detect(frame.clone()).await?;
        let outcome = engine.validate(&detection);
        log_debug!(
            "Detection: {} face(s), box {:?}",
            detection.face_count,
            detection.bounding_box
        );
        if !outcome.is_valid {
            return Err(CaptureError::FaceRejected(outcome));
        }

        let (width, height) = frame.dimensions();
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&frame))
            .await
            .map_err(|err| CaptureError::Encode(err.to_string()))??;

        Ok((
            outcome,
            CapturedPhoto {
                jpeg: Arc::new(jpeg),
                width,
                height,
            },
        ))
    }

    async fn run_submission(
        &self,
        token: &CancellationToken,
        submission: &Submission,
    ) -> Result<AttendanceRecord, CaptureError> {
        let subject_id = submission.subject_id.as_str();
        let now = self.services.clock.now();
        let date = now.date();

        let marked = self
            .guard
            .has_marked_today(subject_id, date)
            .await
            .map_err(CaptureError::GuardCheck)?;
        checkpoint(token)?;
        if marked {
            return Err(CaptureError::AlreadyMarked {
                subject_id: subject_id.to_string(),
                date,
                orphaned_path: None,
            });
        }

        let stamp = self.services.policy.evaluate(now)?;

        let location = self.resolve_location(token, submission).await?;

        let path = photo_path(subject_id, now);
        log_info!("Uploading {} ({} bytes)", path, submission.photo.jpeg.len());
        self.services
            .gateway
            .upload_image(&path, submission.photo.jpeg.to_vec())
            .await
            .map_err(CaptureError::Upload)?;
        if token.is_cancelled() {
            return Err(CaptureError::CancelledAfterUpload {
                orphaned_path: path,
            });
        }

        let record = AttendanceRecord {
            subject_id: subject_id.to_string(),
            date: stamp.date,
            check_in_time: stamp.check_in_time,
            status: stamp.status,
            photo_url: self.services.gateway.public_url(&path),
            location,
        };

        match self.services.gateway.insert_attendance(&record).await {
            Ok(()) => Ok(record),
            Err(GatewayError::Duplicate { subject_id, date }) => {
                log_warn!("Insert raced with another submission; {} left in storage", path);
                Err(CaptureError::AlreadyMarked {
                    subject_id,
                    date,
                    orphaned_path: Some(path),
                })
            }
            Err(err) => Err(CaptureError::Insert {
                source: err,
                orphaned_path: path,
            }),
        }
    }

    async fn resolve_location(
        &self,
        token: &CancellationToken,
        submission: &Submission,
    ) -> Result<Option<GeoPoint>, CaptureError> {
        let fix = match submission.position {
            Some(position) => Ok(position),
            None => {
                let fix = tokio::select! {
                    _ = token.cancelled() => return Err(CaptureError::Cancelled),
                    fix = self.services.locator.current_position() => fix,
                };
                checkpoint(token)?;
                if let Ok(position) = &fix {
                    let mut session = self.session.lock().await;
                    session.position = Some(*position);
                    session.location_error = None;
                }
                fix
            }
        };

        match (self.services.geofence, fix) {
            (None, Ok(position)) => Ok(Some(position)),
            (None, Err(err)) => {
                log_warn!("Storing attendance without location: {}", err);
                Ok(None)
            }
            (Some(_), Err(err)) => Err(CaptureError::LocationRequired(err)),
            (Some(fence), Ok(position)) => {
                let distance_m = fence.distance_to(&position);
                if distance_m > fence.radius_m {
                    return Err(CaptureError::OutsideGeofence {
                        distance_m,
                        radius_m: fence.radius_m,
                    });
                }
                Ok(Some(position))
            }
        }
    }

    fn apply_location(&self, session: &mut CaptureSession, fix: Result<GeoPoint, LocationError>) {
        match fix {
            Ok(position) => {
                log_debug!(
                    "Location fix {:.5},{:.5}",
                    position.latitude,
                    position.longitude
                );
                session.position = Some(position);
                session.location_error = None;
            }
            Err(err) => {
                log_warn!("Location unavailable: {}", err);
                session.position = None;
                session.location_error = Some(err.to_string());
            }
        }
    }

    fn warm_up_detector(&self) {
        let loader = self.services.engine.loader().clone();
        if loader.handle().is_some() {
            return;
        }
        tokio::spawn(async move {
            if let Err(err) = loader.initialize().await {
                log_warn!("Detector warm-up failed: {}", err);
            }
        });
    }

    fn spawn_touch_last_seen(&self, subject_id: String, at: NaiveDateTime) {
        let gateway = self.services.gateway.clone();
        tokio::spawn(async move {
            if let Err(err) = gateway.touch_last_seen(&subject_id, at).await {
                log_warn!("Failed to update last seen for {}: {}", subject_id, err);
            }
        });
    }

    fn transition(&self, session: &mut CaptureSession, next: CaptureStatus) {
        if session.status != next {
            log_info!("Capture state {:?} -> {:?}", session.status, next);
        }
        session.status = next;
        self.notify(session);
    }

    fn notify(&self, session: &CaptureSession) {
        self.listener.on_state_changed(&self.snapshot_of(session));
    }

    fn snapshot_of(&self, session: &CaptureSession) -> CaptureSnapshot {
        session.snapshot(self.services.engine.loader().handle().is_some())
    }
}

fn checkpoint(token: &CancellationToken) -> Result<(), CaptureError> {
    if token.is_cancelled() {
        Err(CaptureError::Cancelled)
    } else {
        Ok(())
    }
}

fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>, CaptureError> {
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(frame.clone())
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .map_err(|err| CaptureError::Encode(err.to_string()))?;
    Ok(jpeg)
}

/// `<subject>/<date>_<HHMMSS>_<uuid>.jpg`, with anything outside
/// `[A-Za-z0-9_-]` in the subject replaced so it stays one path segment.
pub fn photo_path(subject_id: &str, at: NaiveDateTime) -> String {
    let folder: String = subject_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let folder = if folder.is_empty() {
        "unknown".to_string()
    } else {
        folder
    };

    format!(
        "{}/{}_{}.jpg",
        folder,
        at.format("%Y-%m-%d_%H%M%S"),
        Uuid::new_v4().simple()
    )
}
