#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::anyhow;
use async_trait::async_trait;
use attendance_kiosk_lib::{
    attendance::TimePolicy,
    backend::{AttendanceGateway, GatewayError, LocalBackend, PhotoStore},
    camera::{CameraConstraints, CameraDevice, CameraError, VideoStream},
    capture::{CaptureListener, CaptureOrchestrator, CaptureServices, CaptureSnapshot, CaptureStatus},
    clock::FixedClock,
    db::{models::AttendanceRecord, Database},
    face::{
        BoundingBox, Detection, DetectorConfig, DetectorFactory, FaceDetector,
        FaceValidationEngine, ModelHandle, ModelLoader,
    },
    location::{GeoPoint, Geofence, LocationError, StaticLocator},
};
use chrono::{NaiveDate, NaiveDateTime};
use image::RgbImage;
use tempfile::TempDir;
use tokio::sync::Notify;

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Tuesday.
pub fn tuesday_at(hour: u32, minute: u32) -> NaiveDateTime {
    at(2024, 3, 5, hour, minute)
}

pub fn face(size: f32) -> Detection {
    Detection {
        bounding_box: Some(BoundingBox::new(60.0, 20.0, size, size)),
        confidence: Some(0.97),
    }
}

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum CameraScript {
    Grant,
    Deny(CameraError),
}

pub struct FakeCamera {
    script: Mutex<CameraScript>,
    pub opens: AtomicUsize,
    pub stops: Arc<AtomicUsize>,
    pub live_streams: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub fn new(script: CameraScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            opens: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
            live_streams: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraDevice for FakeCamera {
    async fn open(
        &self,
        _constraints: &CameraConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        match script {
            CameraScript::Deny(err) => Err(err),
            CameraScript::Grant => {
                self.live_streams.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeStream {
                    stops: self.stops.clone(),
                    live_streams: self.live_streams.clone(),
                    active: true,
                }))
            }
        }
    }
}

struct FakeStream {
    stops: Arc<AtomicUsize>,
    live_streams: Arc<AtomicUsize>,
    active: bool,
}

impl VideoStream for FakeStream {
    fn grab_frame(&mut self) -> Result<RgbImage, CameraError> {
        if !self.active {
            return Err(CameraError::Other("stream stopped".into()));
        }
        Ok(RgbImage::from_pixel(320, 240, image::Rgb([120, 110, 100])))
    }

    fn stop(&mut self) {
        if self.active {
            self.active = false;
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.live_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Returns whatever detections the test queued last.
#[derive(Default)]
pub struct ScriptedDetector {
    next: Mutex<Vec<Detection>>,
    pub calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn will_find(&self, detections: Vec<Detection>) {
        *self.next.lock().unwrap() = detections;
    }
}

pub struct SharedDetector(pub Arc<ScriptedDetector>);

#[async_trait]
impl FaceDetector for SharedDetector {
    async fn detect(&self, _frame: Arc<RgbImage>) -> anyhow::Result<Vec<Detection>> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.0.next.lock().unwrap().clone())
    }
}

pub struct ScriptedFactory {
    pub detector: Arc<ScriptedDetector>,
    pub fail: AtomicBool,
    pub constructions: AtomicUsize,
}

#[async_trait]
impl DetectorFactory for ScriptedFactory {
    async fn construct(&self, _config: &DetectorConfig) -> anyhow::Result<ModelHandle> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("model download failed"));
        }
        Ok(Arc::new(SharedDetector(self.detector.clone())))
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Parks a gateway call until the test releases it.
#[derive(Default)]
pub struct Hold {
    pub reached: Notify,
    pub release: Notify,
}

impl Hold {
    async fn park(&self) {
        self.reached.notify_one();
        self.release.notified().await;
    }
}

/// Local backend that counts calls and can be told to fail or to stall.
pub struct CountingGateway {
    pub inner: LocalBackend,
    pub uploads: AtomicUsize,
    pub inserts: AtomicUsize,
    pub deletes: AtomicUsize,
    pub fail_exists: AtomicBool,
    pub fail_inserts: AtomicBool,
    pub fail_uploads: AtomicBool,
    /// Stall after the photo is stored.
    pub hold_uploads: AtomicBool,
    /// Stall before the record is written.
    pub hold_inserts: AtomicBool,
    pub hold: Hold,
}

impl CountingGateway {
    pub fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            uploads: AtomicUsize::new(0),
            inserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_exists: AtomicBool::new(false),
            fail_inserts: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
            hold_uploads: AtomicBool::new(false),
            hold_inserts: AtomicBool::new(false),
            hold: Hold::default(),
        }
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttendanceGateway for CountingGateway {
    async fn attendance_exists(
        &self,
        subject_id: &str,
        date: NaiveDate,
    ) -> Result<bool, GatewayError> {
        if self.fail_exists.load(Ordering::SeqCst) {
            return Err(GatewayError::Query(anyhow!("network unreachable")));
        }
        self.inner.attendance_exists(subject_id, date).await
    }

    async fn upload_image(&self, path: &str, bytes: Vec<u8>) -> Result<(), GatewayError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(GatewayError::Upload(anyhow!("connection reset")));
        }
        self.inner.upload_image(path, bytes).await?;
        if self.hold_uploads.load(Ordering::SeqCst) {
            self.hold.park().await;
        }
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        self.inner.public_url(path)
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), GatewayError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.hold_inserts.load(Ordering::SeqCst) {
            self.hold.park().await;
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(GatewayError::Insert(anyhow!("service unavailable")));
        }
        self.inner.insert_attendance(record).await
    }

    async fn delete_image(&self, path: &str) -> Result<(), GatewayError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_image(path).await
    }

    async fn list_attendance(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<AttendanceRecord>, GatewayError> {
        self.inner.list_attendance(subject_id, limit).await
    }

    async fn touch_last_seen(
        &self,
        subject_id: &str,
        at: NaiveDateTime,
    ) -> Result<(), GatewayError> {
        self.inner.touch_last_seen(subject_id, at).await
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingListener {
    pub snapshots: Mutex<Vec<CaptureSnapshot>>,
}

impl RecordingListener {
    pub fn statuses(&self) -> Vec<CaptureStatus> {
        let mut statuses: Vec<CaptureStatus> = Vec::new();
        for snapshot in self.snapshots.lock().unwrap().iter() {
            if statuses.last() != Some(&snapshot.status) {
                statuses.push(snapshot.status);
            }
        }
        statuses
    }
}

impl CaptureListener for RecordingListener {
    fn on_state_changed(&self, snapshot: &CaptureSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct HarnessOptions {
    pub now: NaiveDateTime,
    pub camera: CameraScript,
    pub position: Result<GeoPoint, LocationError>,
    pub geofence: Option<Geofence>,
    pub detector_fails: bool,
    /// Replaces the fake camera when set.
    pub device: Option<Arc<dyn CameraDevice>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            now: tuesday_at(9, 5),
            camera: CameraScript::Grant,
            position: Ok(GeoPoint::new(6.5244, 3.3792)),
            geofence: None,
            detector_fails: false,
            device: None,
        }
    }
}

pub struct Harness {
    pub orchestrator: CaptureOrchestrator,
    pub camera: Arc<FakeCamera>,
    pub detector: Arc<ScriptedDetector>,
    pub factory: Arc<ScriptedFactory>,
    pub gateway: Arc<CountingGateway>,
    pub clock: Arc<FixedClock>,
    pub listener: Arc<RecordingListener>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(HarnessOptions::default())
    }

    pub fn with(options: HarnessOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("attendance.sqlite3")).unwrap();
        let photos_dir = dir.path().join("photos");
        std::fs::create_dir_all(&photos_dir).unwrap();
        let backend = LocalBackend::new(db, PhotoStore::new(photos_dir, None));
        let gateway = Arc::new(CountingGateway::new(backend));

        let camera = FakeCamera::new(options.camera);
        let device: Arc<dyn CameraDevice> = match options.device {
            Some(device) => device,
            None => camera.clone(),
        };
        let detector = Arc::new(ScriptedDetector::default());
        let factory = Arc::new(ScriptedFactory {
            detector: detector.clone(),
            fail: AtomicBool::new(options.detector_fails),
            constructions: AtomicUsize::new(0),
        });
        let clock = Arc::new(FixedClock::new(options.now));
        let listener = Arc::new(RecordingListener::default());

        let loader = ModelLoader::new(factory.clone(), DetectorConfig::default());
        let orchestrator = CaptureOrchestrator::new(
            CaptureServices {
                camera: device,
                locator: Arc::new(StaticLocator(options.position)),
                engine: FaceValidationEngine::new(loader),
                gateway: gateway.clone(),
                policy: TimePolicy::default(),
                clock: clock.clone(),
                geofence: options.geofence,
                constraints: CameraConstraints::default(),
            },
            listener.clone(),
        );

        Self {
            orchestrator,
            camera,
            detector,
            factory,
            gateway,
            clock,
            listener,
            dir,
        }
    }

    /// Camera open, detector loaded, one valid capture taken.
    pub async fn captured(&self, subject_id: &str) -> CaptureSnapshot {
        self.orchestrator.start_camera(subject_id).await.unwrap();
        self.orchestrator.prepare_detector().await.unwrap();
        self.detector.will_find(vec![face(200.0)]);
        let snapshot = self.orchestrator.capture().await.unwrap();
        assert_eq!(snapshot.status, CaptureStatus::Captured);
        snapshot
    }
}
