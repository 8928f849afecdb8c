mod common;

use std::{
    sync::{atomic::Ordering, Arc, Mutex},
    time::Duration,
};

use attendance_kiosk_lib::{
    backend::AttendanceGateway,
    camera::{BridgeCamera, BridgeSignal, CameraError},
    capture::CaptureStatus,
    db::models::AttendanceStatus,
    error::{CaptureError, ErrorKind},
    face::FaceError,
    location::{GeoPoint, Geofence, LocationError},
};
use chrono::{NaiveDate, NaiveTime, Weekday};
use common::{at, face, tuesday_at, CameraScript, Harness, HarnessOptions};

fn photo_count(harness: &Harness, subject_id: &str) -> usize {
    match std::fs::read_dir(harness.dir.path().join("photos").join(subject_id)) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn tuesday_morning_check_in_is_stored_as_present() {
    let harness = Harness::new();
    harness.captured("E1").await;

    let snapshot = harness.orchestrator.submit().await.unwrap();
    assert_eq!(snapshot.status, CaptureStatus::Success);
    assert!(!snapshot.camera_active);
    assert!(!snapshot.has_photo);

    let record = snapshot.record.unwrap();
    assert_eq!(record.subject_id, "E1");
    assert_eq!(record.status, AttendanceStatus::Present);
    assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    assert_eq!(record.check_in_time, NaiveTime::from_hms_opt(9, 5, 0).unwrap());
    assert!(record.photo_url.starts_with("file://"));
    assert_eq!(record.location, Some(GeoPoint::new(6.5244, 3.3792)));

    assert_eq!(harness.gateway.uploads(), 1);
    assert_eq!(harness.gateway.inserts(), 1);
    assert_eq!(photo_count(&harness, "E1"), 1);
    assert_eq!(harness.camera.stops(), 1);
    assert_eq!(harness.camera.live_streams(), 0);

    let stored = harness.gateway.list_attendance("E1", 10).await.unwrap();
    assert_eq!(stored, vec![record]);

    assert_eq!(
        harness.listener.statuses(),
        vec![
            CaptureStatus::CameraRequested,
            CaptureStatus::CameraActive,
            CaptureStatus::Capturing,
            CaptureStatus::Validating,
            CaptureStatus::Captured,
            CaptureStatus::Submitting,
            CaptureStatus::Success,
        ]
    );
}

#[tokio::test]
async fn successful_submission_updates_last_seen_in_background() {
    let harness = Harness::new();
    harness.captured("E1").await;
    harness.orchestrator.submit().await.unwrap();

    let db = harness.gateway.inner.database().clone();
    let mut last_seen = None;
    for _ in 0..200 {
        last_seen = db.last_seen("E1").await.unwrap();
        if last_seen.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last_seen, Some(tuesday_at(9, 5)));
}

#[tokio::test]
async fn check_in_after_threshold_is_late_then_absent() {
    let harness = Harness::with(HarnessOptions {
        now: tuesday_at(9, 40),
        ..HarnessOptions::default()
    });
    harness.captured("E1").await;
    let record = harness.orchestrator.submit().await.unwrap().record.unwrap();
    assert_eq!(record.status, AttendanceStatus::Late);

    harness.clock.set(at(2024, 3, 6, 9, 41));
    harness.captured("E1").await;
    let record = harness.orchestrator.submit().await.unwrap().record.unwrap();
    assert_eq!(record.status, AttendanceStatus::Absent);
    assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 3, 6).unwrap());
}

#[tokio::test]
async fn second_submission_same_day_is_already_marked() {
    let harness = Harness::new();
    harness.captured("E1").await;
    harness.orchestrator.submit().await.unwrap();

    harness.clock.set(tuesday_at(11, 0));
    harness.captured("E1").await;
    let err = harness.orchestrator.submit().await.unwrap_err();

    assert!(matches!(err, CaptureError::AlreadyMarked { .. }));
    assert_eq!(err.kind(), ErrorKind::BusinessRule);
    assert_eq!(harness.gateway.uploads(), 1);
    assert_eq!(harness.gateway.inserts(), 1);

    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.status, CaptureStatus::Captured);
    assert_eq!(snapshot.error_kind, Some(ErrorKind::BusinessRule));
    assert!(snapshot.has_photo);
    assert!(snapshot.camera_active);
}

#[tokio::test]
async fn rejected_frames_keep_the_camera_running() {
    let harness = Harness::new();
    harness.orchestrator.start_camera("E1").await.unwrap();
    harness.orchestrator.prepare_detector().await.unwrap();

    harness.detector.will_find(vec![face(200.0), face(180.0)]);
    let err = harness.orchestrator.capture().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.status, CaptureStatus::ValidationFailed);
    assert!(snapshot.message.unwrap().contains("Multiple faces detected (2)"));
    assert_eq!(snapshot.validation.unwrap().face_count, 2);
    assert!(snapshot.camera_active);

    harness.detector.will_find(vec![face(80.0)]);
    let err = harness.orchestrator.capture().await.unwrap_err();
    assert!(err.to_string().contains("80x80"));

    harness.detector.will_find(Vec::new());
    let err = harness.orchestrator.capture().await.unwrap_err();
    assert!(err.to_string().starts_with("No face detected"));

    harness.detector.will_find(vec![face(150.0)]);
    let snapshot = harness.orchestrator.capture().await.unwrap();
    assert_eq!(snapshot.status, CaptureStatus::Captured);
    assert!(snapshot.validation.unwrap().is_valid);

    assert_eq!(harness.camera.opens.load(Ordering::SeqCst), 1);
    assert_eq!(harness.camera.stops(), 0);
}

#[tokio::test]
async fn unloaded_detector_blocks_capture_until_retried() {
    let harness = Harness::with(HarnessOptions {
        detector_fails: true,
        ..HarnessOptions::default()
    });
    harness.orchestrator.start_camera("E1").await.unwrap();
    harness.detector.will_find(vec![face(200.0)]);

    let err = harness.orchestrator.capture().await.unwrap_err();
    assert!(matches!(err, CaptureError::Face(FaceError::DetectorNotReady)));
    assert_eq!(err.kind(), ErrorKind::Environment);
    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.status, CaptureStatus::CameraActive);
    assert!(!snapshot.detector_ready);

    let err = harness.orchestrator.prepare_detector().await.unwrap_err();
    match err {
        CaptureError::Face(FaceError::DetectorInit(message)) => {
            assert!(message.contains("model download failed"))
        }
        other => panic!("unexpected error {other:?}"),
    }

    harness.factory.fail.store(false, Ordering::SeqCst);
    let snapshot = harness.orchestrator.prepare_detector().await.unwrap();
    assert!(snapshot.detector_ready);

    let snapshot = harness.orchestrator.capture().await.unwrap();
    assert_eq!(snapshot.status, CaptureStatus::Captured);
}

#[tokio::test]
async fn denied_camera_returns_to_idle() {
    let harness = Harness::with(HarnessOptions {
        camera: CameraScript::Deny(CameraError::PermissionDenied),
        ..HarnessOptions::default()
    });

    let err = harness.orchestrator.start_camera("E1").await.unwrap_err();
    assert!(matches!(err, CaptureError::Camera(CameraError::PermissionDenied)));
    assert_eq!(err.kind(), ErrorKind::Environment);

    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.status, CaptureStatus::Idle);
    assert_eq!(snapshot.message.as_deref(), Some("camera permission denied"));

    let err = harness.orchestrator.capture().await.unwrap_err();
    assert!(matches!(err, CaptureError::InvalidState { .. }));
}

#[tokio::test]
async fn transport_failure_allows_retry_without_recapture() {
    let harness = Harness::new();
    harness.captured("E1").await;

    harness.gateway.fail_uploads.store(true, Ordering::SeqCst);
    let err = harness.orchestrator.submit().await.unwrap_err();
    assert!(matches!(err, CaptureError::Upload(_)));
    assert_eq!(err.kind(), ErrorKind::Transport);
    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.status, CaptureStatus::SubmitFailed);
    assert!(snapshot.has_photo);
    assert_eq!(harness.gateway.inserts(), 0);

    harness.gateway.fail_uploads.store(false, Ordering::SeqCst);
    let snapshot = harness.orchestrator.submit().await.unwrap();
    assert_eq!(snapshot.status, CaptureStatus::Success);
    assert_eq!(harness.detector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.gateway.uploads(), 2);
    assert_eq!(harness.gateway.inserts(), 1);
}

#[tokio::test]
async fn failed_lookup_blocks_submission() {
    let harness = Harness::new();
    harness.captured("E1").await;

    harness.gateway.fail_exists.store(true, Ordering::SeqCst);
    let err = harness.orchestrator.submit().await.unwrap_err();
    assert!(matches!(err, CaptureError::GuardCheck(_)));
    assert_eq!(
        harness.orchestrator.snapshot().await.status,
        CaptureStatus::SubmitFailed
    );
    assert_eq!(harness.gateway.uploads(), 0);
    assert_eq!(harness.gateway.inserts(), 0);
}

#[tokio::test]
async fn insert_failure_reports_orphaned_upload() {
    let harness = Harness::new();
    harness.captured("E1").await;

    harness.gateway.fail_inserts.store(true, Ordering::SeqCst);
    let err = harness.orchestrator.submit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    let orphan = err.orphaned_upload().unwrap().to_string();
    assert!(orphan.starts_with("E1/2024-03-05_090500_"));

    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.status, CaptureStatus::SubmitFailed);
    assert_eq!(snapshot.orphaned_upload.as_deref(), Some(orphan.as_str()));
    assert!(harness.gateway.inner.photos().exists(&orphan).await);

    let snapshot = harness.orchestrator.discard_orphaned_upload().await.unwrap();
    assert_eq!(snapshot.orphaned_upload, None);
    assert!(!harness.gateway.inner.photos().exists(&orphan).await);

    harness.gateway.fail_inserts.store(false, Ordering::SeqCst);
    let snapshot = harness.orchestrator.submit().await.unwrap();
    assert_eq!(snapshot.status, CaptureStatus::Success);
    assert_eq!(photo_count(&harness, "E1"), 1);
}

#[tokio::test]
async fn weekend_submission_is_refused() {
    let harness = Harness::with(HarnessOptions {
        now: at(2024, 3, 9, 9, 0),
        ..HarnessOptions::default()
    });
    harness.captured("E1").await;

    let err = harness.orchestrator.submit().await.unwrap_err();
    assert!(matches!(
        err,
        CaptureError::Policy(attendance_kiosk_lib::attendance::PolicyError::WeekendNotAllowed(
            Weekday::Sat
        ))
    ));
    assert_eq!(err.kind(), ErrorKind::BusinessRule);
    assert_eq!(
        harness.orchestrator.snapshot().await.status,
        CaptureStatus::Captured
    );
    assert_eq!(harness.gateway.uploads(), 0);
}

#[tokio::test]
async fn geofence_requires_position_inside_radius() {
    let site = Geofence {
        latitude: 6.5244,
        longitude: 3.3792,
        radius_m: 100.0,
    };

    let far = Harness::with(HarnessOptions {
        position: Ok(GeoPoint::new(6.6000, 3.3792)),
        geofence: Some(site),
        ..HarnessOptions::default()
    });
    far.captured("E1").await;
    let err = far.orchestrator.submit().await.unwrap_err();
    match err {
        CaptureError::OutsideGeofence { distance_m, .. } => assert!(distance_m > 8_000.0),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(far.orchestrator.snapshot().await.status, CaptureStatus::Captured);
    assert_eq!(far.gateway.uploads(), 0);

    let unknown = Harness::with(HarnessOptions {
        position: Err(LocationError::PermissionDenied),
        geofence: Some(site),
        ..HarnessOptions::default()
    });
    unknown.captured("E1").await;
    let err = unknown.orchestrator.submit().await.unwrap_err();
    assert!(matches!(err, CaptureError::LocationRequired(_)));
    assert_eq!(err.kind(), ErrorKind::BusinessRule);

    let near = Harness::with(HarnessOptions {
        position: Ok(GeoPoint::new(6.5250, 3.3792)),
        geofence: Some(site),
        ..HarnessOptions::default()
    });
    near.captured("E1").await;
    assert!(near.orchestrator.submit().await.is_ok());
}

#[tokio::test]
async fn missing_position_without_geofence_still_records() {
    let harness = Harness::with(HarnessOptions {
        position: Err(LocationError::Timeout),
        ..HarnessOptions::default()
    });
    let snapshot = harness.captured("E1").await;
    assert!(snapshot.location_error.is_some());

    let record = harness.orchestrator.submit().await.unwrap().record.unwrap();
    assert_eq!(record.location, None);
}

#[tokio::test]
async fn cancel_releases_stream_and_discards_photo() {
    let harness = Harness::new();
    harness.captured("E1").await;

    let snapshot = harness.orchestrator.cancel().await;
    assert_eq!(snapshot.status, CaptureStatus::Idle);
    assert!(!snapshot.has_photo);
    assert!(!snapshot.camera_active);
    assert_eq!(harness.camera.stops(), 1);

    harness.orchestrator.cancel().await;
    assert_eq!(harness.camera.stops(), 1);
    assert_eq!(harness.camera.live_streams(), 0);

    let err = harness.orchestrator.submit().await.unwrap_err();
    assert!(matches!(err, CaptureError::InvalidState { .. }));
    assert_eq!(harness.gateway.uploads(), 0);
}

#[tokio::test]
async fn cancel_while_camera_is_pending_abandons_the_request() {
    let signals = Arc::new(Mutex::new(Vec::new()));
    let bridge = {
        let signals = signals.clone();
        BridgeCamera::new(move |signal| signals.lock().unwrap().push(signal))
    };
    let harness = Harness::with(HarnessOptions {
        device: Some(Arc::new(bridge.clone())),
        ..HarnessOptions::default()
    });

    let pending = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.start_camera("E1").await })
    };
    while signals.lock().unwrap().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        harness.orchestrator.snapshot().await.status,
        CaptureStatus::CameraRequested
    );

    harness.orchestrator.cancel().await;
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, CaptureError::Cancelled));

    let request_id = match signals.lock().unwrap()[0] {
        BridgeSignal::Open { request_id, .. } => request_id,
        BridgeSignal::Release => panic!("expected an open request first"),
    };
    // The user granted access after giving up; the bridge shuts it down.
    assert!(!bridge.resolve_request(request_id, Ok(())));
    assert_eq!(signals.lock().unwrap().last(), Some(&BridgeSignal::Release));
    assert_eq!(
        harness.orchestrator.snapshot().await.status,
        CaptureStatus::Idle
    );
}

#[tokio::test]
async fn cancel_after_upload_keeps_the_photo_reconcilable() {
    let harness = Harness::new();
    harness.captured("E1").await;
    harness.gateway.hold_uploads.store(true, Ordering::SeqCst);

    let pending = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.submit().await })
    };
    harness.gateway.hold.reached.notified().await;
    assert_eq!(photo_count(&harness, "E1"), 1);

    let snapshot = harness.orchestrator.cancel().await;
    assert_eq!(snapshot.status, CaptureStatus::Idle);
    harness.gateway.hold.release.notify_one();

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    let path = err.orphaned_upload().unwrap().to_string();
    assert!(path.starts_with("E1/"));
    assert_eq!(harness.gateway.inserts(), 0);

    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.status, CaptureStatus::Idle);
    assert_eq!(snapshot.orphaned_upload.as_deref(), Some(path.as_str()));

    let snapshot = harness.orchestrator.discard_orphaned_upload().await.unwrap();
    assert_eq!(snapshot.orphaned_upload, None);
    assert_eq!(photo_count(&harness, "E1"), 0);
}

#[tokio::test]
async fn cancel_during_failed_insert_keeps_the_photo_reconcilable() {
    let harness = Harness::new();
    harness.captured("E1").await;
    harness.gateway.hold_inserts.store(true, Ordering::SeqCst);
    harness.gateway.fail_inserts.store(true, Ordering::SeqCst);

    let pending = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.submit().await })
    };
    harness.gateway.hold.reached.notified().await;
    harness.orchestrator.cancel().await;
    harness.gateway.hold.release.notify_one();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, CaptureError::CancelledAfterUpload { .. }));

    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.status, CaptureStatus::Idle);
    assert!(snapshot.orphaned_upload.is_some());
    assert_eq!(photo_count(&harness, "E1"), 1);
}

#[tokio::test]
async fn cancel_during_successful_insert_discards_the_result() {
    let harness = Harness::new();
    harness.captured("E1").await;
    harness.gateway.hold_inserts.store(true, Ordering::SeqCst);

    let pending = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.submit().await })
    };
    harness.gateway.hold.reached.notified().await;
    harness.orchestrator.cancel().await;
    harness.gateway.hold.release.notify_one();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, CaptureError::Cancelled));

    // The record references the photo, so nothing is orphaned.
    let snapshot = harness.orchestrator.snapshot().await;
    assert_eq!(snapshot.status, CaptureStatus::Idle);
    assert_eq!(snapshot.record, None);
    assert_eq!(snapshot.orphaned_upload, None);
    let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    assert!(harness.gateway.attendance_exists("E1", date).await.unwrap());
}

#[tokio::test]
async fn dropping_the_orchestrator_releases_the_stream() {
    let harness = Harness::new();
    harness.orchestrator.start_camera("E1").await.unwrap();
    assert_eq!(harness.camera.live_streams(), 1);

    let Harness {
        orchestrator,
        camera,
        dir: _dir,
        ..
    } = harness;
    drop(orchestrator);

    assert_eq!(camera.stops(), 1);
    assert_eq!(camera.live_streams(), 0);
}

#[tokio::test]
async fn actions_out_of_order_are_rejected() {
    let harness = Harness::new();
    let err = harness.orchestrator.capture().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    harness.orchestrator.start_camera("E1").await.unwrap();
    let err = harness.orchestrator.start_camera("E2").await.unwrap_err();
    assert!(matches!(
        err,
        CaptureError::InvalidState {
            state: CaptureStatus::CameraActive,
            ..
        }
    ));
    let err = harness.orchestrator.submit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}
