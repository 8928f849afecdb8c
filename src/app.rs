use std::{path::Path, sync::Arc};

use anyhow::Result;
use log::{error, info};
use tauri::{AppHandle, Emitter, Manager, State};

use crate::{
    attendance::{
        commands::{has_marked_today, list_attendance},
        SameDayGuard,
    },
    backend::{self, AttendanceGateway},
    camera::{
        commands::{
            push_camera_frame, report_position, report_position_error, resolve_camera_request,
        },
        BridgeCamera, BridgeSignal,
    },
    capture::{
        commands::{
            cancel_capture, capture_frame, discard_orphaned_upload, get_capture_state,
            retry_detector_init, start_capture, submit_attendance,
        },
        CaptureListener, CaptureOrchestrator, CaptureServices, CaptureSnapshot,
    },
    clock::{Clock, SystemClock},
    face::{FaceValidationEngine, ModelLoader, SeetaDetectorFactory},
    location::BridgeLocator,
    settings::{AttendanceSettings, SettingsStore},
    utils::init_logging,
};

pub(crate) struct AppState {
    pub(crate) capture: CaptureOrchestrator,
    pub(crate) camera: BridgeCamera,
    pub(crate) locator: Arc<BridgeLocator>,
    pub(crate) guard: SameDayGuard,
    pub(crate) gateway: Arc<dyn AttendanceGateway>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: SettingsStore,
}

struct TauriCaptureListener {
    app_handle: AppHandle,
}

impl CaptureListener for TauriCaptureListener {
    fn on_state_changed(&self, snapshot: &CaptureSnapshot) {
        if let Err(err) = self.app_handle.emit("capture-state-changed", snapshot) {
            error!("Failed to emit capture state: {err}");
        }
    }
}

fn build_state(app_handle: &AppHandle, app_data_dir: &Path) -> Result<AppState> {
    let settings = SettingsStore::new(app_data_dir.join("settings.json"))?;
    let current = settings.get();

    let gateway = backend::connect(&current.backend, app_data_dir, current.gateway_timeout())?;

    let camera = {
        let handle = app_handle.clone();
        BridgeCamera::new(move |signal| {
            let emitted = match &signal {
                BridgeSignal::Open { .. } => handle.emit("camera-requested", &signal),
                BridgeSignal::Release => handle.emit("camera-released", &signal),
            };
            if let Err(err) = emitted {
                error!("Failed to emit camera signal: {err}");
            }
        })
    };
    let locator = {
        let handle = app_handle.clone();
        let locator = BridgeLocator::new(move || {
            if let Err(err) = handle.emit("location-requested", ()) {
                error!("Failed to request location: {err}");
            }
        });
        Arc::new(locator.with_timing(
            current.location.max_fix_age(),
            current.location.request_timeout(),
        ))
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let loader = ModelLoader::new(
        Arc::new(SeetaDetectorFactory),
        current.face.detector_config(),
    );
    let engine = FaceValidationEngine::with_min_face_size(loader, current.face.min_face_size_px);

    let capture = CaptureOrchestrator::new(
        CaptureServices {
            camera: Arc::new(camera.clone()),
            locator: locator.clone(),
            engine,
            gateway: gateway.clone(),
            policy: current.policy.to_policy(),
            clock: clock.clone(),
            geofence: current.geofence,
            constraints: current.camera.constraints(),
        },
        Arc::new(TauriCaptureListener {
            app_handle: app_handle.clone(),
        }),
    );

    Ok(AppState {
        capture,
        camera,
        locator,
        guard: SameDayGuard::new(gateway.clone()),
        gateway,
        clock,
        settings,
    })
}

#[tauri::command]
fn get_settings(state: State<AppState>) -> Result<AttendanceSettings, String> {
    Ok(state.settings.get())
}

/// Persists new settings. The pipeline picks them up on the next launch.
#[tauri::command]
fn update_settings(
    settings: AttendanceSettings,
    state: State<AppState>,
    app_handle: AppHandle,
) -> Result<(), String> {
    state
        .settings
        .update(settings.clone())
        .map_err(|e| e.to_string())?;

    app_handle
        .emit("settings-updated", &settings)
        .map_err(|e| e.to_string())?;

    Ok(())
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    init_logging();

    info!("Attendance kiosk starting up...");

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let result = (|| -> anyhow::Result<()> {
                let app_data_dir = app
                    .path()
                    .app_data_dir()
                    .map_err(|err| anyhow::anyhow!(err))?;
                std::fs::create_dir_all(&app_data_dir)?;

                let state = build_state(app.handle(), &app_data_dir)?;
                app.manage(state);

                Ok(())
            })();

            result.map_err(|err| err.into())
        })
        .invoke_handler(tauri::generate_handler![
            start_capture,
            capture_frame,
            submit_attendance,
            cancel_capture,
            get_capture_state,
            retry_detector_init,
            discard_orphaned_upload,
            has_marked_today,
            list_attendance,
            get_settings,
            update_settings,
            resolve_camera_request,
            push_camera_frame,
            report_position,
            report_position_error,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
