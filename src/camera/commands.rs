//! Commands the webview calls to feed its camera and geolocation results
//! back into the bridge devices.

use tauri::State;

use crate::{
    app::AppState,
    camera::CameraError,
    location::{GeoPoint, LocationError},
};

/// `error_name` is the `DOMException` name from `getUserMedia`, absent when
/// the stream was granted. Returns false for a stale request.
#[tauri::command]
pub fn resolve_camera_request(
    state: State<AppState>,
    request_id: u64,
    error_name: Option<String>,
    error_message: Option<String>,
) -> Result<bool, String> {
    let outcome = match error_name {
        None => Ok(()),
        Some(name) => Err(CameraError::from_dom_error(
            &name,
            error_message.as_deref().unwrap_or_default(),
        )),
    };
    Ok(state.camera.resolve_request(request_id, outcome))
}

/// An encoded still (JPEG/PNG/WebP) drawn from the live video element.
#[tauri::command]
pub fn push_camera_frame(state: State<AppState>, frame: Vec<u8>) -> Result<(), String> {
    state
        .camera
        .push_encoded_frame(&frame)
        .map_err(|e| format!("{e:#}"))
}

#[tauri::command]
pub fn report_position(
    state: State<AppState>,
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
) -> Result<(), String> {
    state.locator.report(Ok(GeoPoint {
        latitude,
        longitude,
        accuracy_m: accuracy,
    }));
    Ok(())
}

/// `code` is `GeolocationPositionError.code`.
#[tauri::command]
pub fn report_position_error(
    state: State<AppState>,
    code: u16,
    message: Option<String>,
) -> Result<(), String> {
    state.locator.report(Err(LocationError::from_position_code(
        code,
        message.as_deref().unwrap_or_default(),
    )));
    Ok(())
}
