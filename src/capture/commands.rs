use tauri::State;

use crate::{app::AppState, capture::CaptureSnapshot};

#[tauri::command]
pub async fn get_capture_state(state: State<'_, AppState>) -> Result<CaptureSnapshot, String> {
    Ok(state.capture.snapshot().await)
}

#[tauri::command]
pub async fn start_capture(
    state: State<'_, AppState>,
    subject_id: String,
) -> Result<CaptureSnapshot, String> {
    let subject_id = subject_id.trim();
    if subject_id.is_empty() {
        return Err("subject_id is required".into());
    }
    state
        .capture
        .start_camera(subject_id)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn capture_frame(state: State<'_, AppState>) -> Result<CaptureSnapshot, String> {
    state.capture.capture().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn submit_attendance(state: State<'_, AppState>) -> Result<CaptureSnapshot, String> {
    state.capture.submit().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn cancel_capture(state: State<'_, AppState>) -> Result<CaptureSnapshot, String> {
    Ok(state.capture.cancel().await)
}

#[tauri::command]
pub async fn retry_detector_init(state: State<'_, AppState>) -> Result<CaptureSnapshot, String> {
    state
        .capture
        .prepare_detector()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn discard_orphaned_upload(
    state: State<'_, AppState>,
) -> Result<CaptureSnapshot, String> {
    state
        .capture
        .discard_orphaned_upload()
        .await
        .map_err(|e| e.to_string())
}
