use chrono::NaiveDate;
use tauri::State;

use crate::{app::AppState, backend::AttendanceGateway, clock::Clock, db::models::AttendanceRecord};

const DEFAULT_HISTORY_LIMIT: usize = 30;

/// Status check for the home screen. Lookup failures read as "not marked";
/// the capture pipeline runs its own strict check before writing.
#[tauri::command]
pub async fn has_marked_today(
    state: State<'_, AppState>,
    subject_id: String,
    date: Option<NaiveDate>,
) -> Result<bool, String> {
    let date = date.unwrap_or_else(|| state.clock.now().date());
    Ok(state.guard.has_marked_today_lenient(&subject_id, date).await)
}

#[tauri::command]
pub async fn list_attendance(
    state: State<'_, AppState>,
    subject_id: String,
    limit: Option<usize>,
) -> Result<Vec<AttendanceRecord>, String> {
    state
        .gateway
        .list_attendance(&subject_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await
        .map_err(|e| e.to_string())
}
