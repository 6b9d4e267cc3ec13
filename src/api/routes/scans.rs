//! Fleet scan endpoints

use axum::{Json, extract::State, http::StatusCode};

use crate::actors::TriggerResponse;
use crate::api::error::ApiResult;
use crate::api::state::ApiState;
use crate::api::types::{ScanRequest, ScanStatusResponse};

/// POST /api/v1/scan
///
/// Body: `{"force": bool}` (optional). Answers 202 when a scan was started and
/// 409 with the reason when it was not.
pub async fn trigger_scan(
    State(state): State<ApiState>,
    body: Option<Json<ScanRequest>>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let response = state.coordinator.trigger_scan(request.force).await?;

    let status = if response.accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(response)))
}

/// GET /api/v1/scan
///
/// Summary of the last completed fleet scan and notification counters
pub async fn scan_status(State(state): State<ApiState>) -> ApiResult<Json<ScanStatusResponse>> {
    Ok(Json(ScanStatusResponse {
        last_scan: state.coordinator.last_summary().await?,
        notifications: state.notifications.get_stats().await?,
    }))
}
