//! Device endpoints

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
};

use crate::analyzer::ConnectionTestResult;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::api::types::{DeviceView, DevicesResponse, LogRequest};
use crate::devices::Device;
use crate::log_collector::LogCollectionSummary;

/// GET /api/v1/devices
///
/// Every configured device with its latest scan status and alert count
pub async fn list_devices(State(state): State<ApiState>) -> ApiResult<Json<DevicesResponse>> {
    let mut alert_counts: HashMap<String, usize> = HashMap::new();
    for alert in state.store.active_alerts(None).await? {
        *alert_counts.entry(alert.device_id).or_default() += 1;
    }

    let devices: Vec<DeviceView> = state
        .registry
        .statuses()
        .await
        .into_iter()
        .map(|(device, status)| DeviceView {
            active_alerts: alert_counts.get(&device.id).copied().unwrap_or(0),
            device,
            status,
        })
        .collect();

    Ok(Json(DevicesResponse {
        count: devices.len(),
        devices,
    }))
}

/// POST /api/v1/devices/:id/test
///
/// Diagnostic connection test. Never writes alert state.
pub async fn test_connection(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ConnectionTestResult>> {
    let device = find_device(&state, &id).await?;
    Ok(Json(state.analyzer.test_connection(&device).await))
}

/// POST /api/v1/devices/:id/logs
///
/// Collects new SEL/MEL entries now. Body: `{"force_refresh": bool}` (optional).
pub async fn collect_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<LogRequest>>,
) -> ApiResult<Json<LogCollectionSummary>> {
    let device = find_device(&state, &id).await?;
    let request = body.map(|Json(request)| request).unwrap_or_default();

    state
        .log_collector
        .collect(&device, request.force_refresh)
        .await
        .map(Json)
        .map_err(|e| ApiError::Upstream(format!("{e:#}")))
}

async fn find_device(state: &ApiState, id: &str) -> ApiResult<Device> {
    state
        .registry
        .device(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("device '{id}' not found")))
}
