//! Alert endpoints

use axum::{
    Json,
    extract::{Query, State},
};

use crate::api::error::ApiResult;
use crate::api::state::ApiState;
use crate::api::types::{AlertQuery, AlertsResponse};

/// GET /api/v1/alerts?device_id=
///
/// Active alerts, newest first
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertQuery>,
) -> ApiResult<Json<AlertsResponse>> {
    let alerts = state.store.active_alerts(query.device_id.as_deref()).await?;

    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}
