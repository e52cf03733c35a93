//! Monitor lifecycle handlers
//!
//! POST /monitor, GET /monitor, DELETE /monitor/:issue/:requester

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tmon_common::wire::parse_timestamp;
use tmon_common::{MonitorState, QueryKey};

use crate::error::{ApiError, ApiResult};
use crate::poller::MonitorStatus;
use crate::AppState;

/// POST /monitor request
///
/// Timestamps use the wire format `YYYY-MM-DDTHH:mm:ssZ`.
#[derive(Debug, Deserialize)]
pub struct StartMonitorRequest {
    pub issue: String,
    pub requester: String,
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
}

/// POST /monitor response
#[derive(Debug, Serialize)]
pub struct StartMonitorResponse {
    pub session_id: Uuid,
    pub issue: String,
    pub requester: String,
    pub state: MonitorState,
}

/// GET /monitor response
#[derive(Debug, Serialize)]
pub struct MonitorListResponse {
    pub monitors: Vec<MonitorStatus>,
}

/// POST /monitor
///
/// Starts polling for the key. Returns 202 Accepted with the session id,
/// 409 if the key is already monitored.
pub async fn start_monitor(
    State(state): State<AppState>,
    Json(request): Json<StartMonitorRequest>,
) -> ApiResult<(StatusCode, Json<StartMonitorResponse>)> {
    let key = QueryKey::new(request.issue, request.requester)?;
    let start = parse_timestamp(&request.start)?;
    let end = request.end.as_deref().map(parse_timestamp).transpose()?;

    let session_id = state.registry.start(key.clone(), start, end).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartMonitorResponse {
            session_id,
            issue: key.issue,
            requester: key.requester,
            state: MonitorState::Idle,
        }),
    ))
}

/// GET /monitor
pub async fn list_monitors(State(state): State<AppState>) -> Json<MonitorListResponse> {
    Json(MonitorListResponse {
        monitors: state.registry.list().await,
    })
}

/// DELETE /monitor/:issue/:requester
///
/// Returns the monitor's last status once its task has exited.
pub async fn stop_monitor(
    State(state): State<AppState>,
    Path((issue, requester)): Path<(String, String)>,
) -> ApiResult<Json<MonitorStatus>> {
    let key = QueryKey::new(issue, requester).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let status = state.registry.stop(&key).await?;
    Ok(Json(status))
}

pub fn monitor_routes() -> Router<AppState> {
    Router::new()
        .route("/monitor", post(start_monitor).get(list_monitors))
        .route("/monitor/:issue/:requester", delete(stop_monitor))
}
