use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::errors::AlarmError;
use crate::models::{AlarmResponse, AlarmStatus, NewAlarm};
use crate::storage::AlarmFilter;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn error_response(status: StatusCode, error: &str, message: &str) -> impl IntoResponse {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
}

/// Maps a domain error onto the HTTP status taxonomy: validation -> 400, conflict/stale -> 409,
/// not-found -> 404, everything else -> 500.
fn map_error(err: AlarmError) -> axum::response::Response {
    let (status, code) = match &err {
        AlarmError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        AlarmError::Conflict(_) | AlarmError::Stale(_) => (StatusCode::CONFLICT, "conflict"),
        AlarmError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        AlarmError::Storage(_) | AlarmError::Bus(_) | AlarmError::Internal(_) | AlarmError::Timeout(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    };
    error_response(status, code, &err.to_string()).into_response()
}

#[derive(Debug, Deserialize, Default)]
pub struct ListAlarmsParams {
    pub email: Option<String>,
    pub status: Option<String>,
}

/// POST /alarms
pub async fn create_alarm(
    State(state): State<Arc<AppState>>,
    Json(new_alarm): Json<NewAlarm>,
) -> impl IntoResponse {
    let code_id = new_alarm.code_id.clone();
    match state
        .store
        .create(new_alarm, &state.config.scheduler_timezone_default)
        .await
    {
        Ok(alarm) => {
            state.index.add(&alarm.code_id, alarm.utc_time.second_of_day()).await;
            tracing::info!(code_id = %code_id, "alarm created");
            (StatusCode::CREATED, Json(AlarmResponse::from(alarm))).into_response()
        }
        Err(e) => {
            tracing::warn!(code_id = %code_id, error = %e, "alarm creation failed");
            map_error(e)
        }
    }
}

/// GET /alarms/{code_id}
pub async fn get_alarm(
    State(state): State<Arc<AppState>>,
    Path(code_id): Path<String>,
) -> impl IntoResponse {
    match state.store.get(&code_id).await {
        Ok(alarm) => (StatusCode::OK, Json(AlarmResponse::from(alarm))).into_response(),
        Err(e) => map_error(e),
    }
}

/// DELETE /alarms/{code_id}
pub async fn cancel_alarm(
    State(state): State<Arc<AppState>>,
    Path(code_id): Path<String>,
) -> impl IntoResponse {
    match state.store.cancel(&code_id).await {
        Ok(()) => {
            state.index.remove(&code_id).await;
            tracing::info!(code_id = %code_id, "alarm canceled");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => map_error(e),
    }
}

/// GET /alarms?email=&status=
pub async fn list_alarms(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListAlarmsParams>,
) -> impl IntoResponse {
    let status = match params.status.as_deref().map(str::parse::<AlarmStatus>) {
        Some(Ok(s)) => Some(s),
        Some(Err(e)) => return map_error(e),
        None => None,
    };
    let filter = AlarmFilter {
        email: params.email,
        status,
    };
    match state.store.list_scheduled(filter).await {
        Ok(alarms) => {
            let responses: Vec<AlarmResponse> = alarms.into_iter().map(AlarmResponse::from).collect();
            (StatusCode::OK, Json(responses)).into_response()
        }
        Err(e) => map_error(e),
    }
}
