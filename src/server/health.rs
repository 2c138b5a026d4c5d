use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use super::AppState;

const STALE_THRESHOLD_MS: i64 = 5_000;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub alarm_count: usize,
    pub tick_age_ms: i64,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let last_tick = *state.last_tick.borrow();
    let tick_age_ms = (Utc::now() - last_tick).num_milliseconds().max(0);
    let alarm_count = state.index.len().await;
    let uptime_seconds = state.start_time.elapsed().as_secs();

    let status = if tick_age_ms > STALE_THRESHOLD_MS { "degraded" } else { "ok" };
    let response = HealthResponse {
        status: status.to_string(),
        uptime_seconds,
        alarm_count,
        tick_age_ms,
    };

    let code = if tick_age_ms > STALE_THRESHOLD_MS {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BroadcastBus;
    use crate::scheduler::SchedulerIndex;
    use crate::storage::memory::InMemoryAlarmStore;
    use std::time::Instant;
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_health_reports_ok_when_tick_recent() {
        let (_tx, rx) = watch::channel(Utc::now());
        let state = Arc::new(AppState {
            store: Arc::new(InMemoryAlarmStore::new()),
            bus: Arc::new(BroadcastBus::new(16)),
            index: Arc::new(SchedulerIndex::new()),
            config: Arc::new(crate::models::SchedulerConfig::default()),
            start_time: Instant::now(),
            last_tick: rx,
        });
        let response = health_check(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_degraded_when_tick_stale() {
        let stale = Utc::now() - chrono::Duration::seconds(10);
        let (_tx, rx) = watch::channel(stale);
        let state = Arc::new(AppState {
            store: Arc::new(InMemoryAlarmStore::new()),
            bus: Arc::new(BroadcastBus::new(16)),
            index: Arc::new(SchedulerIndex::new()),
            config: Arc::new(crate::models::SchedulerConfig::default()),
            start_time: Instant::now(),
            last_tick: rx,
        });
        let response = health_check(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
