pub mod health;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bus::Bus;
use crate::models::SchedulerConfig;
use crate::scheduler::SchedulerIndex;
use crate::storage::AlarmStore;

/// Shared application state for the Axum server.
pub struct AppState {
    pub store: Arc<dyn AlarmStore>,
    pub bus: Arc<dyn Bus>,
    pub index: Arc<SchedulerIndex>,
    pub config: Arc<SchedulerConfig>,
    pub start_time: Instant,
    pub last_tick: watch::Receiver<chrono::DateTime<chrono::Utc>>,
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/alarms", get(routes::list_alarms).post(routes::create_alarm))
        .route(
            "/alarms/{code_id}",
            get(routes::get_alarm).delete(routes::cancel_alarm),
        )
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BroadcastBus;
    use crate::storage::memory::InMemoryAlarmStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn make_test_state() -> Arc<AppState> {
        let (_tick_tx, tick_rx) = watch::channel(Utc::now());
        Arc::new(AppState {
            store: Arc::new(InMemoryAlarmStore::new()),
            bus: Arc::new(BroadcastBus::new(64)),
            index: Arc::new(SchedulerIndex::new()),
            config: Arc::new(SchedulerConfig::default()),
            start_time: Instant::now(),
            last_tick: tick_rx,
        })
    }

    async fn body_string(body: Body) -> String {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn new_alarm_json(code_id: &str) -> String {
        serde_json::json!({
            "code_id": code_id,
            "email": "user@example.com",
            "time": "09:00:00",
            "timezone": "UTC",
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health_returns_200() {
        let state = make_test_state();
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value =
            serde_json::from_str(&body_string(response.into_body()).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["tick_age_ms"].is_number());
    }

    #[tokio::test]
    async fn test_create_alarm_returns_201() {
        let state = make_test_state();
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/alarms")
                    .header("content-type", "application/json")
                    .body(Body::from(new_alarm_json("A1")))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let json: serde_json::Value =
            serde_json::from_str(&body_string(response.into_body()).await).unwrap();
        assert_eq!(json["code_id"], "A1");
    }

    #[tokio::test]
    async fn test_create_duplicate_alarm_returns_409() {
        let state = make_test_state();
        let app = create_router(state.clone());
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/alarms")
                    .header("content-type", "application/json")
                    .body(Body::from(new_alarm_json("A1")))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/alarms")
                    .header("content-type", "application/json")
                    .body(Body::from(new_alarm_json("A1")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_create_invalid_alarm_returns_400() {
        let state = make_test_state();
        let app = create_router(state);

        let body = serde_json::json!({
            "code_id": "",
            "email": "not-an-email",
            "time": "25:99",
        })
        .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/alarms")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_unknown_alarm_returns_404() {
        let state = make_test_state();
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/alarms/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_alarm_returns_204() {
        let state = make_test_state();
        let app = create_router(state.clone());
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/alarms")
                    .header("content-type", "application/json")
                    .body(Body::from(new_alarm_json("A1")))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/alarms/A1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_list_alarms_filters_by_email() {
        let state = make_test_state();
        let app = create_router(state.clone());
        for code_id in ["A1", "A2"] {
            app.clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/alarms")
                        .header("content-type", "application/json")
                        .body(Body::from(new_alarm_json(code_id)))
                        .unwrap(),
                )
                .await
                .unwrap();
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/alarms?email=user@example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: Vec<serde_json::Value> =
            serde_json::from_str(&body_string(response.into_body()).await).unwrap();
        assert_eq!(json.len(), 2);
    }
}
