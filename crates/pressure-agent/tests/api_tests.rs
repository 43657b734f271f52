//! Integration tests for the agent API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use pressure_lib::{
    api::{create_router, AppState},
    health::{components, HealthRegistry, UNHEALTHY_AFTER_FAILURES},
    observability::ControllerMetrics,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::WATCHER).await;
    health_registry.register(components::CONTROLLER).await;
    health_registry.register(components::CLUSTER_API).await;

    let state = Arc::new(AppState::new(health_registry, ControllerMetrics::new()));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["watcher"].is_object());
    assert!(health["components"]["controller"].is_object());
    assert!(health["components"]["cluster_api"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .record_failure(components::WATCHER, "malformed /proc/pressure/cpu")
        .await;

    let (status, body) = get(app, "/healthz").await;

    // degraded is still operational
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["watcher"]["consecutive_failures"], 1);
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    for _ in 0..UNHEALTHY_AFTER_FAILURES {
        state
            .health_registry
            .record_failure(components::CLUSTER_API, "connection refused")
            .await;
    }

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_before_bootstrap() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_cluster_api_unhealthy() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    for _ in 0..UNHEALTHY_AFTER_FAILURES {
        state
            .health_registry
            .record_failure(components::CLUSTER_API, "connection refused")
            .await;
    }

    let (status, _body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.set_threshold_exceeded(true);
    state.metrics.set_enabled(true);
    state.metrics.inc_threshold_exceeded();
    state.metrics.inc_recovered();
    state.metrics.inc_pods_evicted();
    state.metrics.inc_acquisition_errors();
    state.metrics.inc_platform_errors("write");

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    for name in [
        "pressure_agent_threshold_exceeded",
        "pressure_agent_threshold_exceeded_total",
        "pressure_agent_recovered_total",
        "pressure_agent_pods_evicted_total",
        "pressure_agent_enabled",
        "pressure_agent_acquisition_errors_total",
    ] {
        assert!(metrics_text.contains(name), "missing {}", name);
    }
    assert!(metrics_text.contains("pressure_agent_platform_errors_total{kind=\"write\"}"));
}

#[tokio::test]
async fn test_plain_health_endpoint() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/-/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK\n");
}
