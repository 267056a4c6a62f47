//! Integration tests for the forecaster API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use forecast_core::{
    health::{components, HealthRegistry},
    manager::Manager,
    observability::StructuredLogger,
    pool::SensorPool,
    predictor::{Forecaster, SmoothingPredictor},
    store::MemoryStore,
    ForecastConfig, ForecastService, SensorId,
};
use forecaster::api::{create_router, AppState};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>, broadcast::Sender<()>) {
    let config = ForecastConfig {
        agent_count: 2,
        ..Default::default()
    };

    let health_registry = Arc::new(HealthRegistry::new());
    health_registry.register(components::POOL).await;
    health_registry.register(components::STORE).await;

    let store = Arc::new(MemoryStore::new());
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let pool = SensorPool::start(
        &config,
        store.clone(),
        health_registry.clone(),
        StructuredLogger::new("test"),
        shutdown_rx,
    )
    .await;
    let manager = Arc::new(Manager::new(store.clone(), &config));
    let forecaster = Forecaster::new(
        Arc::new(SmoothingPredictor::new(config.clone())),
        config.clone(),
    );
    let service = ForecastService::new(config, store, pool, manager, forecaster);

    let state = Arc::new(AppState::new(health_registry, service));
    let router = create_router(state.clone());

    (router, state, shutdown)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _shutdown) = setup_test_app().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_store_degraded() {
    let (app, state, _shutdown) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::STORE, "store unreachable")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _shutdown) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::POOL, "no agents")
        .await;

    let (status, _) = get_json(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let (app, state, _shutdown) = setup_test_app().await;

    let (status, readiness) = get_json(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;

    let (status, readiness) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_text() {
    let (app, state, _shutdown) = setup_test_app().await;
    state.service.feed("n1", "cpu", 60, 1.0).await.unwrap();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );
}

#[tokio::test]
async fn test_state_exposes_registered_metrics() {
    let (app, state, _shutdown) = setup_test_app().await;
    state.service.feed("n1", "cpu", 60, 1.0).await.unwrap();
    state.service.feed("n1", "mem", 60, 2.0).await.unwrap();

    let (status, record) = get_json(app, "/state").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["id"], "manager");
    assert_eq!(record["sensor_agents"], 2);
    let node = record["metrics"]["n1"].as_array().unwrap();
    assert_eq!(node.len(), 2);
    assert!(node.contains(&serde_json::json!(SensorId::new("n1", "cpu").to_string())));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, _state, _shutdown) = setup_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/predict").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
