//! HTTP API for health checks, Prometheus metrics and read-only views of
//! the controller state

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use controller_lib::{
    health::{ComponentStatus, HealthRegistry},
    DatapathId, PortNo, TrafficClass, TrafficController,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub controller: Arc<TrafficController>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, controller: Arc<TrafficController>) -> Self {
        Self {
            health_registry,
            controller,
        }
    }
}

#[derive(Debug, Serialize)]
struct QTableView {
    paths: Vec<PortNo>,
    classes: BTreeMap<&'static str, Vec<f64>>,
}

#[derive(Debug, Serialize)]
struct SwitchesView {
    datapaths: Vec<DatapathId>,
    gateway_datapath_id: DatapathId,
}

/// 200 while operational, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn qtable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let table = state.controller.q_table().await;
    let classes = TrafficClass::ALL
        .iter()
        .map(|class| (class.as_str(), table.row(*class).to_vec()))
        .collect();

    Json(QTableView {
        paths: state.controller.config().uplink_port_list.clone(),
        classes,
    })
}

async fn paths(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.controller.path_loads().await)
}

async fn switches(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SwitchesView {
        datapaths: state.controller.active_datapaths().await,
        gateway_datapath_id: state.controller.config().gateway_datapath_id,
    })
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/qtable", get(qtable))
        .route("/api/v1/paths", get(paths))
        .route("/api/v1/switches", get(switches))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use controller_lib::health::components;
    use controller_lib::{
        ChannelSouthbound, ControllerConfig, Notification, SouthboundCommand,
        TrafficControllerBuilder,
    };
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    async fn setup() -> (Router, Arc<AppState>, mpsc::Receiver<SouthboundCommand>) {
        let (southbound, rx) = ChannelSouthbound::new(64);

        let controller = TrafficControllerBuilder::new(ControllerConfig::default())
            .southbound(Arc::new(southbound))
            .seed(5)
            .build()
            .unwrap();

        let health = HealthRegistry::new();
        health.register(components::POLLER).await;

        let state = Arc::new(AppState::new(health, Arc::new(controller)));
        (create_router(state.clone()), state, rx)
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
    async fn test_healthz_degraded_is_ok() {
        let (app, state, _rx) = setup().await;
        state
            .health_registry
            .set_degraded(components::CLASSIFIER, "model not loaded")
            .await;

        let (status, body) = get_json(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_readyz_not_ready_before_startup() {
        let (app, _state, _rx) = setup().await;
        let (status, body) = get_json(app, "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
    }

    #[tokio::test]
    async fn test_qtable_lists_every_class() {
        let (app, _state, _rx) = setup().await;
        let (status, body) = get_json(app, "/api/v1/qtable").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paths"], serde_json::json!([5, 6, 7, 8, 9]));
        assert_eq!(body["classes"]["video"], serde_json::json!([0.0, 0.0, 0.0, 0.0, 0.0]));
        assert_eq!(body["classes"].as_object().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_paths_and_switches() {
        let (app, state, _rx) = setup().await;
        state
            .controller
            .handle(Notification::SwitchConnected { datapath_id: 1 })
            .await
            .unwrap();

        let (status, body) = get_json(app.clone(), "/api/v1/paths").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 5);
        assert_eq!(body[0]["port"], 5);
        assert!(body[0]["predicted_load"].is_null());

        let (status, body) = get_json(app, "/api/v1/switches").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["datapaths"], serde_json::json!([1]));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (app, _state, _rx) = setup().await;
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
