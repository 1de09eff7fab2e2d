//! HTTP surface: the drain endpoint and the metrics/health readers.
//!
//! The handlers stay thin: `POST /logdrains` reduces the request to a
//! [`Delivery`] and lets the core ingress decide; `GET /metrics` serializes
//! a snapshot. All admission and aggregation logic lives in
//! `drainspout-core`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use drainspout_core::ingress::{Delivery, Ingress};
use drainspout_core::metrics::MetricsHub;

#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<Ingress>,
    pub hub: Arc<MetricsHub>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/logdrains", post(receive_drain))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

async fn receive_drain(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    let delivery = Delivery {
        method: "POST".to_string(),
        content_type: header("content-type"),
        user_agent: header("user-agent"),
        msg_count: headers
            .get("logplex-msg-count")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        frame_id: header("logplex-frame-id"),
        remote_addr: addr.ip().to_string(),
        body: body.to_vec(),
    };

    let admission = state.ingress.admit(delivery).await;
    StatusCode::from_u16(admission.http_status()).unwrap_or(StatusCode::OK)
}

async fn metrics(State(state): State<AppState>) -> Response {
    let snapshot = state.hub.snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(%err, "failed to encode metrics snapshot");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": "drainspout",
        "version": drainspout_core::VERSION,
    }))
}
