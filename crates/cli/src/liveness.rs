//! Minimal liveness endpoint.
//!
//! `/health` answers deployment probes, `/status` exposes the bridge's
//! operational snapshot (limiter, correlation store, connection health).

use std::sync::Arc;

use {
    axum::{Json, Router, extract::State, routing::get},
    tracing::{info, warn},
    trestle_bridge::Bridge,
    trestle_common::now_ms,
};

pub async fn serve(bridge: Arc<Bridge>, bind: String, port: u16) {
    let cancel = bridge.cancellation_token();
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(bridge);

    let listener = match tokio::net::TcpListener::bind((bind.as_str(), port)).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(%bind, port, error = %e, "liveness endpoint unavailable");
            return;
        },
    };
    info!(%bind, port, "liveness endpoint listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
    if let Err(e) = served {
        warn!(error = %e, "liveness endpoint stopped with error");
    }
}

async fn root() -> &'static str {
    "Trestle bridge is running"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "trestle",
        "timestamp_ms": now_ms(),
    }))
}

async fn status(State(bridge): State<Arc<Bridge>>) -> Json<serde_json::Value> {
    Json(bridge.status())
}
