use axum::{Json, extract::State, response::IntoResponse};
use grid_broker::MessageBroker;

use crate::AppState;

/// Bridge status: connection, open sessions per tenant, active relays.
pub async fn health_handler<B: MessageBroker>(State(state): State<AppState<B>>) -> impl IntoResponse {
    let stats = state.bridge.stats().await;
    Json(serde_json::json!({
        "status": "healthy",
        "connected": stats.connected,
        "sessions": stats.sessions,
        "relaying": stats.relaying,
        "tenants": stats.tenants,
    }))
}

/// Liveness check - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
