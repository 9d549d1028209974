//! HTTP gateway in front of the broker bridge.
//!
//! Two endpoints per session, both keyed by tenant and session id:
//! `GET /{db_name}/{context_id}/streaming` opens the push channel and relays
//! reply frames as a chunked body, `POST /{db_name}/{context_id}/send`
//! publishes one request.

pub mod config;
pub mod error;
pub mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use grid_broker::{BrokerBridge, MessageBroker};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use config::GatewayConfig;
pub use error::{ConfigError, GatewayError};

pub struct AppState<B: MessageBroker> {
    pub bridge: Arc<BrokerBridge<B>>,
}

impl<B: MessageBroker> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            bridge: self.bridge.clone(),
        }
    }
}

impl<B: MessageBroker> AppState<B> {
    pub fn new(bridge: Arc<BrokerBridge<B>>) -> Self {
        Self { bridge }
    }
}

pub fn router<B: MessageBroker>(state: AppState<B>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler::<B>))
        .route("/health/live", get(handlers::health_live_handler))
        .route(
            "/{db_name}/{context_id}/streaming",
            get(handlers::streaming_handler::<B>),
        )
        .route(
            "/{db_name}/{context_id}/send",
            post(handlers::send_handler::<B>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `state` on `listener` until `signal` resolves.
///
/// Push bodies only end once their relays stop, so every session is closed
/// before the server drains in-flight responses.
pub async fn serve<B: MessageBroker>(
    listener: TcpListener,
    state: AppState<B>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let bridge = state.bridge.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            signal.await;
            bridge.shutdown().await;
        })
        .await
}
