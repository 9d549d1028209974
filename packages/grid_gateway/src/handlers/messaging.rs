use std::convert::Infallible;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use grid_broker::MessageBroker;
use grid_protocol::Request;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::GatewayError;

pub const SENT_MESSAGE: &str = "Message sent";

/// Open messaging for the session and stream its reply frames.
///
/// The body ends when the relay stops; a client hanging up drops the push
/// channel, which closes the session's messaging.
pub async fn streaming_handler<B: MessageBroker>(
    State(state): State<AppState<B>>,
    Path((db_name, context_id)): Path<(String, String)>,
) -> Result<Response, GatewayError> {
    let channel = state
        .bridge
        .open_push_channel(&db_name, &context_id)
        .await
        .inspect_err(|e| warn!(db = %db_name, session = %context_id, "opening push channel: {e}"))?;
    info!(db = %db_name, session = %context_id, "push channel opened");

    let body = Body::from_stream(channel.map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// Publish one request for the session named in the path.
///
/// The path wins over whatever tenant or session the body claims.
pub async fn send_handler<B: MessageBroker>(
    State(state): State<AppState<B>>,
    Path((db_name, context_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let mut request = Request::from_json(&body)?;
    request.db_name = db_name;
    request.session_id = context_id;

    let accepted = state
        .bridge
        .send(&request)
        .await
        .inspect_err(|e| warn!(session = %request.session_id, "send failed: {e}"))?;
    if !accepted {
        return Err(GatewayError::Refused);
    }
    debug!(
        session = %request.session_id,
        request = %request.request_id,
        command = %request.command,
        "request forwarded"
    );
    Ok(Json(serde_json::json!({ "message": SENT_MESSAGE })))
}
