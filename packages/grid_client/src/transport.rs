//! How a session reaches the gateway: over HTTP, or straight onto an
//! in-process broker bridge.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use grid_broker::{BrokerBridge, MessageBroker};
use grid_protocol::Request;
use serde::Deserialize;
use tracing::debug;

use crate::error::TransportError;

/// Raw push channel bytes, chunked however the transport delivers them.
pub type FrameStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Message reported when the broker accepted a request.
pub const SENT_MESSAGE: &str = "Message sent";

pub trait GatewayTransport: Send + Sync + 'static {
    /// Publish one request. Returns the gateway's status message.
    fn send(&self, request: &Request) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Open the session's push channel.
    fn open_push_channel(
        &self,
        db_name: &str,
        session_id: &str,
    ) -> impl Future<Output = Result<FrameStream, TransportError>> + Send;
}

#[derive(Debug, Default, Deserialize)]
struct GatewayBody {
    message: Option<String>,
    error: Option<String>,
}

/// Talks to a gateway at `base_url`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_url(&self, db_name: &str, session_id: &str, endpoint: &str) -> String {
        format!("{}/{db_name}/{session_id}/{endpoint}", self.base_url)
    }
}

impl GatewayTransport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<String, TransportError> {
        let url = self.session_url(&request.db_name, &request.session_id, "send");
        debug!(url = %url, request = %request.request_id, "posting request");
        let mut builder = self.client.post(&url).json(request);
        if let Some(jwt) = &request.jwt {
            builder = builder.bearer_auth(jwt);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        let body: GatewayBody = resp.json().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: body
                    .error
                    .or(body.message)
                    .unwrap_or_else(|| "Failed to send message".to_string()),
            });
        }
        Ok(body.message.unwrap_or_else(|| SENT_MESSAGE.to_string()))
    }

    async fn open_push_channel(
        &self,
        db_name: &str,
        session_id: &str,
    ) -> Result<FrameStream, TransportError> {
        let url = self.session_url(db_name, session_id, "streaming");
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body: GatewayBody = resp.json().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: body.error.unwrap_or_else(|| status.to_string()),
            });
        }
        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from))
            .boxed())
    }
}

/// Sends through a [`BrokerBridge`] shared with the rest of the process.
pub struct BridgeTransport<B: MessageBroker> {
    bridge: Arc<BrokerBridge<B>>,
}

impl<B: MessageBroker> Clone for BridgeTransport<B> {
    fn clone(&self) -> Self {
        Self {
            bridge: self.bridge.clone(),
        }
    }
}

impl<B: MessageBroker> BridgeTransport<B> {
    pub fn new(bridge: Arc<BrokerBridge<B>>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Arc<BrokerBridge<B>> {
        &self.bridge
    }
}

impl<B: MessageBroker> GatewayTransport for BridgeTransport<B> {
    async fn send(&self, request: &Request) -> Result<String, TransportError> {
        if self.bridge.send(request).await? {
            Ok(SENT_MESSAGE.to_string())
        } else {
            Err(TransportError::Refused)
        }
    }

    async fn open_push_channel(
        &self,
        db_name: &str,
        session_id: &str,
    ) -> Result<FrameStream, TransportError> {
        let channel = self.bridge.open_push_channel(db_name, session_id).await?;
        Ok(channel.map(Ok).boxed())
    }
}
