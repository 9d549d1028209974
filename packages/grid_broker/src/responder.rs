//! Backend side of a route queue: consume requests, answer on their reply queue.

use std::future::Future;
use std::sync::Arc;

use grid_protocol::{CommandKind, Reply, Request, Status};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{
    BrokerChannel, BrokerConnection, Delivery, MessageBroker, MessageProperties, QueueOptions,
};
use crate::error::BrokerError;
use crate::routing::Route;

/// Turns one request into the replies to publish for it.
///
/// Most commands answer once; prompts may answer with several fragments
/// sharing the request id.
pub trait CommandHandler: Send + Sync + 'static {
    fn handle(&self, request: &Request) -> impl Future<Output = Vec<Reply>> + Send;
}

/// Answers liveness commands and refuses everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LivenessHandler;

impl CommandHandler for LivenessHandler {
    async fn handle(&self, request: &Request) -> Vec<Reply> {
        match request.command {
            CommandKind::Initialization | CommandKind::Heartbeat => {
                vec![Reply::answering(request, Status::Success)]
            }
            _ => vec![Reply::answering(request, Status::Failed).with_message("Unknown command")],
        }
    }
}

pub struct QueueResponder<H: CommandHandler> {
    handler: Arc<H>,
}

impl<H: CommandHandler> Clone for QueueResponder<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<H: CommandHandler> QueueResponder<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Consume `queue` on `channel` until cancelled or the channel closes.
    pub async fn run<C: BrokerChannel>(
        &self,
        channel: &C,
        queue: &str,
        cancel: CancellationToken,
    ) -> Result<(), BrokerError> {
        channel.declare_queue(queue, QueueOptions::routing()).await?;
        let mut deliveries = channel.consume(queue).await?;
        info!(queue = %queue, "awaiting requests");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                delivery = deliveries.recv() => match delivery {
                    Some(d) => d,
                    None => break,
                },
            };
            self.answer(channel, &delivery).await?;
        }
        info!(queue = %queue, "responder stopped");
        Ok(())
    }

    /// Start one responder task per route queue of `tenant`, on a dedicated connection.
    pub async fn serve_tenant<B: MessageBroker>(
        &self,
        broker: &B,
        tenant: &str,
        cancel: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, BrokerError> {
        let connection = Arc::new(broker.connect().await?);
        let mut tasks = Vec::new();
        for route in Route::ALL {
            let channel = connection.create_channel().await?;
            let queue = route.queue_name(tenant);
            let responder = self.clone();
            let cancel = cancel.clone();
            let connection = connection.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = responder.run(&channel, &queue, cancel).await {
                    warn!(queue = %queue, "responder failed: {e}");
                }
                if let Err(e) = channel.close().await {
                    debug!(queue = %queue, "closing responder channel: {e}");
                }
                // last task out closes the connection
                if let Some(connection) = Arc::into_inner(connection) {
                    let _ = connection.close().await;
                }
            }));
        }
        Ok(tasks)
    }

    async fn answer<C: BrokerChannel>(
        &self,
        channel: &C,
        delivery: &Delivery,
    ) -> Result<(), BrokerError> {
        let bodies: Vec<Vec<u8>> = match Request::from_json(&delivery.payload) {
            Ok(request) => {
                debug!(
                    request = %request.request_id,
                    command = %request.command,
                    session = %request.session_id,
                    "request received"
                );
                let replies = self.handler.handle(&request).await;
                replies
                    .iter()
                    .filter_map(|reply| match reply.to_json() {
                        Ok(body) => Some(body),
                        Err(e) => {
                            warn!(request = %request.request_id, "unserializable reply: {e}");
                            None
                        }
                    })
                    .collect()
            }
            Err(e) => {
                warn!(len = delivery.payload.len(), "invalid request: {e}");
                vec![invalid_request_reply(&delivery.payload, &e.to_string())]
            }
        };

        match &delivery.properties.reply_to {
            Some(reply_to) => {
                let properties = MessageProperties {
                    correlation_id: delivery.properties.correlation_id.clone(),
                    reply_to: None,
                };
                for body in bodies {
                    if !channel.publish(reply_to, body, properties.clone()).await? {
                        warn!(queue = %reply_to, "reply dropped by broker");
                    }
                }
            }
            None => debug!(
                tag = delivery.delivery_tag,
                "request without reply address, nothing published"
            ),
        }
        channel.ack(delivery.delivery_tag).await
    }
}

/// Failure reply for a payload that is not a request, echoing whatever
/// identity fields could still be read from it.
fn invalid_request_reply(payload: &[u8], reason: &str) -> Vec<u8> {
    let mut reply = Map::new();
    if let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(payload) {
        for key in ["command", "requestUuid", "contextUuid", "dbName", "requestInitiatedOn"] {
            if let Some(value) = fields.get(key) {
                reply.insert(key.to_string(), value.clone());
            }
        }
    }
    reply.insert("status".to_string(), Value::from("failed"));
    reply.insert(
        "message".to_string(),
        Value::from(format!("invalid request: {reason}")),
    );
    Value::Object(reply).to_string().into_bytes()
}
