//! Abstract message-broker contract.
//!
//! Shaped after a classic queueing broker: one connection multiplexes many
//! channels, channels declare queues, publish to them by name and consume
//! from them with explicit acknowledgement.

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::BrokerError;

/// Per-message metadata carried alongside the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub correlation_id: Option<String>,
    /// Queue the consumer should publish its answer to.
    pub reply_to: Option<String>,
}

impl MessageProperties {
    pub fn correlated(correlation_id: impl Into<String>, reply_to: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            reply_to: Some(reply_to.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    /// Only the declaring channel may consume; the queue dies with it.
    pub exclusive: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Shared command queue of a tenant.
    pub fn routing() -> Self {
        Self::default()
    }

    /// Private reply queue of a session.
    pub fn reply() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// A message handed to a consumer, pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
    /// Set when the message was requeued after its first consumer went away unacknowledged.
    pub redelivered: bool,
}

pub trait MessageBroker: Send + Sync + 'static {
    type Connection: BrokerConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, BrokerError>> + Send;
}

pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    fn create_channel(&self) -> impl Future<Output = Result<Self::Channel, BrokerError>> + Send;

    /// Close the connection and every channel opened on it.
    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn is_open(&self) -> bool;
}

pub trait BrokerChannel: Send + Sync + 'static {
    fn id(&self) -> u64;

    /// Idempotent for a compatible declaration.
    fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// `Ok(false)` when the broker did not take the message into its buffer.
    fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
        properties: MessageProperties,
    ) -> impl Future<Output = Result<bool, BrokerError>> + Send;

    fn consume(
        &self,
        queue: &str,
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<Delivery>, BrokerError>> + Send;

    fn ack(&self, delivery_tag: u64) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Close the channel. Exclusive queues it declared are deleted and its
    /// unacknowledged deliveries are requeued.
    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn is_open(&self) -> bool;
}
