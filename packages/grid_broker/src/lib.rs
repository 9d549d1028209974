//! Broker plumbing between grid sessions and the backend services.
//!
//! - [`broker`]: the abstract message-broker contract (connection, channel, queue)
//! - [`memory`]: an in-process implementation of that contract
//! - [`routing`]: static mapping from command kind to outbound queue
//! - [`bridge`]: the per-process [`BrokerBridge`] that publishes requests and
//!   relays each session's reply queue into its push channel
//! - [`responder`]: backend-side listener answering one outbound queue

pub mod bridge;
pub mod broker;
pub mod error;
pub mod memory;
pub mod responder;
pub mod routing;

pub use bridge::{BridgeStats, BrokerBridge, PushChannel};
pub use broker::{
    BrokerChannel, BrokerConnection, Delivery, MessageBroker, MessageProperties, QueueOptions,
};
pub use error::{BridgeError, BrokerError};
pub use memory::{MemoryBroker, MemoryChannel, MemoryConnection};
pub use responder::{CommandHandler, LivenessHandler, QueueResponder};
pub use routing::{Route, reply_queue_name};
