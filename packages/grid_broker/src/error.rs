use grid_protocol::ProtocolError;

/// Failures reported by a broker implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection is closed")]
    ConnectionClosed,

    #[error("broker channel is closed")]
    ChannelClosed,

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("queue {0} is exclusive to another channel")]
    ResourceLocked(String),

    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("no messaging open for tenant {tenant}")]
    TenantNotOpen { tenant: String },

    #[error("no messaging open for session {session}")]
    SessionNotOpen { session: String },

    #[error("push channel for session {session} is already being relayed")]
    AlreadyBridged { session: String },
}
