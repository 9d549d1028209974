use grid_broker::BridgeError;

/// Failure to hand a request to the gateway or to open the push channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("broker refused the request")]
    Refused,

    #[error("push channel closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("request {0} is already pending")]
    DuplicatePending(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Figment(Box::new(e))
    }
}
