//! Grid client core: session context and push stream consumer.
//!
//! - [`SessionContext`]: issues commands, keeps the transaction [`Ledger`],
//!   the data set cache and focus, and applies replies to them
//! - [`PushStreamConsumer`]: reads the session's push channel, drives the
//!   liveness ping and timeout sweep
//! - [`GatewayTransport`]: HTTP or in-process route to the broker bridge

pub mod config;
pub mod dataset;
pub mod debounce;
pub mod error;
pub mod focus;
pub mod ledger;
pub mod mutations;
pub mod session;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use config::{ClientConfig, FileConfig, load_config};
pub use dataset::{DataSetCache, Upsert};
pub use debounce::Debouncer;
pub use error::{ConfigError, LedgerError, TransportError};
pub use focus::Focus;
pub use ledger::{Ledger, LedgerEntry, Reconciled, TrackedRequest};
pub use session::{Applied, NOT_AUTHORIZED, SendOutcome, SessionContext, SessionState};
pub use stream::{PushStreamConsumer, StreamSummary};
pub use transport::{BridgeTransport, FrameStream, GatewayTransport, HttpTransport};
