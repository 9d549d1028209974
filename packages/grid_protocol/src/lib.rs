//! Wire protocol shared by the grid client, the gateway and the broker bridge.
//!
//! - [`Request`] / [`Reply`]: the JSON documents exchanged through the broker
//! - [`DataSet`], [`Grid`], [`Row`], [`Column`], [`GridPost`]: grid payloads
//! - [`FrameDecoder`]: splits the push channel byte stream on [`FRAME_SENTINEL`]
//! - [`Credential`]: structural check of the bearer credential returned on login

pub mod command;
pub mod credential;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod message;
pub mod model;
pub mod system_ids;

pub use command::{CommandKind, Status};
pub use credential::{Credential, CredentialClaims};
pub use error::{CredentialError, FrameError, ProtocolError};
pub use frame::{FRAME_SENTINEL, FrameDecoder, encode_frame};
pub use message::{Reply, Request};
pub use model::{
    Column, DataSet, Filter, Grid, GridPost, Reference, ReferencePost, Row, ScopeKey,
};

/// Tag stamped in the `from` field of every request built by this crate family.
pub const APPLICATION_TAG: &str = "gridlink";
