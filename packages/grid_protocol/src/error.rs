//! Error types for the wire protocol.

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("data set has no grid")]
    MissingGrid,
}

/// A single frame that could not be turned into a reply.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame ({len} bytes): {source}")]
    Malformed {
        len: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl FrameError {
    pub fn frame_len(&self) -> usize {
        match self {
            Self::Malformed { len, .. } => *len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("credential is empty")]
    Empty,

    #[error("credential must have 3 segments, found {0}")]
    SegmentCount(usize),

    #[error("credential header is malformed: {0}")]
    Header(String),

    #[error("credential claims are malformed: {0}")]
    Claims(String),

    #[error("credential claim {0} is malformed")]
    BadClaim(&'static str),

    #[error("credential expired")]
    Expired,
}
