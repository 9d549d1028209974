//! Command kinds and reply statuses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The command carried by a request and echoed by its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// First frame of every push channel.
    #[serde(rename = "init")]
    Initialization,
    Heartbeat,
    Authentication,
    Load,
    /// Batched row/column/relationship mutation.
    #[serde(rename = "change")]
    ChangeGrid,
    #[serde(rename = "locate")]
    LocateGrid,
    /// Free-text prompt; replies may stream back as several fragments.
    Prompt,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "init",
            Self::Heartbeat => "heartbeat",
            Self::Authentication => "authentication",
            Self::Load => "load",
            Self::ChangeGrid => "change",
            Self::LocateGrid => "locate",
            Self::Prompt => "prompt",
        }
    }

    /// Commands that may leave the session without a credential.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            Self::Initialization | Self::Heartbeat | Self::Authentication
        )
    }

    /// Replies of these kinds may carry a data set to reconcile.
    pub fn carries_data_set(&self) -> bool {
        matches!(self, Self::Load | Self::ChangeGrid)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Success,
    /// `error` is what the backend emits when a handler raised.
    #[serde(alias = "error")]
    Failed,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}
