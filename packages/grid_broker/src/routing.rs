//! Static routing from command kind to outbound queue.

use grid_protocol::CommandKind;

/// Outbound queue category of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Grid,
    Authentication,
    Locate,
}

impl Route {
    pub const ALL: [Route; 3] = [Route::Grid, Route::Authentication, Route::Locate];

    pub fn for_command(command: CommandKind) -> Self {
        match command {
            CommandKind::Authentication => Self::Authentication,
            CommandKind::LocateGrid => Self::Locate,
            _ => Self::Grid,
        }
    }

    /// Queue name for this route, e.g. `grid_service_demo`.
    pub fn queue_name(&self, tenant: &str) -> String {
        let prefix = match self {
            Self::Grid => "grid_service",
            Self::Authentication => "authentication_service",
            Self::Locate => "locate_service",
        };
        format!("{prefix}_{}", tenant.to_lowercase())
    }
}

/// Exclusive reply queue of a session.
pub fn reply_queue_name(session_id: &str) -> String {
    format!("callback_{session_id}")
}
