//! Request and reply documents exchanged through the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::{CommandKind, Status};
use crate::error::ProtocolError;
use crate::model::{DataSet, Filter, GridPost};

/// A single outbound instruction, client to backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Also used as the broker correlation id.
    #[serde(rename = "requestUuid")]
    pub request_id: String,
    #[serde(default)]
    pub db_name: String,
    #[serde(rename = "contextUuid", default)]
    pub session_id: String,
    pub command: CommandKind,
    #[serde(default)]
    pub command_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub request_initiated_on: DateTime<Utc>,
    #[serde(rename = "gridUuid", default, skip_serializing_if = "Option::is_none")]
    pub grid_id: Option<String>,
    #[serde(rename = "rowUuid", default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(rename = "columnUuid", default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    #[serde(flatten)]
    pub filter: Option<Filter>,
    #[serde(rename = "dataSet", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<GridPost>,
}

impl Request {
    /// New request with a fresh id, initiated now. Session fields are left
    /// empty for the session layer to stamp.
    pub fn new(command: CommandKind, command_text: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            db_name: String::new(),
            session_id: String::new(),
            command,
            command_text: command_text.into(),
            from: None,
            url: None,
            jwt: None,
            login_id: None,
            password_hash: None,
            request_initiated_on: Utc::now(),
            grid_id: None,
            row_id: None,
            column_id: None,
            filter: None,
            payload: None,
        }
    }

    pub fn with_grid(mut self, grid_id: impl Into<String>) -> Self {
        self.grid_id = Some(grid_id.into());
        self
    }

    /// Empty row ids are treated as "no row scope".
    pub fn with_row(mut self, row_id: impl Into<String>) -> Self {
        let row_id = row_id.into();
        self.row_id = (!row_id.is_empty()).then_some(row_id);
        self
    }

    pub fn with_column(mut self, column_id: impl Into<String>) -> Self {
        self.column_id = Some(column_id.into());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_payload(mut self, payload: GridPost) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_login(mut self, login_id: impl Into<String>, password_hash: impl Into<String>) -> Self {
        self.login_id = Some(login_id.into());
        self.password_hash = Some(password_hash.into());
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A single inbound result, backend to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    /// Absent for unsolicited pushes.
    #[serde(rename = "requestUuid", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "contextUuid", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub command: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_text: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_initiated_on: Option<DateTime<Utc>>,
    #[serde(rename = "gridUuid", default, skip_serializing_if = "Option::is_none")]
    pub grid_id: Option<String>,
    #[serde(rename = "rowUuid", default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(rename = "columnUuid", default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    #[serde(rename = "dataSet", default, skip_serializing_if = "Option::is_none")]
    pub data_set: Option<DataSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<i64>,
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(rename = "sameContext", default)]
    pub same_session: bool,
}

impl Reply {
    /// Bare reply of the given kind with no correlation.
    pub fn new(command: CommandKind, status: Status) -> Self {
        Self {
            request_id: None,
            session_id: None,
            command,
            command_text: None,
            status,
            message: None,
            from: None,
            url: None,
            db_name: None,
            jwt: None,
            request_initiated_on: None,
            grid_id: None,
            row_id: None,
            column_id: None,
            data_set: None,
            elapsed_ms: None,
            received_at: None,
            same_session: false,
        }
    }

    /// First frame written to every push channel.
    pub fn initialization(session_id: impl Into<String>) -> Self {
        let mut reply = Self::new(CommandKind::Initialization, Status::Success);
        reply.session_id = Some(session_id.into());
        reply.request_initiated_on = Some(Utc::now());
        reply
    }

    /// Reply envelope echoing the identity fields of `request`.
    pub fn answering(request: &Request, status: Status) -> Self {
        let mut reply = Self::new(request.command, status);
        reply.request_id = Some(request.request_id.clone());
        reply.session_id = Some(request.session_id.clone());
        reply.command_text = (!request.command_text.is_empty()).then(|| request.command_text.clone());
        reply.from = request.from.clone();
        reply.url = request.url.clone();
        reply.db_name = Some(request.db_name.clone());
        reply.request_initiated_on = Some(request.request_initiated_on);
        reply.grid_id = request.grid_id.clone();
        reply.row_id = request.row_id.clone();
        reply.column_id = request.column_id.clone();
        reply
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data_set(mut self, data_set: DataSet) -> Self {
        self.data_set = Some(data_set);
        self
    }

    pub fn with_credential(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = Some(jwt.into());
        self
    }

    /// Milliseconds between the declared initiation time and `now`.
    pub fn elapsed_since_initiation(&self, now: DateTime<Utc>) -> Option<i64> {
        self.request_initiated_on
            .map(|initiated| (now - initiated).num_milliseconds())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}
