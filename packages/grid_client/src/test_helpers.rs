use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::StreamExt;
use grid_protocol::encoding::base64url_encode;
use grid_protocol::{Column, DataSet, Grid, Request, Row, system_ids};
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{FrameStream, GatewayTransport, SENT_MESSAGE};

/// A data set for `grid_id` holding `rows` fresh rows, optionally row scoped.
pub fn data_set(grid_id: &str, row_id: Option<&str>, rows: usize) -> DataSet {
    DataSet {
        grid: Grid {
            id: grid_id.to_string(),
            grid_id: system_ids::GRIDS.to_string(),
            name: format!("Grid {grid_id}"),
            ..Default::default()
        },
        count_rows: rows as i64,
        rows: (0..rows).map(|_| Row::create(grid_id)).collect(),
        grid_id: Some(grid_id.to_string()),
        row_id: row_id.map(str::to_string),
        can_view_rows: true,
        can_edit_rows: true,
        can_add_rows: true,
        can_edit_grid: true,
        ..Default::default()
    }
}

pub fn text_column(id: &str, grid_id: &str, name: &str) -> Column {
    Column {
        id: id.to_string(),
        name: name.to_string(),
        label: Some(name.to_uppercase()),
        type_name: "Text".to_string(),
        type_id: system_ids::TEXT_COLUMN_TYPE.to_string(),
        grid_id: grid_id.to_string(),
        owned: true,
        ..Default::default()
    }
}

/// Structurally valid credential expiring an hour from now.
pub fn valid_token() -> String {
    token_with_claims(json!({"user": "alice", "exp": Utc::now().timestamp() + 3600}))
}

pub fn token_with_claims(claims: serde_json::Value) -> String {
    format!(
        "{}.{}.{}",
        base64url_encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        base64url_encode(claims.to_string().as_bytes()),
        base64url_encode(b"signature"),
    )
}

/// Records every request and hands out a push channel fed by the test.
pub struct RecordingTransport {
    sent: Mutex<Vec<Request>>,
    fail: AtomicBool,
    frames: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            frames: Mutex::new(None),
        }
    }

    /// Push channel whose chunks come from the returned sender.
    pub fn with_push_channel() -> (Self, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self::new();
        *transport.frames.lock().unwrap() = Some(rx);
        (transport, tx)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().unwrap().clone()
    }
}

impl GatewayTransport for RecordingTransport {
    async fn send(&self, request: &Request) -> Result<String, TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                status: 500,
                message: "error initializing messaging".to_string(),
            });
        }
        self.sent.lock().unwrap().push(request.clone());
        Ok(SENT_MESSAGE.to_string())
    }

    async fn open_push_channel(
        &self,
        _db_name: &str,
        _session_id: &str,
    ) -> Result<FrameStream, TransportError> {
        let rx = self.frames.lock().unwrap().take().ok_or(TransportError::Closed)?;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk), rx))
        })
        .boxed())
    }
}
