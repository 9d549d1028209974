//! Session context: the single point through which a session issues commands
//! and reconciles the replies that come back.
//!
//! State lives behind one lock that is never held across a transport call,
//! so replies can be applied while a send is in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use grid_protocol::{
    APPLICATION_TAG, Column, CommandKind, Credential, CredentialError, DataSet, Grid, GridPost,
    Reply, Request, Row, ScopeKey, system_ids,
};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dataset::{DataSetCache, Upsert};
use crate::debounce::Debouncer;
use crate::focus::Focus;
use crate::ledger::{Ledger, Reconciled};
use crate::mutations::{self, EditKey};
use crate::transport::GatewayTransport;

/// Status shown when a command is refused for lack of a credential.
pub const NOT_AUTHORIZED: &str = "Not authorized";

/// What became of an outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted by the gateway; the request is pending in the ledger.
    Sent,
    /// Refused locally. Nothing was transmitted or ledgered.
    NotAuthorized,
    /// Ledgered but not delivered; it will time out unless a reply shows up.
    TransportFailed(String),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// State transition taken for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    LoggedIn,
    /// Successful login whose credential failed the structural check.
    LoginRejected,
    /// Failed login; credential and caches dropped.
    LoggedOut,
    DataSet { upsert: Upsert, follow_ups: usize },
    Located,
    Ignored,
}

#[derive(Debug)]
pub struct SessionState {
    db_name: String,
    credential: Option<Credential>,
    ledger: Ledger,
    data_sets: DataSetCache,
    focus: Focus,
    grid_id: String,
    row_id: String,
    sending: bool,
    status: String,
}

impl SessionState {
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn is_authenticated_at(&self, now: DateTime<Utc>) -> bool {
        self.credential.as_ref().is_some_and(|c| c.is_valid_at(now))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn data_sets(&self) -> &DataSetCache {
        &self.data_sets
    }

    pub fn focus(&self) -> &Focus {
        &self.focus
    }

    pub fn grid_id(&self) -> &str {
        &self.grid_id
    }

    pub fn row_id(&self) -> &str {
        &self.row_id
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    fn reset(&mut self) {
        self.focus.reset();
        self.sending = false;
    }

    fn purge(&mut self) {
        self.credential = None;
        self.reset();
        self.data_sets.clear();
    }
}

struct Inner<T> {
    session_id: String,
    config: ClientConfig,
    transport: T,
    state: RwLock<SessionState>,
    edits: Debouncer<EditKey>,
    streaming: AtomicBool,
}

pub struct SessionContext<T: GatewayTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: GatewayTransport> Clone for SessionContext<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: GatewayTransport> SessionContext<T> {
    /// New session with a fresh id.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self::with_session_id(config, transport, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_session_id(config: ClientConfig, transport: T, session_id: impl Into<String>) -> Self {
        let state = SessionState {
            db_name: config.db_name.clone(),
            credential: None,
            ledger: Ledger::new(config.ledger_capacity),
            data_sets: DataSetCache::new(),
            focus: Focus::default(),
            grid_id: String::new(),
            row_id: String::new(),
            sending: false,
            status: String::new(),
        };
        Self {
            inner: Arc::new(Inner {
                session_id: session_id.into(),
                edits: Debouncer::new(config.debounce),
                config,
                transport,
                state: RwLock::new(state),
                streaming: AtomicBool::new(false),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Read access to the session state. Don't hold it across a send.
    pub async fn state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.inner.state.read().await
    }

    pub async fn status(&self) -> String {
        self.inner.state.read().await.status.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.state.read().await.is_authenticated_at(Utc::now())
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.streaming.load(Ordering::SeqCst)
    }

    pub(crate) fn set_streaming(&self, streaming: bool) {
        self.inner.streaming.store(streaming, Ordering::SeqCst);
    }

    /// Store a credential obtained elsewhere, e.g. from a previous run.
    pub async fn restore_credential(&self, token: &str) -> Result<(), CredentialError> {
        let credential = Credential::parse(token)?;
        self.inner.state.write().await.credential = Some(credential);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Stamp, ledger and transmit `request`.
    ///
    /// Never fails: refusals and transport errors end up in the returned
    /// outcome and in the status string.
    pub async fn send(&self, mut request: Request) -> SendOutcome {
        {
            let mut state = self.inner.state.write().await;
            let authorized = state.is_authenticated_at(Utc::now());
            if !authorized && !request.command.is_unauthenticated() {
                debug!(
                    session = %self.inner.session_id,
                    command = %request.command,
                    "refusing command without credential"
                );
                state.status = NOT_AUTHORIZED.to_string();
                return SendOutcome::NotAuthorized;
            }

            request.db_name = state.db_name.clone();
            request.session_id = self.inner.session_id.clone();
            request.from = Some(APPLICATION_TAG.to_string());
            request.url = Some(self.inner.config.base_url.clone());
            request.jwt = state.credential.as_ref().map(|c| c.token().to_string());

            if let Err(e) = state.ledger.track(request.clone()) {
                warn!(session = %self.inner.session_id, "not sending: {e}");
                state.status = e.to_string();
                return SendOutcome::TransportFailed(e.to_string());
            }
            state.sending = true;
            state.status = "Sending".to_string();
        }

        debug!(
            session = %self.inner.session_id,
            request = %request.request_id,
            command = %request.command,
            "[>] {}",
            request.command_text
        );
        let result = self.inner.transport.send(&request).await;

        let mut state = self.inner.state.write().await;
        state.sending = false;
        match result {
            Ok(message) => {
                state.status = message;
                SendOutcome::Sent
            }
            Err(e) => {
                warn!(
                    session = %self.inner.session_id,
                    request = %request.request_id,
                    "send failed: {e}"
                );
                state.status = e.to_string();
                SendOutcome::TransportFailed(e.to_string())
            }
        }
    }

    async fn send_change(&self, text: &str, grid_id: &str, post: GridPost) -> SendOutcome {
        self.send(
            Request::new(CommandKind::ChangeGrid, text)
                .with_grid(grid_id)
                .with_payload(post),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    pub async fn reconcile(&self, reply: Reply) -> Reconciled {
        self.inner.state.write().await.ledger.reconcile(reply)
    }

    /// Mark requests older than the configured threshold as timed out.
    pub async fn sweep_timeouts(&self) -> usize {
        let threshold = self.inner.config.timeout_threshold.as_millis() as u64;
        let marked = self
            .inner
            .state
            .write()
            .await
            .ledger
            .sweep_timeouts(Utc::now(), threshold);
        if marked > 0 {
            info!(session = %self.inner.session_id, marked, "requests timed out");
        }
        marked
    }

    /// Apply a reply to the session state, issuing follow-up loads for
    /// grids a row-scoped load refers to.
    pub async fn apply_reply(&self, reply: &Reply) -> Applied {
        let (applied, follow_ups) = {
            let mut state = self.inner.state.write().await;
            self.transition(&mut state, reply)
        };
        for (grid_id, text) in follow_ups {
            self.send(Request::new(CommandKind::Load, text).with_grid(grid_id))
                .await;
        }
        applied
    }

    fn transition(&self, state: &mut SessionState, reply: &Reply) -> (Applied, Vec<(String, &'static str)>) {
        let session = &self.inner.session_id;
        if reply.command == CommandKind::Authentication {
            if !reply.is_success() {
                info!(session = %session, "login failed, purging session");
                state.purge();
                self.inner.edits.cancel_all();
                return (Applied::LoggedOut, Vec::new());
            }
            match reply.jwt.as_deref().map(Credential::parse) {
                Some(Ok(credential)) => {
                    info!(
                        session = %session,
                        user = credential.claims().user.as_deref().unwrap_or("?"),
                        "logged in"
                    );
                    state.credential = Some(credential);
                    return (Applied::LoggedIn, Vec::new());
                }
                Some(Err(e)) => warn!(session = %session, "credential rejected: {e}"),
                None => warn!(session = %session, "login reply without credential"),
            }
            state.purge();
            self.inner.edits.cancel_all();
            return (Applied::LoginRejected, Vec::new());
        }

        if !state.is_authenticated_at(Utc::now()) || !reply.is_success() {
            return (Applied::Ignored, Vec::new());
        }

        match reply.command {
            CommandKind::Load | CommandKind::ChangeGrid => match &reply.data_set {
                Some(set) if !set.grid.id.is_empty() => self.store_data_set(state, set.clone()),
                _ => (Applied::Ignored, Vec::new()),
            },
            CommandKind::LocateGrid => {
                let SessionState { focus, data_sets, .. } = state;
                focus.locate(
                    data_sets,
                    reply.grid_id.as_deref(),
                    reply.column_id.as_deref(),
                    reply.row_id.as_deref(),
                );
                (Applied::Located, Vec::new())
            }
            _ => (Applied::Ignored, Vec::new()),
        }
    }

    fn store_data_set(&self, state: &mut SessionState, set: DataSet) -> (Applied, Vec<(String, &'static str)>) {
        let grid_id = set.grid.id.clone();
        let mut follow_ups: Vec<(String, &'static str)> = Vec::new();
        if set.scope().is_row_scoped() {
            let usage = set.grid.backward_references().map(|g| (g, "Load usage grid"));
            let forward = set.grid.forward_references().map(|g| (g, "Load reference grid"));
            for (id, text) in usage.chain(forward) {
                if id != grid_id && !follow_ups.iter().any(|(seen, _)| seen == id) {
                    follow_ups.push((id.to_string(), text));
                }
            }
        }

        let upsert = state.data_sets.upsert(set);
        match upsert {
            Upsert::Inserted => debug!(session = %self.inner.session_id, grid = %grid_id, "grid loaded"),
            Upsert::Replaced => debug!(session = %self.inner.session_id, grid = %grid_id, "grid reloaded"),
        }
        if state.grid_id == grid_id {
            state.focus.set(&grid_id, None, None);
        }
        (
            Applied::DataSet {
                upsert,
                follow_ups: follow_ups.len(),
            },
            follow_ups,
        )
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    pub async fn heartbeat(&self) -> SendOutcome {
        self.send(Request::new(CommandKind::Heartbeat, "Heartbeat")).await
    }

    /// Ignored when either field is empty.
    pub async fn authenticate(&self, login_id: &str, password: &str) -> Option<SendOutcome> {
        if login_id.is_empty() || password.is_empty() {
            return None;
        }
        let request = Request::new(CommandKind::Authentication, format!("Login {login_id}"))
            .with_login(login_id, grid_protocol::encoding::password_digest(password));
        Some(self.send(request).await)
    }

    /// Load the current grid, or the current row of it.
    pub async fn load(&self) -> SendOutcome {
        let (grid_id, row_id) = {
            let state = self.inner.state.read().await;
            (state.grid_id.clone(), state.row_id.clone())
        };
        let text = if row_id.is_empty() { "Load grid" } else { "Load row" };
        self.send(
            Request::new(CommandKind::Load, text)
                .with_grid(grid_id)
                .with_row(row_id),
        )
        .await
    }

    pub async fn navigate_to_grid(&self, grid_id: &str, row_id: Option<&str>) -> SendOutcome {
        {
            let mut state = self.inner.state.write().await;
            state.reset();
            state.grid_id = grid_id.to_string();
            state.row_id = row_id.unwrap_or_default().to_string();
        }
        self.load().await
    }

    /// Ask the backend to locate a cell; focus moves when the reply arrives.
    pub async fn change_focus(&self, grid_id: &str, column_id: Option<&str>, row_id: Option<&str>) -> SendOutcome {
        let mut request = Request::new(CommandKind::LocateGrid, "Locate").with_grid(grid_id);
        if let Some(column_id) = column_id {
            request = request.with_column(column_id);
        }
        if let Some(row_id) = row_id {
            request = request.with_row(row_id);
        }
        self.send(request).await
    }

    pub async fn prompt(&self, text: &str) -> SendOutcome {
        self.send(Request::new(CommandKind::Prompt, text)).await
    }

    pub async fn add_row(&self, scope: &ScopeKey) -> Option<SendOutcome> {
        let (grid_id, post) = self
            .edit(scope, |set| Some(mutations::add_row(set)))
            .await?;
        Some(self.send_change("Add row", &grid_id, post).await)
    }

    pub async fn remove_row(&self, scope: &ScopeKey, row_id: &str) -> Option<SendOutcome> {
        let (grid_id, post) = self
            .edit(scope, |set| mutations::remove_row(set, row_id))
            .await?;
        Some(self.send_change("Remove row", &grid_id, post).await)
    }

    /// Write one cell locally and schedule the row update.
    pub async fn set_cell(
        &self,
        scope: &ScopeKey,
        row_id: &str,
        column_name: &str,
        value: serde_json::Value,
    ) -> bool {
        let found = {
            let mut state = self.inner.state.write().await;
            match state.data_sets.get_mut(scope).and_then(|s| s.row_mut(row_id)) {
                Some(row) => {
                    row.values.insert(column_name.to_string(), value);
                    true
                }
                None => false,
            }
        };
        if found {
            self.change_cell(scope, row_id);
        }
        found
    }

    /// Debounced: rapid edits of one row coalesce into a single update.
    pub fn change_cell(&self, scope: &ScopeKey, row_id: &str) {
        let session = self.clone();
        let (scope, row_id) = (scope.clone(), row_id.to_string());
        let key = EditKey::Cell {
            scope: scope.clone(),
            row_id: row_id.clone(),
        };
        self.inner.edits.arm(key, async move {
            session.flush_row(&scope, &row_id).await;
        });
    }

    async fn flush_row(&self, scope: &ScopeKey, row_id: &str) -> Option<SendOutcome> {
        let Some((grid_id, post)) = self
            .edit(scope, |set| mutations::edit_row(set, row_id))
            .await
        else {
            debug!(session = %self.inner.session_id, row = %row_id, "edited row is gone");
            return None;
        };
        Some(self.send_change("Update", &grid_id, post).await)
    }

    pub async fn add_column(
        &self,
        scope: &ScopeKey,
        column_type: &Row,
        reference_grid: Option<&str>,
    ) -> Option<SendOutcome> {
        let (_, post) = self
            .edit(scope, |set| mutations::add_column(set, column_type, reference_grid))
            .await?;
        Some(self.send_change("Add column", system_ids::COLUMNS, post).await)
    }

    pub async fn remove_column(&self, scope: &ScopeKey, column_id: &str) -> Option<SendOutcome> {
        let (_, post) = self
            .edit(scope, |set| mutations::remove_column(set, column_id))
            .await?;
        Some(self.send_change("Remove column", system_ids::COLUMNS, post).await)
    }

    /// Create an empty grid and navigate to it. Returns the new grid id.
    pub async fn new_grid(&self) -> (String, SendOutcome) {
        let (grid_id, post) = mutations::new_grid();
        let outcome = self.send_change("New grid", system_ids::GRIDS, post).await;
        if outcome.is_sent() {
            self.navigate_to_grid(&grid_id, None).await;
        }
        (grid_id, outcome)
    }

    pub async fn add_reference(
        &self,
        scope: &ScopeKey,
        column_id: &str,
        row_id: &str,
        target: &Row,
    ) -> Option<SendOutcome> {
        let (grid_id, post) = self
            .edit(scope, |set| mutations::add_reference(set, column_id, row_id, target))
            .await?;
        Some(self.send_change("Add value", &grid_id, post).await)
    }

    pub async fn remove_reference(
        &self,
        scope: &ScopeKey,
        column_id: &str,
        row_id: &str,
        target: &Row,
    ) -> Option<SendOutcome> {
        let (grid_id, post) = self
            .edit(scope, |set| mutations::remove_reference(set, column_id, row_id, target))
            .await?;
        Some(self.send_change("Remove value", &grid_id, post).await)
    }

    /// Debounced edit of grid metadata (name, description).
    pub async fn change_grid(&self, grid: Grid) {
        {
            let mut state = self.inner.state.write().await;
            let scopes: Vec<ScopeKey> = state
                .data_sets
                .iter()
                .filter(|s| s.grid.id == grid.id)
                .map(DataSet::scope)
                .collect();
            for scope in scopes {
                if let Some(set) = state.data_sets.get_mut(&scope) {
                    set.grid.name = grid.name.clone();
                    set.grid.description = grid.description.clone();
                    set.grid.values = grid.values.clone();
                }
            }
        }
        let session = self.clone();
        let post = mutations::grid_metadata(&grid);
        self.inner.edits.arm(EditKey::Grid(grid.id.clone()), async move {
            session.send_change("Update grid", system_ids::GRIDS, post).await;
        });
    }

    /// Debounced edit of column metadata (label, name, order).
    pub async fn change_column(&self, scope: &ScopeKey, column: Column) -> bool {
        let found = {
            let mut state = self.inner.state.write().await;
            let existing = state
                .data_sets
                .get_mut(scope)
                .and_then(|s| s.grid.columns.iter_mut().find(|c| c.id == column.id));
            match existing {
                Some(existing) => {
                    existing.label = column.label.clone();
                    existing.name = column.name.clone();
                    existing.order_number = column.order_number;
                    true
                }
                None => false,
            }
        };
        if !found {
            return false;
        }
        let session = self.clone();
        let key = EditKey::Column {
            scope: scope.clone(),
            column_id: column.id.clone(),
        };
        self.inner.edits.arm(key, async move {
            let post = mutations::column_metadata(&column);
            session
                .send_change("Update column", system_ids::COLUMNS, post)
                .await;
        });
        true
    }

    pub async fn logout(&self) {
        info!(session = %self.inner.session_id, "logging out");
        self.purge().await;
    }

    /// Drop the credential, cached data sets, focus and pending edits.
    pub async fn purge(&self) {
        self.inner.edits.cancel_all();
        self.inner.state.write().await.purge();
    }

    pub async fn reset(&self) {
        self.inner.state.write().await.reset();
    }

    /// Latest same-session load or change reply for the current grid.
    pub async fn last_grid_reply(&self) -> Option<Reply> {
        let state = self.inner.state.read().await;
        state.ledger.last_grid_reply(&state.grid_id).cloned()
    }

    pub async fn last_failure(&self) -> Option<Reply> {
        self.inner.state.read().await.ledger.last_failure().cloned()
    }

    /// Run `f` against the cached set for `scope`; yields the set's grid id
    /// with the batch `f` produced.
    async fn edit<F>(&self, scope: &ScopeKey, f: F) -> Option<(String, GridPost)>
    where
        F: FnOnce(&mut DataSet) -> Option<GridPost>,
    {
        let mut state = self.inner.state.write().await;
        let Some(set) = state.data_sets.get_mut(scope) else {
            debug!(session = %self.inner.session_id, grid = %scope.grid_id, "no cached data set for edit");
            return None;
        };
        let post = f(set)?;
        Some((set.grid.id.clone(), post))
    }
}
