//! BrokerBridge: publishes session requests and relays reply queues into push channels.
//!
//! One bridge per process, shared behind an `Arc`. It owns the single broker
//! connection, one set of outbound route channels per tenant and one exclusive
//! reply queue per session. Resources are reference counted: a tenant's route
//! channels close with its last session and the connection closes once no
//! tenant or session is left.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use grid_protocol::{Reply, Request, encode_frame};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{
    BrokerChannel, BrokerConnection, Delivery, MessageBroker, MessageProperties, QueueOptions,
};
use crate::error::BridgeError;
use crate::routing::{Route, reply_queue_name};

pub const DEFAULT_REPLY_BUFFER: usize = 64;

type ChannelOf<B> = <<B as MessageBroker>::Connection as BrokerConnection>::Channel;

pub struct BrokerBridge<B: MessageBroker> {
    broker: B,
    state: Mutex<BridgeState<B>>,
    reply_buffer: usize,
}

struct BridgeState<B: MessageBroker> {
    connection: Option<Arc<B::Connection>>,
    tenants: HashMap<String, TenantLink<B>>,
    sessions: HashMap<String, SessionLink<B>>,
    next_relay: u64,
}

/// Outbound channels of one tenant, one per route.
struct TenantLink<B: MessageBroker> {
    routes: HashMap<Route, Arc<ChannelOf<B>>>,
    sessions: HashSet<String>,
}

struct SessionLink<B: MessageBroker> {
    tenant: String,
    reply_queue: String,
    channel: Arc<ChannelOf<B>>,
    relay: Option<Relay>,
}

/// Forwarder task moving reply-queue deliveries into a push channel.
struct Relay {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<RelayEnd>,
}

/// What a stopped relay hands to its successor.
struct RelayEnd {
    /// `None` once the broker ended the consumer.
    deliveries: Option<mpsc::UnboundedReceiver<Delivery>>,
    /// Received but never written to the push channel, still unacked.
    unsent: Option<Delivery>,
}

/// Snapshot of what the bridge currently holds open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub connected: bool,
    /// Open sessions per tenant.
    pub tenants: BTreeMap<String, usize>,
    pub sessions: usize,
    pub relaying: usize,
}

impl<B: MessageBroker> BrokerBridge<B> {
    pub fn new(broker: B) -> Self {
        Self::with_reply_buffer(broker, DEFAULT_REPLY_BUFFER)
    }

    /// `reply_buffer` frames may wait in a push channel before the relay
    /// stops pulling from the reply queue.
    pub fn with_reply_buffer(broker: B, reply_buffer: usize) -> Self {
        Self {
            broker,
            state: Mutex::new(BridgeState {
                connection: None,
                tenants: HashMap::new(),
                sessions: HashMap::new(),
                next_relay: 0,
            }),
            reply_buffer: reply_buffer.max(1),
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Make sure the connection, the tenant's route queues and the session's
    /// reply queue exist. Idempotent; returns whether this call created the
    /// session.
    pub async fn open_session(&self, tenant: &str, session: &str) -> Result<bool, BridgeError> {
        let mut state = self.state.lock().await;
        self.open_in(&mut state, tenant, session).await
    }

    async fn open_in(
        &self,
        state: &mut BridgeState<B>,
        tenant: &str,
        session: &str,
    ) -> Result<bool, BridgeError> {
        if let Some(link) = state.sessions.get(session) {
            if link.tenant != tenant {
                warn!(
                    session = %session,
                    open_for = %link.tenant,
                    requested = %tenant,
                    "session already open for another tenant"
                );
            }
            return Ok(false);
        }

        let connection = self.connection(state).await?;

        if !state.tenants.contains_key(tenant) {
            let mut routes = HashMap::new();
            for route in Route::ALL {
                let channel = connection.create_channel().await?;
                let queue = route.queue_name(tenant);
                channel.declare_queue(&queue, QueueOptions::routing()).await?;
                debug!(tenant = %tenant, queue = %queue, "route queue declared");
                routes.insert(route, Arc::new(channel));
            }
            state.tenants.insert(
                tenant.to_string(),
                TenantLink {
                    routes,
                    sessions: HashSet::new(),
                },
            );
        }

        let reply_queue = reply_queue_name(session);
        let opened = async {
            let channel = connection.create_channel().await?;
            channel.declare_queue(&reply_queue, QueueOptions::reply()).await?;
            Ok::<_, BridgeError>(channel)
        }
        .await;
        let channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                state.release_tenant_if_idle(tenant).await;
                state.release_connection_if_idle().await;
                return Err(e);
            }
        };

        if let Some(link) = state.tenants.get_mut(tenant) {
            link.sessions.insert(session.to_string());
        }
        state.sessions.insert(
            session.to_string(),
            SessionLink {
                tenant: tenant.to_string(),
                reply_queue: reply_queue.clone(),
                channel: Arc::new(channel),
                relay: None,
            },
        );
        info!(tenant = %tenant, session = %session, queue = %reply_queue, "messaging opened");
        state.log_stats();
        Ok(true)
    }

    /// Publish `request` to the queue its command routes to.
    ///
    /// Returns whether the broker accepted the message into its buffer.
    pub async fn send(&self, request: &Request) -> Result<bool, BridgeError> {
        let payload = request.to_json()?;
        let route = Route::for_command(request.command);
        let channel = {
            let state = self.state.lock().await;
            let tenant = state.tenants.get(&request.db_name).ok_or_else(|| {
                BridgeError::TenantNotOpen {
                    tenant: request.db_name.clone(),
                }
            })?;
            tenant
                .routes
                .get(&route)
                .cloned()
                .ok_or_else(|| BridgeError::TenantNotOpen {
                    tenant: request.db_name.clone(),
                })?
        };

        let queue = route.queue_name(&request.db_name);
        let properties = MessageProperties::correlated(
            request.request_id.clone(),
            reply_queue_name(&request.session_id),
        );
        let accepted = channel.publish(&queue, payload, properties).await?;
        if accepted {
            debug!(
                queue = %queue,
                request = %request.request_id,
                command = %request.command,
                "request published"
            );
        } else {
            warn!(queue = %queue, request = %request.request_id, "broker refused request");
        }
        Ok(accepted)
    }

    /// Start relaying the session's reply queue into `sink`.
    ///
    /// Each delivery is written as payload followed by the frame sentinel and
    /// acknowledged only after the write succeeded. Refused while another
    /// relay for the session is running. Returns the relay's generation.
    pub async fn bridge(&self, session: &str, sink: mpsc::Sender<Vec<u8>>) -> Result<u64, BridgeError> {
        let mut state = self.state.lock().await;
        state.start_relay(session, sink, false).await
    }

    /// Open messaging for the session and return its push channel.
    ///
    /// The first frame is always an `init` reply. Reopening a session that
    /// already streams moves its relay to the new channel, which ends the
    /// old one. Dropping the channel tears the session down unless a newer
    /// channel has taken it over.
    pub async fn open_push_channel(
        self: &Arc<Self>,
        tenant: &str,
        session: &str,
    ) -> Result<PushChannel, BridgeError> {
        let init = Reply::initialization(session).to_json()?;
        let (tx, rx) = mpsc::channel(self.reply_buffer);
        let _ = tx.send(encode_frame(&init)).await;

        let generation = {
            let mut state = self.state.lock().await;
            let created = self.open_in(&mut state, tenant, session).await?;
            match state.start_relay(session, tx, true).await {
                Ok(generation) => generation,
                Err(e) => {
                    // only roll back what this call opened
                    if created {
                        state.close_session(session).await;
                    }
                    return Err(e);
                }
            }
        };

        let bridge = Arc::clone(self);
        let session_id = session.to_string();
        Ok(PushChannel {
            session: session.to_string(),
            frames: rx,
            release: Some(Box::new(move || {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            bridge.release_relay(&session_id, generation).await;
                        });
                    }
                    Err(_) => warn!(session = %session_id, "no runtime to close messaging"),
                }
            })),
        })
    }

    /// Release everything the session owns. Idempotent.
    ///
    /// Only this session's reply channel is closed; the tenant's route channels
    /// go with its last session and the connection with the last tenant.
    pub async fn close_session(&self, session: &str) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        state.close_session(session).await;
        Ok(())
    }

    /// Close the session if relay `generation` still feeds it.
    async fn release_relay(&self, session: &str, generation: u64) {
        let mut state = self.state.lock().await;
        let current = state
            .sessions
            .get(session)
            .and_then(|link| link.relay.as_ref())
            .map(|relay| relay.generation);
        if current == Some(generation) {
            state.close_session(session).await;
        } else {
            debug!(session = %session, generation, "push channel superseded, session kept");
        }
    }

    /// Close every session and the connection.
    pub async fn shutdown(&self) {
        let sessions: Vec<String> = self.state.lock().await.sessions.keys().cloned().collect();
        for session in sessions {
            if let Err(e) = self.close_session(&session).await {
                warn!(session = %session, "shutdown: {e}");
            }
        }
    }

    pub async fn stats(&self) -> BridgeStats {
        self.state.lock().await.stats()
    }

    async fn connection(
        &self,
        state: &mut BridgeState<B>,
    ) -> Result<Arc<B::Connection>, BridgeError> {
        if let Some(connection) = state.connection.as_ref().filter(|c| c.is_open()) {
            return Ok(connection.clone());
        }
        if state.connection.take().is_some() {
            warn!("broker connection was lost, reconnecting");
            // Channels of a dead connection are unusable.
            state.tenants.clear();
            state.sessions.clear();
        }
        let connection = Arc::new(self.broker.connect().await?);
        info!("broker connection established");
        state.connection = Some(connection.clone());
        Ok(connection)
    }
}

impl<B: MessageBroker> BridgeState<B> {
    async fn start_relay(
        &mut self,
        session: &str,
        sink: mpsc::Sender<Vec<u8>>,
        replace: bool,
    ) -> Result<u64, BridgeError> {
        self.next_relay += 1;
        let generation = self.next_relay;
        let link = self
            .sessions
            .get_mut(session)
            .ok_or_else(|| BridgeError::SessionNotOpen {
                session: session.to_string(),
            })?;

        let mut handed_over = None;
        if let Some(old) = link.relay.take() {
            if !replace && !old.task.is_finished() {
                link.relay = Some(old);
                return Err(BridgeError::AlreadyBridged {
                    session: session.to_string(),
                });
            }
            old.cancel.cancel();
            match old.task.await {
                Ok(end) => handed_over = Some(end),
                Err(e) => warn!(session = %session, "relay task failed: {e}"),
            }
            debug!(session = %session, from = old.generation, to = generation, "relay replaced");
        }

        let (deliveries, unsent) = match handed_over {
            Some(RelayEnd {
                deliveries: Some(deliveries),
                unsent,
            }) => (deliveries, unsent),
            _ => (link.channel.consume(&link.reply_queue).await?, None),
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(relay(
            session.to_string(),
            link.channel.clone(),
            deliveries,
            unsent,
            sink,
            cancel.clone(),
        ));
        link.relay = Some(Relay {
            generation,
            cancel,
            task,
        });
        Ok(generation)
    }

    async fn close_session(&mut self, session: &str) {
        let Some(link) = self.sessions.remove(session) else {
            return;
        };

        if let Some(relay) = link.relay {
            relay.cancel.cancel();
        }
        if let Err(e) = link.channel.close().await {
            warn!(session = %session, "closing reply channel: {e}");
        }
        if let Some(tenant) = self.tenants.get_mut(&link.tenant) {
            tenant.sessions.remove(session);
        }
        self.release_tenant_if_idle(&link.tenant).await;
        self.release_connection_if_idle().await;

        info!(tenant = %link.tenant, session = %session, "messaging closed");
        self.log_stats();
    }

    async fn release_tenant_if_idle(&mut self, tenant: &str) {
        let idle = self
            .tenants
            .get(tenant)
            .is_some_and(|link| link.sessions.is_empty());
        if !idle {
            return;
        }
        if let Some(link) = self.tenants.remove(tenant) {
            for (route, channel) in link.routes {
                if let Err(e) = channel.close().await {
                    warn!(tenant = %tenant, route = ?route, "closing route channel: {e}");
                }
            }
            debug!(tenant = %tenant, "route channels closed");
        }
    }

    async fn release_connection_if_idle(&mut self) {
        if !self.tenants.is_empty() || !self.sessions.is_empty() {
            return;
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!("closing broker connection: {e}");
            }
            info!("broker connection closed");
        }
    }

    fn stats(&self) -> BridgeStats {
        BridgeStats {
            connected: self.connection.as_ref().is_some_and(|c| c.is_open()),
            tenants: self
                .tenants
                .iter()
                .map(|(name, link)| (name.clone(), link.sessions.len()))
                .collect(),
            sessions: self.sessions.len(),
            relaying: self
                .sessions
                .values()
                .filter(|l| l.relay.as_ref().is_some_and(|r| !r.task.is_finished()))
                .count(),
        }
    }

    fn log_stats(&self) {
        let stats = self.stats();
        if stats.tenants.is_empty() {
            debug!("no open channels");
        } else {
            debug!(
                tenants = ?stats.tenants,
                sessions = stats.sessions,
                relaying = stats.relaying,
                "open channels"
            );
        }
    }
}

/// Forward deliveries into `sink` until cancelled, the sink closes or the
/// broker ends the consumer.
async fn relay<C: BrokerChannel>(
    session: String,
    channel: Arc<C>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    mut unsent: Option<Delivery>,
    sink: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) -> RelayEnd {
    let mut drained = false;
    loop {
        let delivery = match unsent.take() {
            Some(d) => d,
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                delivery = deliveries.recv() => match delivery {
                    Some(d) => d,
                    None => {
                        drained = true;
                        break;
                    }
                },
            },
        };
        let frame = encode_frame(&delivery.payload);
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            res = sink.send(frame) => res.is_ok(),
        };
        if !written {
            debug!(session = %session, tag = delivery.delivery_tag, "delivery kept unacked");
            unsent = Some(delivery);
            break;
        }
        if let Err(e) = channel.ack(delivery.delivery_tag).await {
            warn!(session = %session, tag = delivery.delivery_tag, "ack failed: {e}");
        }
    }
    debug!(session = %session, "relay stopped");
    RelayEnd {
        deliveries: (!drained).then_some(deliveries),
        unsent,
    }
}

/// Inbound frame stream of one session.
///
/// Yields sentinel-terminated reply frames. Dropping it releases the
/// session's broker resources.
pub struct PushChannel {
    session: String,
    frames: mpsc::Receiver<Vec<u8>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl PushChannel {
    pub fn session_id(&self) -> &str {
        &self.session
    }

    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.frames.recv().await
    }
}

impl Stream for PushChannel {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_recv(cx)
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use futures::StreamExt;
    use grid_protocol::{CommandKind, FrameDecoder, Status};
    use std::time::Duration;

    fn bridge() -> Arc<BrokerBridge<MemoryBroker>> {
        Arc::new(BrokerBridge::new(MemoryBroker::new()))
    }

    fn request(tenant: &str, session: &str, command: CommandKind) -> Request {
        let mut request = Request::new(command, "test");
        request.db_name = tenant.to_string();
        request.session_id = session.to_string();
        request
    }

    async fn wait_until_closed(bridge: &BrokerBridge<MemoryBroker>) {
        for _ in 0..100 {
            if bridge.stats().await == BridgeStats::default() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("bridge still holds resources: {:?}", bridge.stats().await);
    }

    #[tokio::test]
    async fn connection_is_lazy_and_shared() {
        let bridge = bridge();
        assert!(!bridge.stats().await.connected);
        assert_eq!(bridge.broker().connects(), 0);

        bridge.open_session("Demo", "s1").await.unwrap();
        bridge.open_session("Demo", "s2").await.unwrap();
        bridge.open_session("Other", "s3").await.unwrap();
        // idempotent
        bridge.open_session("Demo", "s1").await.unwrap();

        let stats = bridge.stats().await;
        assert!(stats.connected);
        assert_eq!(stats.sessions, 3);
        assert_eq!(stats.tenants.get("Demo"), Some(&2));
        assert_eq!(bridge.broker().connects(), 1);
        assert!(bridge.broker().queue_exists("grid_service_demo").await);
        assert!(bridge.broker().queue_exists("authentication_service_demo").await);
        assert!(bridge.broker().queue_exists("locate_service_other").await);
        assert!(bridge.broker().queue_exists("callback_s2").await);
    }

    #[tokio::test]
    async fn send_routes_and_stamps_correlation() {
        let bridge = bridge();
        bridge.open_session("Demo", "s1").await.unwrap();
        let backend = bridge.broker().connect().await.unwrap();
        let listener = backend.create_channel().await.unwrap();
        let mut auth = listener.consume("authentication_service_demo").await.unwrap();

        let login = request("Demo", "s1", CommandKind::Authentication);
        assert!(bridge.send(&login).await.unwrap());
        assert!(bridge.send(&request("Demo", "s1", CommandKind::Load)).await.unwrap());

        let delivery = auth.recv().await.unwrap();
        assert_eq!(
            delivery.properties.correlation_id.as_deref(),
            Some(login.request_id.as_str())
        );
        assert_eq!(delivery.properties.reply_to.as_deref(), Some("callback_s1"));
        assert_eq!(Request::from_json(&delivery.payload).unwrap(), login);
        assert_eq!(bridge.broker().queue_depth("grid_service_demo").await, Some(1));
    }

    #[tokio::test]
    async fn send_without_tenant_is_an_error() {
        let bridge = bridge();
        let err = bridge
            .send(&request("Nope", "s1", CommandKind::Load))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::TenantNotOpen { .. }));
    }

    #[tokio::test]
    async fn push_channel_relays_and_acks() {
        let bridge = bridge();
        let mut push = bridge.open_push_channel("Demo", "s1").await.unwrap();
        let mut decoder = FrameDecoder::new();

        let first = push.recv().await.unwrap();
        let init = decoder.push(&first).remove(0).unwrap();
        assert_eq!(init.command, CommandKind::Initialization);
        assert_eq!(init.status, Status::Success);

        let backend = bridge.broker().connect().await.unwrap();
        let ch = backend.create_channel().await.unwrap();
        let req = request("Demo", "s1", CommandKind::Heartbeat);
        let reply = Reply::answering(&req, Status::Success);
        ch.publish(
            "callback_s1",
            reply.to_json().unwrap(),
            MessageProperties::default(),
        )
        .await
        .unwrap();

        let frame = push.next().await.unwrap();
        let decoded = decoder.push(&frame).remove(0).unwrap();
        assert_eq!(decoded, reply);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bridge.broker().unacked_count().await, 0);
        assert_eq!(bridge.stats().await.relaying, 1);
    }

    #[tokio::test]
    async fn second_relay_for_same_session_is_refused() {
        let bridge = bridge();
        let _push = bridge.open_push_channel("Demo", "s1").await.unwrap();
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            bridge.bridge("s1", tx).await,
            Err(BridgeError::AlreadyBridged { .. })
        ));
    }

    #[tokio::test]
    async fn teardown_is_scoped_to_the_session() {
        let bridge = bridge();
        bridge.open_session("Demo", "s1").await.unwrap();
        bridge.open_session("Demo", "s2").await.unwrap();

        bridge.close_session("s1").await.unwrap();
        bridge.close_session("s1").await.unwrap();
        assert!(!bridge.broker().queue_exists("callback_s1").await);
        assert!(bridge.broker().queue_exists("callback_s2").await);
        assert!(bridge.broker().queue_exists("grid_service_demo").await);
        assert_eq!(bridge.broker().open_connections(), 1);
        assert!(bridge.send(&request("Demo", "s2", CommandKind::Load)).await.unwrap());

        bridge.close_session("s2").await.unwrap();
        assert_eq!(bridge.stats().await, BridgeStats::default());
        assert_eq!(bridge.broker().open_connections(), 0);

        // reopening reconnects lazily
        bridge.open_session("Demo", "s3").await.unwrap();
        assert_eq!(bridge.broker().connects(), 2);
    }

    #[tokio::test]
    async fn dropping_push_channel_releases_session() {
        let bridge = bridge();
        let push = bridge.open_push_channel("Demo", "s1").await.unwrap();
        assert_eq!(push.session_id(), "s1");
        drop(push);
        wait_until_closed(&bridge).await;
        assert!(!bridge.broker().queue_exists("callback_s1").await);
    }

    async fn publish_reply(bridge: &BrokerBridge<MemoryBroker>, session: &str) -> Reply {
        let backend = bridge.broker().connect().await.unwrap();
        let ch = backend.create_channel().await.unwrap();
        let reply = Reply::answering(&request("Demo", session, CommandKind::Heartbeat), Status::Success);
        assert!(ch
            .publish(
                &reply_queue_name(session),
                reply.to_json().unwrap(),
                MessageProperties::default(),
            )
            .await
            .unwrap());
        reply
    }

    async fn next_reply(push: &mut PushChannel, decoder: &mut FrameDecoder) -> Reply {
        let frame = tokio::time::timeout(Duration::from_secs(1), push.recv())
            .await
            .unwrap()
            .unwrap();
        decoder.push(&frame).remove(0).unwrap()
    }

    #[tokio::test]
    async fn reopening_moves_the_relay_to_the_new_channel() {
        let bridge = bridge();
        let mut first = bridge.open_push_channel("Demo", "s1").await.unwrap();
        let mut decoder = FrameDecoder::new();
        assert_eq!(
            next_reply(&mut first, &mut decoder).await.command,
            CommandKind::Initialization
        );

        let mut second = bridge.open_push_channel("Demo", "s1").await.unwrap();
        assert_eq!(first.recv().await, None);

        let stats = bridge.stats().await;
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.relaying, 1);
        assert!(stats.connected);

        let mut decoder = FrameDecoder::new();
        assert_eq!(
            next_reply(&mut second, &mut decoder).await.command,
            CommandKind::Initialization
        );
        let reply = publish_reply(&bridge, "s1").await;
        assert_eq!(next_reply(&mut second, &mut decoder).await, reply);

        // the superseded channel's release leaves the session alone
        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bridge.stats().await.sessions, 1);
        assert!(bridge.broker().queue_exists("callback_s1").await);

        drop(second);
        wait_until_closed(&bridge).await;
    }

    #[tokio::test]
    async fn reconnect_right_after_hang_up_is_accepted() {
        let bridge = bridge();
        let first = bridge.open_push_channel("Demo", "s1").await.unwrap();
        drop(first);
        let mut second = bridge.open_push_channel("Demo", "s1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bridge.stats().await.sessions, 1);

        let mut decoder = FrameDecoder::new();
        next_reply(&mut second, &mut decoder).await;
        let reply = publish_reply(&bridge, "s1").await;
        assert_eq!(next_reply(&mut second, &mut decoder).await, reply);
    }

    #[tokio::test]
    async fn delivery_in_flight_is_handed_to_the_new_channel() {
        let bridge = Arc::new(BrokerBridge::with_reply_buffer(MemoryBroker::new(), 1));
        // init fills the buffer, so the relay stalls holding the reply
        let mut first = bridge.open_push_channel("Demo", "s1").await.unwrap();
        let reply = publish_reply(&bridge, "s1").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bridge.broker().unacked_count().await, 1);

        let mut second = bridge.open_push_channel("Demo", "s1").await.unwrap();
        let mut decoder = FrameDecoder::new();
        assert_eq!(
            next_reply(&mut second, &mut decoder).await.command,
            CommandKind::Initialization
        );
        assert_eq!(next_reply(&mut second, &mut decoder).await, reply);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bridge.broker().unacked_count().await, 0);

        // the old channel only ever saw its init frame
        assert!(first.recv().await.is_some());
        assert_eq!(first.recv().await, None);
    }

    #[tokio::test]
    async fn open_session_reports_creation() {
        let bridge = bridge();
        assert!(bridge.open_session("Demo", "s1").await.unwrap());
        assert!(!bridge.open_session("Demo", "s1").await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_broker_surfaces_error() {
        let bridge = bridge();
        bridge.broker().set_available(false);
        assert!(matches!(
            bridge.open_session("Demo", "s1").await,
            Err(BridgeError::Broker(_))
        ));
        assert_eq!(bridge.stats().await, BridgeStats::default());
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let bridge = bridge();
        bridge.open_session("A", "s1").await.unwrap();
        bridge.open_session("B", "s2").await.unwrap();
        bridge.shutdown().await;
        assert_eq!(bridge.stats().await, BridgeStats::default());
        assert_eq!(bridge.broker().open_connections(), 0);
    }
}
