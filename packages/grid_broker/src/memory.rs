//! In-process broker.
//!
//! Queues live in one shared map behind a mutex. Messages published to a
//! queue with consumers are handed out round-robin over unbounded channels
//! and stay unacknowledged until the consuming channel acks them; closing
//! that channel requeues them at the front of their queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::broker::{
    BrokerChannel, BrokerConnection, Delivery, MessageBroker, MessageProperties, QueueOptions,
};
use crate::error::BrokerError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Cheap to clone; all clones share the same queues.
#[derive(Clone)]
pub struct MemoryBroker {
    core: Arc<Core>,
}

struct Core {
    state: Mutex<State>,
    queue_capacity: usize,
    next_id: AtomicU64,
    open_connections: AtomicUsize,
    connects: AtomicUsize,
    available: AtomicBool,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    unacked: HashMap<u64, Unacked>,
    next_tag: u64,
}

struct Queue {
    options: QueueOptions,
    /// Declaring channel of an exclusive queue.
    owner: Option<u64>,
    ready: VecDeque<Message>,
    consumers: Vec<Consumer>,
    cursor: usize,
    had_consumer: bool,
}

struct Consumer {
    channel: u64,
    sink: mpsc::UnboundedSender<Delivery>,
}

#[derive(Clone)]
struct Message {
    payload: Vec<u8>,
    properties: MessageProperties,
    redelivered: bool,
}

struct Unacked {
    queue: String,
    channel: u64,
    message: Message,
}

impl State {
    /// Hand ready messages of `name` to its consumers until one side runs out.
    fn dispatch(&mut self, name: &str) {
        let State {
            queues,
            unacked,
            next_tag,
        } = self;
        let Some(queue) = queues.get_mut(name) else {
            return;
        };
        while !queue.consumers.is_empty() {
            let Some(message) = queue.ready.pop_front() else {
                break;
            };
            let index = queue.cursor % queue.consumers.len();
            *next_tag += 1;
            let delivery = Delivery {
                delivery_tag: *next_tag,
                payload: message.payload.clone(),
                properties: message.properties.clone(),
                redelivered: message.redelivered,
            };
            if queue.consumers[index].sink.send(delivery).is_err() {
                debug!(queue = %name, "dropping consumer with closed receiver");
                queue.consumers.remove(index);
                queue.ready.push_front(message);
                continue;
            }
            unacked.insert(
                *next_tag,
                Unacked {
                    queue: name.to_string(),
                    channel: queue.consumers[index].channel,
                    message,
                },
            );
            queue.cursor = queue.cursor.wrapping_add(1);
        }
    }

    fn release_channel(&mut self, channel: u64) {
        for queue in self.queues.values_mut() {
            queue.consumers.retain(|c| c.channel != channel);
        }

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.channel == channel)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable_by(|a, b| b.cmp(a));
        let mut touched = Vec::new();
        for tag in tags {
            let Some(entry) = self.unacked.remove(&tag) else {
                continue;
            };
            if let Some(queue) = self.queues.get_mut(&entry.queue) {
                let mut message = entry.message;
                message.redelivered = true;
                queue.ready.push_front(message);
                if !touched.contains(&entry.queue) {
                    touched.push(entry.queue);
                }
            }
        }

        self.queues.retain(|name, queue| {
            let doomed = queue.owner == Some(channel)
                || (queue.options.auto_delete && queue.had_consumer && queue.consumers.is_empty());
            if doomed {
                debug!(queue = %name, dropped = queue.ready.len(), "queue deleted");
            }
            !doomed
        });

        for name in touched {
            self.dispatch(&name);
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Queues refuse publishes once `queue_capacity` messages are waiting.
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            core: Arc::new(Core {
                state: Mutex::new(State::default()),
                queue_capacity,
                next_id: AtomicU64::new(1),
                open_connections: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate the broker going away; new connections are refused.
    pub fn set_available(&self, available: bool) {
        self.core.available.store(available, Ordering::SeqCst);
    }

    pub fn open_connections(&self) -> usize {
        self.core.open_connections.load(Ordering::SeqCst)
    }

    /// Connections ever established.
    pub fn connects(&self) -> usize {
        self.core.connects.load(Ordering::SeqCst)
    }

    pub async fn queue_exists(&self, name: &str) -> bool {
        self.core.state.lock().await.queues.contains_key(name)
    }

    /// Messages waiting in `name`, not counting unacknowledged deliveries.
    pub async fn queue_depth(&self, name: &str) -> Option<usize> {
        self.core
            .state
            .lock()
            .await
            .queues
            .get(name)
            .map(|q| q.ready.len())
    }

    pub async fn unacked_count(&self) -> usize {
        self.core.state.lock().await.unacked.len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBroker for MemoryBroker {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, BrokerError> {
        if !self.core.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("broker is down".to_string()));
        }
        let id = self.core.next_id.fetch_add(1, Ordering::SeqCst);
        self.core.open_connections.fetch_add(1, Ordering::SeqCst);
        self.core.connects.fetch_add(1, Ordering::SeqCst);
        debug!(connection = id, "broker connection opened");
        Ok(MemoryConnection {
            core: self.core.clone(),
            id,
            open: AtomicBool::new(true),
            channels: Mutex::new(Vec::new()),
        })
    }
}

pub struct MemoryConnection {
    core: Arc<Core>,
    id: u64,
    open: AtomicBool,
    channels: Mutex<Vec<MemoryChannel>>,
}

impl BrokerConnection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn create_channel(&self) -> Result<MemoryChannel, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::ConnectionClosed);
        }
        let channel = MemoryChannel {
            core: self.core.clone(),
            id: self.core.next_id.fetch_add(1, Ordering::SeqCst),
            open: Arc::new(AtomicBool::new(true)),
        };
        let mut channels = self.channels.lock().await;
        channels.retain(|c| c.is_open());
        channels.push(channel.clone());
        debug!(connection = self.id, channel = channel.id, "channel opened");
        Ok(channel)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let channels = std::mem::take(&mut *self.channels.lock().await);
        for channel in channels {
            if let Err(e) = channel.close().await {
                warn!(connection = self.id, channel = channel.id, "closing channel: {e}");
            }
        }
        self.core.open_connections.fetch_sub(1, Ordering::SeqCst);
        debug!(connection = self.id, "broker connection closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Clones share the same underlying channel.
#[derive(Clone)]
pub struct MemoryChannel {
    core: Arc<Core>,
    id: u64,
    open: Arc<AtomicBool>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }
}

impl BrokerChannel for MemoryChannel {
    fn id(&self) -> u64 {
        self.id
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.core.state.lock().await;
        if let Some(queue) = state.queues.get(name) {
            if queue.owner.is_some_and(|owner| owner != self.id) {
                return Err(BrokerError::ResourceLocked(name.to_string()));
            }
            return Ok(());
        }
        state.queues.insert(
            name.to_string(),
            Queue {
                options,
                owner: options.exclusive.then_some(self.id),
                ready: VecDeque::new(),
                consumers: Vec::new(),
                cursor: 0,
                had_consumer: false,
            },
        );
        debug!(queue = %name, channel = self.id, exclusive = options.exclusive, "queue declared");
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<bool, BrokerError> {
        self.ensure_open()?;
        let mut state = self.core.state.lock().await;
        let Some(target) = state.queues.get_mut(queue) else {
            debug!(queue = %queue, "unroutable message dropped");
            return Ok(false);
        };
        if target.ready.len() >= self.core.queue_capacity {
            warn!(queue = %queue, capacity = self.core.queue_capacity, "queue full");
            return Ok(false);
        }
        target.ready.push_back(Message {
            payload,
            properties,
            redelivered: false,
        });
        state.dispatch(queue);
        Ok(true)
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError> {
        self.ensure_open()?;
        let mut state = self.core.state.lock().await;
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        if target.owner.is_some_and(|owner| owner != self.id) {
            return Err(BrokerError::ResourceLocked(queue.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        target.consumers.push(Consumer {
            channel: self.id,
            sink: tx,
        });
        target.had_consumer = true;
        state.dispatch(queue);
        Ok(rx)
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.core.state.lock().await;
        match state.unacked.get(&delivery_tag) {
            Some(entry) if entry.channel == self.id => {
                state.unacked.remove(&delivery_tag);
                Ok(())
            }
            _ => Err(BrokerError::UnknownDeliveryTag(delivery_tag)),
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.core.state.lock().await.release_channel(self.id);
        debug!(channel = self.id, "channel closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn channel(broker: &MemoryBroker) -> (MemoryConnection, MemoryChannel) {
        let connection = broker.connect().await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        (connection, channel)
    }

    #[tokio::test]
    async fn publish_then_consume() {
        let broker = MemoryBroker::new();
        let (_conn, ch) = channel(&broker).await;
        ch.declare_queue("work", QueueOptions::routing()).await.unwrap();

        let props = MessageProperties::correlated("q1", "callback_s1");
        assert!(ch.publish("work", b"hello".to_vec(), props.clone()).await.unwrap());
        assert_eq!(broker.queue_depth("work").await, Some(1));

        let mut rx = ch.consume("work").await.unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.payload, b"hello");
        assert_eq!(delivery.properties, props);
        assert!(!delivery.redelivered);
        assert_eq!(broker.queue_depth("work").await, Some(0));
        assert_eq!(broker.unacked_count().await, 1);

        ch.ack(delivery.delivery_tag).await.unwrap();
        assert_eq!(broker.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn unroutable_and_full_queues_refuse() {
        let broker = MemoryBroker::with_capacity(1);
        let (_conn, ch) = channel(&broker).await;
        let props = MessageProperties::default();
        assert!(!ch.publish("nowhere", vec![1], props.clone()).await.unwrap());

        ch.declare_queue("tiny", QueueOptions::routing()).await.unwrap();
        assert!(ch.publish("tiny", vec![1], props.clone()).await.unwrap());
        assert!(!ch.publish("tiny", vec![2], props).await.unwrap());
    }

    #[tokio::test]
    async fn exclusive_queue_dies_with_its_channel() {
        let broker = MemoryBroker::new();
        let (conn, owner) = channel(&broker).await;
        let other = conn.create_channel().await.unwrap();

        owner.declare_queue("callback_a", QueueOptions::reply()).await.unwrap();
        assert_eq!(
            other.declare_queue("callback_a", QueueOptions::reply()).await,
            Err(BrokerError::ResourceLocked("callback_a".to_string()))
        );
        assert!(matches!(
            other.consume("callback_a").await,
            Err(BrokerError::ResourceLocked(_))
        ));

        owner.close().await.unwrap();
        assert!(!broker.queue_exists("callback_a").await);
        // closing twice is fine
        owner.close().await.unwrap();
        assert_eq!(
            owner.declare_queue("x", QueueOptions::routing()).await,
            Err(BrokerError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn unacked_delivery_is_requeued_on_close() {
        let broker = MemoryBroker::new();
        let (conn, producer) = channel(&broker).await;
        producer.declare_queue("work", QueueOptions::routing()).await.unwrap();
        producer
            .publish("work", b"job".to_vec(), MessageProperties::default())
            .await
            .unwrap();

        let first = conn.create_channel().await.unwrap();
        let mut rx = first.consume("work").await.unwrap();
        let delivery = rx.recv().await.unwrap();
        first.close().await.unwrap();
        assert_eq!(broker.queue_depth("work").await, Some(1));

        let second = conn.create_channel().await.unwrap();
        assert_eq!(
            second.ack(delivery.delivery_tag).await,
            Err(BrokerError::UnknownDeliveryTag(delivery.delivery_tag))
        );
        let mut rx = second.consume("work").await.unwrap();
        let again = rx.recv().await.unwrap();
        assert_eq!(again.payload, b"job");
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn consumers_share_round_robin() {
        let broker = MemoryBroker::new();
        let (conn, a) = channel(&broker).await;
        let b = conn.create_channel().await.unwrap();
        a.declare_queue("work", QueueOptions::routing()).await.unwrap();
        let mut rx_a = a.consume("work").await.unwrap();
        let mut rx_b = b.consume("work").await.unwrap();

        for n in 0..4u8 {
            a.publish("work", vec![n], MessageProperties::default())
                .await
                .unwrap();
        }
        assert_eq!(rx_a.recv().await.unwrap().payload, vec![0]);
        assert_eq!(rx_b.recv().await.unwrap().payload, vec![1]);
        assert_eq!(rx_a.recv().await.unwrap().payload, vec![2]);
        assert_eq!(rx_b.recv().await.unwrap().payload, vec![3]);
    }

    #[tokio::test]
    async fn connection_close_closes_channels() {
        let broker = MemoryBroker::new();
        let (conn, ch) = channel(&broker).await;
        ch.declare_queue("callback_s", QueueOptions::reply()).await.unwrap();
        assert_eq!(broker.open_connections(), 1);

        conn.close().await.unwrap();
        assert!(!ch.is_open());
        assert!(!broker.queue_exists("callback_s").await);
        assert_eq!(broker.open_connections(), 0);
        assert!(matches!(
            conn.create_channel().await,
            Err(BrokerError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn unavailable_broker_refuses_connections() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        assert!(matches!(
            broker.connect().await,
            Err(BrokerError::Unavailable(_))
        ));
        broker.set_available(true);
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connects(), 1);
    }
}
