// src/driver/memory/broker.rs

//! In-memory broker implementation.
//!
//! This file contains the concrete implementation of the domain-level driver
//! traits using in-process data structures only. All broker state lives
//! behind one mutex; no lock is held across an `.await`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    BrokerChannel,
    BrokerConnection,
    BrokerDriver,
    ChannelPtr,
    ClientProperties,
    ConnectionPtr,
    ConsumerHandle,
    DeclareOptions,
    Delivery,
    Error,
    ExchangeKind,
    LifecycleEvent,
    LifecycleHandle,
    Result,
};

/// In-process message broker.
///
/// Cheap to clone; clones share the same broker. Implements
/// [`BrokerDriver`], so it can be handed to a client directly.
///
/// ## Semantics
///
/// - Queues are FIFO. Messages wait in the queue until a consumer attaches.
/// - Several consumers on one queue receive messages round-robin.
/// - Unacknowledged messages return to the head of their queue, flagged as
///   redelivered, when the connection that received them goes away.
/// - `send_to_queue` on an unknown queue drops the message silently, like
///   the AMQP default exchange.
/// - Exchanges route by kind: `direct` (and custom kinds) on exact key,
///   `fanout` to every binding, `topic` on `*`/`#` word patterns, `headers`
///   never matches since messages carry no headers here.
///
/// ## Fault injection
///
/// Tests drive failure paths through [`fail_next_dials`](Self::fail_next_dials),
/// [`fail_close`](Self::fail_close), [`fail_publish`](Self::fail_publish),
/// [`fail_assert`](Self::fail_assert), [`fail_channel`](Self::fail_channel),
/// [`drop_connections`](Self::drop_connections) and
/// [`emit_error`](Self::emit_error).
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    exchanges: HashMap<String, ExchangeState>,
    connections: HashMap<u64, ConnectionEntry>,
    next_id: u64,
    dial_count: u64,
    faults: Faults,
}

#[derive(Default)]
struct Faults {
    failing_dials: u32,
    fail_close: bool,
    fail_publish: bool,
    fail_assert: bool,
    fail_channel: bool,
    dial_delay: Option<Duration>,
}

struct ConnectionEntry {
    product: Arc<str>,
    watchers: Vec<mpsc::UnboundedSender<LifecycleEvent>>,
}

#[derive(Clone)]
struct Message {
    routing_key: Arc<str>,
    payload: Bytes,
    redelivered: bool,
}

struct Unacked {
    connection_id: u64,
    message: Message,
}

struct ConsumerEntry {
    connection_id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct QueueState {
    durable: bool,
    ready: VecDeque<Message>,
    consumers: Vec<ConsumerEntry>,
    cursor: usize,
    unacked: HashMap<u64, Unacked>,
}

struct Binding {
    queue: String,
    pattern: String,
}

struct ExchangeState {
    kind: ExchangeKind,
    durable: bool,
    bindings: Vec<Binding>,
}

impl BrokerState {
    // ---

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_alive(&self, connection_id: u64) -> bool {
        self.connections.contains_key(&connection_id)
    }

    fn ensure_alive(&self, connection_id: u64) -> Result<()> {
        // ---
        if self.is_alive(connection_id) {
            Ok(())
        } else {
            Err(Error::Driver(format!(
                "memory: connection {connection_id} is closed"
            )))
        }
    }

    /// Append to a queue and hand out whatever can be delivered.
    ///
    /// Returns false when the queue does not exist.
    fn enqueue(&mut self, queue: &str, message: Message) -> bool {
        // ---
        let BrokerState {
            queues, next_id, ..
        } = self;

        match queues.get_mut(queue) {
            Some(state) => {
                state.ready.push_back(message);
                dispatch(state, next_id);
                true
            }
            None => false,
        }
    }

    /// Remove a connection, its consumers and requeue what it left unacked.
    fn teardown(&mut self, connection_id: u64) -> Option<ConnectionEntry> {
        // ---
        let entry = self.connections.remove(&connection_id)?;

        let BrokerState {
            queues, next_id, ..
        } = self;

        for queue in queues.values_mut() {
            queue
                .consumers
                .retain(|consumer| consumer.connection_id != connection_id);

            let mut orphaned: Vec<(u64, Message)> = queue
                .unacked
                .iter()
                .filter(|(_, unacked)| unacked.connection_id == connection_id)
                .map(|(tag, unacked)| (*tag, unacked.message.clone()))
                .collect();

            // Highest tag first so the oldest message ends up at the head.
            orphaned.sort_by(|a, b| b.0.cmp(&a.0));
            for (tag, mut message) in orphaned {
                queue.unacked.remove(&tag);
                message.redelivered = true;
                queue.ready.push_front(message);
            }

            dispatch(queue, next_id);
        }

        Some(entry)
    }
}

/// Deliver ready messages to consumers, round-robin.
fn dispatch(queue: &mut QueueState, next_tag: &mut u64) {
    // ---
    while !queue.ready.is_empty() && !queue.consumers.is_empty() {
        let index = queue.cursor % queue.consumers.len();
        let Some(message) = queue.ready.pop_front() else {
            break;
        };

        *next_tag += 1;
        let delivery_tag = *next_tag;
        let delivery = Delivery {
            delivery_tag,
            routing_key: Arc::clone(&message.routing_key),
            redelivered: message.redelivered,
            payload: message.payload.clone(),
        };

        let consumer = &queue.consumers[index];
        let connection_id = consumer.connection_id;

        if consumer.tx.send(delivery).is_err() {
            // Consumer inbox dropped; forget it and retry the message.
            queue.consumers.remove(index);
            queue.ready.push_front(message);
            continue;
        }

        queue.unacked.insert(
            delivery_tag,
            Unacked {
                connection_id,
                message,
            },
        );
        queue.cursor = index + 1;
    }
}

/// Whether `key` matches a binding `pattern` on an exchange of `kind`.
fn routes(kind: &ExchangeKind, pattern: &str, key: &str) -> bool {
    // ---
    match kind {
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => {
            let pattern: Vec<&str> = pattern.split('.').collect();
            let key: Vec<&str> = key.split('.').collect();
            topic_matches(&pattern, &key)
        }
        ExchangeKind::Headers => false,
        ExchangeKind::Direct | ExchangeKind::Custom(_) => pattern == key,
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` zero or more words.
fn topic_matches(pattern: &[&str], key: &[&str]) -> bool {
    // ---
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            topic_matches(rest, key) || (!key.is_empty() && topic_matches(pattern, &key[1..]))
        }
        (Some((&"*", rest)), Some((_, key_rest))) => topic_matches(rest, key_rest),
        (Some((word, rest)), Some((key_word, key_rest))) => {
            word == key_word && topic_matches(rest, key_rest)
        }
        _ => false,
    }
}

impl MemoryBroker {
    // ---

    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        lock_ignore_poison(&self.state)
    }

    /// Number of dial attempts received, successful or not.
    pub fn dial_count(&self) -> u64 {
        self.lock().dial_count
    }

    /// Number of open connections.
    pub fn live_connections(&self) -> usize {
        self.lock().connections.len()
    }

    /// `product` client property of every open connection.
    pub fn client_products(&self) -> Vec<String> {
        // ---
        self.lock()
            .connections
            .values()
            .map(|entry| entry.product.to_string())
            .collect()
    }

    /// Refuse the next `count` dial attempts.
    pub fn fail_next_dials(&self, count: u32) {
        self.lock().faults.failing_dials = count;
    }

    /// Make `close()` fail (and leave the connection open) while set.
    pub fn fail_close(&self, fail: bool) {
        self.lock().faults.fail_close = fail;
    }

    /// Make every publish fail while set.
    pub fn fail_publish(&self, fail: bool) {
        self.lock().faults.fail_publish = fail;
    }

    /// Make queue and exchange declarations fail while set.
    pub fn fail_assert(&self, fail: bool) {
        self.lock().faults.fail_assert = fail;
    }

    /// Make channel creation fail while set.
    pub fn fail_channel(&self, fail: bool) {
        self.lock().faults.fail_channel = fail;
    }

    /// Delay every dial by `delay` before it is processed.
    pub fn set_dial_delay(&self, delay: Option<Duration>) {
        self.lock().faults.dial_delay = delay;
    }

    /// Close every connection from the broker side, as a broker restart would.
    ///
    /// Returns the number of connections dropped.
    pub fn drop_connections(&self) -> usize {
        // ---
        let mut state = self.lock();
        let ids: Vec<u64> = state.connections.keys().copied().collect();

        for id in &ids {
            if let Some(entry) = state.teardown(*id) {
                notify(&entry.watchers, LifecycleEvent::Closed);
            }
        }

        log_debug!("memory broker dropped {} connections", ids.len());
        ids.len()
    }

    /// Raise a lifecycle error on every open connection without closing it.
    pub fn emit_error(&self, message: &str) {
        // ---
        let state = self.lock();
        for entry in state.connections.values() {
            notify(&entry.watchers, LifecycleEvent::Error(message.to_string()));
        }
    }

    /// Declare a queue out of band.
    pub fn declare_queue(&self, name: &str, durable: bool) {
        // ---
        self.lock()
            .queues
            .entry(name.to_string())
            .or_insert_with(|| QueueState {
                durable,
                ..QueueState::default()
            });
    }

    /// Bind `queue` to `exchange` with a routing `pattern`.
    pub fn bind_queue(&self, exchange: &str, queue: &str, pattern: &str) -> Result<()> {
        // ---
        let mut state = self.lock();

        if !state.queues.contains_key(queue) {
            return Err(Error::Driver(format!("memory: no queue '{queue}'")));
        }
        let exchange_state = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| Error::Driver(format!("memory: no exchange '{exchange}'")))?;

        exchange_state.bindings.push(Binding {
            queue: queue.to_string(),
            pattern: pattern.to_string(),
        });
        Ok(())
    }

    /// Whether a queue has been declared.
    pub fn has_queue(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    /// Whether an exchange has been declared.
    pub fn has_exchange(&self, name: &str) -> bool {
        self.lock().exchanges.contains_key(name)
    }

    /// Messages waiting in a queue (not yet delivered).
    pub fn queue_depth(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, |q| q.ready.len())
    }

    /// Messages delivered from a queue but not yet acknowledged.
    pub fn unacked_count(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, |q| q.unacked.len())
    }

    /// Active consumers on a queue.
    pub fn consumer_count(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, |q| q.consumers.len())
    }

    /// Copy of the bodies waiting in a queue, head first.
    pub fn peek_queue(&self, name: &str) -> Vec<Bytes> {
        // ---
        self.lock()
            .queues
            .get(name)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }
}

fn notify(watchers: &[mpsc::UnboundedSender<LifecycleEvent>], event: LifecycleEvent) {
    for watcher in watchers {
        let _ = watcher.send(event.clone());
    }
}

#[async_trait::async_trait]
impl BrokerDriver for MemoryBroker {
    // ---
    async fn connect(&self, url: &str, properties: &ClientProperties) -> Result<ConnectionPtr> {
        // ---
        let delay = self.lock().faults.dial_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.dial_count += 1;

        if state.faults.failing_dials > 0 {
            state.faults.failing_dials -= 1;
            return Err(Error::Driver(format!("memory: connection refused ({url})")));
        }

        let id = state.next_id();
        state.connections.insert(
            id,
            ConnectionEntry {
                product: Arc::clone(&properties.product),
                watchers: Vec::new(),
            },
        );

        log_debug!("memory broker accepted connection {id} from {}", properties.product);

        Ok(Arc::new(MemoryConnection {
            id,
            broker: self.clone(),
        }))
    }
}

/// Connection to a [`MemoryBroker`].
struct MemoryConnection {
    id: u64,
    broker: MemoryBroker,
}

#[async_trait::async_trait]
impl BrokerConnection for MemoryConnection {
    // ---
    async fn create_channel(&self) -> Result<ChannelPtr> {
        // ---
        let state = self.broker.lock();
        state.ensure_alive(self.id)?;

        if state.faults.fail_channel {
            return Err(Error::Driver("memory: channel open refused".into()));
        }

        Ok(Arc::new(MemoryChannel {
            connection_id: self.id,
            broker: self.broker.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        // ---
        let mut state = self.broker.lock();

        if state.faults.fail_close {
            return Err(Error::Driver("memory: close failed".into()));
        }

        if let Some(entry) = state.teardown(self.id) {
            notify(&entry.watchers, LifecycleEvent::Closed);
        }
        Ok(())
    }

    fn lifecycle(&self) -> LifecycleHandle {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.broker.lock();

        match state.connections.get_mut(&self.id) {
            Some(entry) => entry.watchers.push(tx),
            None => {
                let _ = tx.send(LifecycleEvent::Closed);
            }
        }

        LifecycleHandle { events: rx }
    }
}

/// Channel on a [`MemoryConnection`].
struct MemoryChannel {
    connection_id: u64,
    broker: MemoryBroker,
}

#[async_trait::async_trait]
impl BrokerChannel for MemoryChannel {
    // ---
    async fn assert_queue(&self, name: &str, options: DeclareOptions) -> Result<()> {
        // ---
        let mut state = self.broker.lock();
        state.ensure_alive(self.connection_id)?;

        if state.faults.fail_assert {
            return Err(Error::Driver(format!("memory: declare queue '{name}' refused")));
        }

        let queue = state
            .queues
            .entry(name.to_string())
            .or_insert_with(|| QueueState {
                durable: options.durable,
                ..QueueState::default()
            });

        if queue.durable != options.durable {
            return Err(Error::Driver(format!(
                "memory: inequivalent arg 'durable' for queue '{name}'"
            )));
        }
        Ok(())
    }

    async fn assert_exchange(
        &self,
        name: &str,
        kind: &ExchangeKind,
        options: DeclareOptions,
    ) -> Result<()> {
        // ---
        let mut state = self.broker.lock();
        state.ensure_alive(self.connection_id)?;

        if state.faults.fail_assert {
            return Err(Error::Driver(format!(
                "memory: declare exchange '{name}' refused"
            )));
        }

        let exchange = state
            .exchanges
            .entry(name.to_string())
            .or_insert_with(|| ExchangeState {
                kind: kind.clone(),
                durable: options.durable,
                bindings: Vec::new(),
            });

        if exchange.kind != *kind || exchange.durable != options.durable {
            return Err(Error::Driver(format!(
                "memory: inequivalent arguments for exchange '{name}'"
            )));
        }
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, payload: Bytes) -> Result<()> {
        // ---
        let mut state = self.broker.lock();
        state.ensure_alive(self.connection_id)?;

        if state.faults.fail_publish {
            return Err(Error::Driver("memory: publish refused".into()));
        }

        let message = Message {
            routing_key: Arc::from(queue),
            payload,
            redelivered: false,
        };
        if !state.enqueue(queue, message) {
            log_debug!("memory broker dropped unroutable message for '{queue}'");
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Bytes) -> Result<()> {
        // ---
        let mut state = self.broker.lock();
        state.ensure_alive(self.connection_id)?;

        if state.faults.fail_publish {
            return Err(Error::Driver("memory: publish refused".into()));
        }

        let exchange_state = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| Error::Driver(format!("memory: no exchange '{exchange}'")))?;

        let mut targets: Vec<String> = exchange_state
            .bindings
            .iter()
            .filter(|binding| routes(&exchange_state.kind, &binding.pattern, routing_key))
            .map(|binding| binding.queue.clone())
            .collect();
        targets.sort();
        targets.dedup();

        let routing_key: Arc<str> = Arc::from(routing_key);
        for queue in targets {
            let message = Message {
                routing_key: Arc::clone(&routing_key),
                payload: payload.clone(),
                redelivered: false,
            };
            state.enqueue(&queue, message);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<ConsumerHandle> {
        // ---
        let mut state = self.broker.lock();
        state.ensure_alive(self.connection_id)?;

        let consumer_id = state.next_id();
        let BrokerState {
            queues, next_id, ..
        } = &mut *state;

        let queue_state = queues
            .get_mut(queue)
            .ok_or_else(|| Error::Driver(format!("memory: no queue '{queue}'")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        queue_state.consumers.push(ConsumerEntry {
            connection_id: self.connection_id,
            tx,
        });
        dispatch(queue_state, next_id);

        Ok(ConsumerHandle {
            consumer_tag: Arc::from(format!("memory-ctag-{consumer_id}")),
            inbox: rx,
        })
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        // ---
        let mut state = self.broker.lock();
        state.ensure_alive(self.connection_id)?;

        let connection_id = self.connection_id;
        for queue in state.queues.values_mut() {
            let owned = queue
                .unacked
                .get(&delivery.delivery_tag)
                .is_some_and(|unacked| unacked.connection_id == connection_id);
            if owned {
                queue.unacked.remove(&delivery.delivery_tag);
                return Ok(());
            }
        }

        Err(Error::Driver(format!(
            "memory: unknown delivery tag {}",
            delivery.delivery_tag
        )))
    }
}
