//! Resilient broker client.
//!
//! A [`BrokerClient`] owns at most one broker connection and one channel on
//! it. It connects lazily on first use, declares its queue or exchange on
//! every fresh channel, and reconnects on its own when the broker drops the
//! connection, re-registering its consumer if it had one.
//!
//! The implementation is split by concern:
//!
//! - `connection`: connection lifecycle state machine
//! - `topology`: queue / exchange declaration
//! - `messaging`: publish, route and consume

mod connection;
mod messaging;
mod topology;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::observer::Notifier;
use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    BrokerClientBuilder,
    ChannelPtr,
    ClientConfig,
    ClientIdentity,
    ConnectionPtr,
    DriverPtr,
    Error,
    ObserverPtr,
    Result,
    RetryToken,
};

/// A live connection together with its channel.
#[derive(Clone)]
pub(crate) struct Link {
    pub(crate) id: u64,
    pub(crate) connection: ConnectionPtr,
    pub(crate) channel: ChannelPtr,
}

/// Outcome of an in-flight dial. `Err` carries the number of failed attempts.
type DialOutcome = std::result::Result<Link, u32>;

/// In-flight dial, awaited by every concurrent caller.
type PendingLink = Shared<BoxFuture<'static, DialOutcome>>;

/// Connection lifecycle. Exactly one variant holds at any time.
pub(crate) enum ConnectionState {
    Disconnected,
    Connecting { id: u64, pending: PendingLink },
    Connected(Link),
}

/// Observable summary of the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Consumer registration; survives reconnects.
#[derive(Default)]
pub(crate) struct ConsumerRegistration {
    /// Set once `consume()` has been called.
    pub(crate) active: bool,
    /// Link the current consumer task is attached to.
    pub(crate) link_id: Option<u64>,
    pub(crate) task: Option<JoinHandle<()>>,
}

pub(crate) struct Inner {
    pub(crate) driver: DriverPtr,
    pub(crate) config: ClientConfig,
    pub(crate) notifier: Notifier,
    pub(crate) state: Mutex<ConnectionState>,
    pub(crate) consumer: Mutex<ConsumerRegistration>,
    next_id: AtomicU64,
}

impl Inner {
    // ---
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // ---
        let registration = lock_ignore_poison(&self.consumer);
        if let Some(task) = registration.task.as_ref() {
            task.abort();
        }
    }
}

/// Queue or exchange client with automatic reconnection.
///
/// Cheap to clone; clones share one connection and one consumer registration.
///
/// # Example
///
/// ```no_run
/// use mom_client::{BrokerClient, ChannelObserver, MemoryBroker, MqOptions};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn example() -> mom_client::Result<()> {
/// let broker = MemoryBroker::new();
/// let (observer, _events) = ChannelObserver::new();
///
/// let client = BrokerClient::builder()
///     .driver(Arc::new(broker))
///     .options(MqOptions::queue("memory://", "billing", "invoices"))
///     .observer(observer)
///     .build()?;
///
/// client.publish("invoiceCreated", &json!({ "id": 1 })).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
}

impl BrokerClient {
    // ---

    /// Start building a client.
    pub fn builder() -> BrokerClientBuilder {
        BrokerClientBuilder::new()
    }

    /// Create a client from a validated configuration (internal use by the builder).
    pub(crate) fn new(driver: DriverPtr, config: ClientConfig, observer: ObserverPtr) -> Self {
        // ---
        let notifier = Notifier::new(observer, config.identity.shared());

        Self {
            inner: Arc::new(Inner {
                driver,
                config,
                notifier,
                state: Mutex::new(ConnectionState::Disconnected),
                consumer: Mutex::new(ConsumerRegistration::default()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Client identity, `"<name>.<queue or exchange>"`.
    pub fn identity(&self) -> &ClientIdentity {
        &self.inner.config.identity
    }

    /// Validated configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn status(&self) -> ConnectionStatus {
        // ---
        match &*lock_ignore_poison(&self.inner.state) {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connecting { .. } => ConnectionStatus::Connecting,
            ConnectionState::Connected(_) => ConnectionStatus::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Whether `consume()` has been called on this client.
    pub fn is_consuming(&self) -> bool {
        lock_ignore_poison(&self.inner.consumer).active
    }

    /// Ensure a live connection and channel, dialing if necessary.
    ///
    /// Concurrent callers share one dial. When the dial fails the client
    /// keeps retrying per its [`ReconnectPolicy`](crate::ReconnectPolicy);
    /// this call resolves once a connection is up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReconnectExhausted`] only under a finite policy.
    pub async fn connect(&self, token: Option<RetryToken>) -> Result<ConnectionPtr> {
        let link = self.inner.connect(token).await?;
        Ok(link.connection)
    }

    /// Tear down the current connection, wait the jittered delay, connect
    /// again and re-register the consumer if there was one.
    pub async fn reconnect(&self, token: Option<RetryToken>) -> Result<()> {
        Arc::clone(&self.inner).reconnect(token).await
    }

    /// Close the current connection, if any, and forget it.
    ///
    /// Never fails; close errors are reported as events. A later `connect`
    /// (or any publish / consume) brings the client back up.
    pub async fn stop(&self, token: Option<RetryToken>) {
        self.inner.stop(token).await
    }

    /// Live channel, connecting if necessary.
    ///
    /// Returns the existing channel when one is open; never opens a second.
    pub async fn channel(&self) -> Result<ChannelPtr> {
        let link = self.inner.connect(None).await?;
        Ok(link.channel)
    }

    /// Channel of the current connection without dialing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when the client is not connected.
    pub fn current_channel(&self) -> Result<ChannelPtr> {
        // ---
        match &*lock_ignore_poison(&self.inner.state) {
            ConnectionState::Connected(link) => Ok(Arc::clone(&link.channel)),
            _ => Err(Error::NotConnected),
        }
    }

    /// Declare the configured queue or exchange on `channel`.
    ///
    /// Declaration failures are reported as events, not returned.
    pub async fn assert_topology(&self, channel: &ChannelPtr) {
        self.inner.assert_topology(channel).await
    }

    /// Send an event to the configured queue (queue mode only).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMode`] on an exchange client, [`Error::Serialization`]
    /// when the payload cannot be encoded. Transmission failures are
    /// reported as events and the message is dropped.
    pub async fn publish<T>(&self, event_name: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.inner.publish(event_name, payload).await
    }

    /// Publish an event to the configured exchange under
    /// `routing_prefix + routing_key` (exchange mode only).
    ///
    /// Same error contract as [`publish`](Self::publish).
    pub async fn route_and_publish<T>(
        &self,
        event_name: &str,
        routing_key: &str,
        payload: &T,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.inner
            .route_and_publish(event_name, routing_key, payload)
            .await
    }

    /// Start consuming the configured queue (queue mode only).
    ///
    /// Every delivery is reported as an [`EventKind::Update`](crate::EventKind::Update)
    /// event carrying the raw bytes and then acknowledged. The registration
    /// survives reconnects.
    pub async fn consume(&self) -> Result<()> {
        self.inner.consume().await
    }
}
