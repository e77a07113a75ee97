// src/domain/driver.rs

//! Broker driver abstractions.
//!
//! This module defines the seam between the client facade and whatever
//! library actually speaks to the broker. It intentionally avoids any
//! reference to a concrete protocol implementation: the facade only needs to
//! dial a connection, open a channel on it, declare queues and exchanges,
//! move opaque byte payloads and observe the connection's lifecycle.
//!
//! Concrete implementations live under `src/driver/`. The in-memory driver
//! provides the reference semantics.
use crate::Result;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Exchange routing kind.
///
/// Parsed from the `exchangeType` option. Unknown values are kept verbatim
/// as [`ExchangeKind::Custom`] and passed through to the broker, which is
/// the authority on which plugin kinds it supports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
    /// Every bound queue receives every message.
    Fanout,
    /// Dot-separated word patterns with `*` and `#` wildcards.
    Topic,
    /// Header attribute matching.
    Headers,
    /// Broker-specific kind, e.g. `x-delayed-message`.
    Custom(String),
}

impl ExchangeKind {
    // ---

    /// Parse the wire name of an exchange kind.
    pub fn parse(kind: &str) -> Self {
        // ---
        match kind {
            "direct" => Self::Direct,
            "fanout" => Self::Fanout,
            "topic" => Self::Topic,
            "headers" => Self::Headers,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Wire name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Topic => "topic",
            Self::Headers => "headers",
            Self::Custom(kind) => kind,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for queue and exchange declarations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeclareOptions {
    /// Survive a broker restart.
    pub durable: bool,
}

/// Client metadata presented to the broker when dialing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProperties {
    /// Product name shown by broker management tooling.
    pub product: Arc<str>,
}

impl ClientProperties {
    pub fn new(product: impl Into<Arc<str>>) -> Self {
        Self {
            product: product.into(),
        }
    }
}

/// A message delivered to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    // ---
    /// Channel-scoped tag used to acknowledge the message.
    pub delivery_tag: u64,

    /// Routing key the message was published with.
    pub routing_key: Arc<str>,

    /// Set when the broker has delivered this message before.
    pub redelivered: bool,

    /// Raw message body.
    pub payload: Bytes,
}

/// Lifecycle notification raised by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The connection was closed, by either side.
    Closed,
    /// The connection reported an error. The driver may or may not close it.
    Error(String),
}

/// Receiver for lifecycle notifications of one connection.
///
/// Every call to [`BrokerConnection::lifecycle`] returns an independent
/// handle; dropping it unsubscribes.
pub struct LifecycleHandle {
    // ---
    pub events: mpsc::UnboundedReceiver<LifecycleEvent>,
}

/// Handle returned from a successful consume registration.
///
/// The inbox closes when the channel or connection goes away; that is the
/// "null delivery" a consumer sees on cancellation.
pub struct ConsumerHandle {
    // ---
    /// Consumer tag assigned to this registration.
    pub consumer_tag: Arc<str>,

    /// Deliveries, in broker order.
    pub inbox: mpsc::UnboundedReceiver<Delivery>,
}

/// Entry point of a broker driver.
///
/// # Notes
///
/// These traits use `async_trait`; the expanded documentation may show
/// explicit lifetimes and a boxed `Future`. Treat the methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait BrokerDriver: Send + Sync {
    // ---
    /// Dial the broker at `url`, presenting `properties` as client metadata.
    async fn connect(&self, url: &str, properties: &ClientProperties) -> Result<ConnectionPtr>;
}

/// One live broker connection.
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync {
    // ---
    /// Open a new channel on this connection.
    async fn create_channel(&self) -> Result<ChannelPtr>;

    /// Close the connection and every channel on it.
    async fn close(&self) -> Result<()>;

    /// Subscribe to `close` / `error` notifications.
    fn lifecycle(&self) -> LifecycleHandle;
}

/// A channel: the unit on which queue and exchange operations are issued.
#[async_trait::async_trait]
pub trait BrokerChannel: Send + Sync {
    // ---
    /// Declare `name` as a queue, creating it if absent.
    async fn assert_queue(&self, name: &str, options: DeclareOptions) -> Result<()>;

    /// Declare `name` as an exchange of `kind`, creating it if absent.
    async fn assert_exchange(
        &self,
        name: &str,
        kind: &ExchangeKind,
        options: DeclareOptions,
    ) -> Result<()>;

    /// Send `payload` straight to `queue` through the default exchange.
    async fn send_to_queue(&self, queue: &str, payload: Bytes) -> Result<()>;

    /// Publish `payload` to `exchange` under `routing_key`.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: Bytes) -> Result<()>;

    /// Start consuming `queue`.
    async fn consume(&self, queue: &str) -> Result<ConsumerHandle>;

    /// Acknowledge a delivery received on this channel.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;
}

/// Shared driver pointer.
pub type DriverPtr = Arc<dyn BrokerDriver>;

/// Shared connection pointer.
pub type ConnectionPtr = Arc<dyn BrokerConnection>;

/// Shared channel pointer.
pub type ChannelPtr = Arc<dyn BrokerChannel>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_exchange_kind_parse() {
        // ---
        assert_eq!(ExchangeKind::parse("direct"), ExchangeKind::Direct);
        assert_eq!(ExchangeKind::parse("fanout"), ExchangeKind::Fanout);
        assert_eq!(ExchangeKind::parse("topic"), ExchangeKind::Topic);
        assert_eq!(ExchangeKind::parse("headers"), ExchangeKind::Headers);
        assert_eq!(
            ExchangeKind::parse("x-delayed-message"),
            ExchangeKind::Custom("x-delayed-message".into())
        );
    }

    #[test]
    fn test_exchange_kind_round_trips_wire_name() {
        // ---
        for name in ["direct", "fanout", "topic", "headers", "x-custom"] {
            assert_eq!(ExchangeKind::parse(name).to_string(), name);
        }
    }
}
