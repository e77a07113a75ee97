//! Resilient message-broker client with automatic reconnection.
//!
//! A [`BrokerClient`] wraps one broker connection and one channel and binds
//! them to a single topology: a point-to-point queue, or a routed exchange.
//! It connects lazily, declares its topology on every fresh channel, wraps
//! outgoing data in a versioned JSON [`MessageEnvelope`], and reconnects with
//! jittered backoff when the broker goes away, re-registering its consumer.
//!
//! Asynchronous outcomes (connection lifecycle, publish failures, incoming
//! messages) are reported to a [`ClientObserver`] rather than returned.
//!
//! Brokers are reached through the [`BrokerDriver`] seam. An in-process
//! [`MemoryBroker`] is always available; the AMQP driver is enabled with the
//! `driver_lapin` feature.

// Import all sub modules once...
mod macros;

mod client;
mod client_builder;
mod config;
mod domain;
mod driver;
mod envelope;
mod error;
mod observer;
mod reconnect;
mod sync;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::{BrokerClient, ConnectionStatus};
pub use client_builder::BrokerClientBuilder;

pub use config::{ClientConfig, ClientIdentity, MessageOptions, MqOptions, Topology};
pub use envelope::MessageEnvelope;
pub use error::{Error, Result};
pub use reconnect::{ReconnectPolicy, RetryToken};

pub use observer::{
    //
    ChannelObserver,
    ClientEvent,
    ClientObserver,
    EventContext,
    EventKind,
    ObserverPtr,
};

pub use driver::MemoryBroker;

#[cfg(feature = "driver_lapin")]
pub use driver::LapinDriver;

// --- public re-exports
pub use domain::{
    //
    BrokerChannel,
    BrokerConnection,
    BrokerDriver,
    ChannelPtr,
    ClientProperties,
    ConnectionPtr,
    ConsumerHandle,
    DeclareOptions,
    Delivery,
    DriverPtr,
    ExchangeKind,
    LifecycleEvent,
    LifecycleHandle,
};
