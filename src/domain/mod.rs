//! Domain layer public interface.
//!
//! This module defines the driver seam: abstractions that are independent of
//! any broker client library, protocol or infrastructure concern.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod driver;

// --- Driver domain re-exports ---

pub use driver::{
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
