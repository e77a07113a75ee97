//! Broker driver implementations.
//!
//! This module provides concrete implementations of the domain-level driver
//! traits. The in-memory broker is always available; protocol drivers are
//! hidden behind feature flags.
//!
//! Client code must not depend on driver-specific types beyond the
//! constructor.

mod memory;

#[cfg(feature = "driver_lapin")]
mod amqp;

pub use memory::MemoryBroker;

#[cfg(feature = "driver_lapin")]
pub use amqp::LapinDriver;
