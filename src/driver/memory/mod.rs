// src/driver/memory/mod.rs

//! In-memory broker driver.
//!
//! This module provides a pure in-process implementation of the domain-level
//! driver traits. It is intended primarily for testing, local execution, and
//! as a reference for driver semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory broker defines the **reference behavior** for drivers. Other
//! drivers are expected to approximate it as closely as their underlying
//! broker allows and to document any unavoidable deviations:
//!
//! - Once `consume()` returns successfully, messages sent to that queue are
//!   delivered, including any that were already waiting.
//! - A connection closed by either side raises `LifecycleEvent::Closed` on
//!   every lifecycle handle of that connection.
//! - Operations on a channel of a closed connection fail.
//!
//! ## Non-Goals
//!
//! Persistence, flow control, heartbeats and header-based routing.

mod broker;

pub use broker::MemoryBroker;
