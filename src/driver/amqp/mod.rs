//! AMQP protocol drivers.
//!
//! This module contains driver implementations for AMQP-based brokers.
//! Currently supports:
//! - lapin - AMQP 0-9-1 (RabbitMQ)

mod lapin;

pub use self::lapin::LapinDriver;
