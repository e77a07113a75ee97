// src/macros.rs

//
// Logging macros
//
// logging feature enabled  → tracing, tagged with the client identity when given
// logging feature disabled → only log_error prints to stderr
//
// Call sites either pass a plain format string, or an identity followed by `;`
// and a format string:
//
//     log_info!("memory broker created");
//     log_info!(self.name; "declared queue {queue}");
//

#![allow(unused_macros)]

// --------------------
// ERROR
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_error {
    ($client:expr; $($arg:tt)*) => {
        tracing::error!(client = %$client, $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($client:expr; $($arg:tt)*) => {
        eprintln!("[{}] {}", $client, format_args!($($arg)*))
    };
    ($($arg:tt)*) => {
        eprintln!($($arg)*)
    };
}

// --------------------
// WARN
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($client:expr; $($arg:tt)*) => {
        tracing::warn!(client = %$client, $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($client:expr; $($arg:tt)*) => {{
        let _ = &$client;
    }};
    ($($arg:tt)*) => {};
}

// --------------------
// INFO
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_info {
    ($client:expr; $($arg:tt)*) => {
        tracing::info!(client = %$client, $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_info {
    ($client:expr; $($arg:tt)*) => {{
        let _ = &$client;
    }};
    ($($arg:tt)*) => {};
}

// --------------------
// DEBUG
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($client:expr; $($arg:tt)*) => {
        tracing::debug!(client = %$client, $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($client:expr; $($arg:tt)*) => {{
        let _ = &$client;
    }};
    ($($arg:tt)*) => {};
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
