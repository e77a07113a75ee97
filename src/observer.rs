//! Client event surface.
//!
//! A client reports everything that happens asynchronously (connection
//! established, broker gone, publish failed, message delivered) as a
//! [`ClientEvent`] handed to its [`ClientObserver`]. The observer is a required
//! collaborator: a client cannot be built without one, so operational
//! failures are never silently dropped.
//!
//! Every event is also written to the crate log at the matching level.

use bytes::Bytes;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{log_debug, log_error, log_info};

/// Event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Lifecycle progress: connected, stopping, reconnecting, consuming.
    Info,
    /// Per-message diagnostics.
    Debug,
    /// Operational failure. The client keeps running.
    Error,
    /// A consumed message. `payload` carries the raw bytes.
    Update,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Error => "error",
            Self::Update => "update",
        }
    }
}

/// Structured context attached to an event.
///
/// Always carries the client identity in `name`; further fields are kept in
/// insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub name: Arc<str>,
    pub fields: Vec<(&'static str, String)>,
}

impl EventContext {
    // ---
    pub fn new(name: Arc<str>) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    /// Append a field.
    pub fn with(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    /// Look up a field by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        // ---
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "name={}", self.name)?;
        for (key, value) in &self.fields {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

/// One notification from a client.
#[derive(Debug, Clone)]
pub struct ClientEvent {
    // ---
    pub kind: EventKind,

    /// Human-readable description, e.g. `"Connection established"`.
    pub message: &'static str,

    pub context: EventContext,

    /// Raw message body, set on [`EventKind::Update`] only.
    pub payload: Option<Bytes>,
}

/// Receiver of client events.
///
/// Called synchronously from whichever task raised the event, so
/// implementations should return quickly. A panic inside `on_event` is
/// caught and logged; it never reaches the client's tasks.
///
/// Any `Fn(ClientEvent) + Send + Sync` closure is an observer.
pub trait ClientObserver: Send + Sync {
    fn on_event(&self, event: ClientEvent);
}

impl<F> ClientObserver for F
where
    F: Fn(ClientEvent) + Send + Sync,
{
    fn on_event(&self, event: ClientEvent) {
        self(event)
    }
}

/// Shared observer pointer.
pub type ObserverPtr = Arc<dyn ClientObserver>;

/// Observer that forwards every event into a tokio channel.
///
/// # Example
///
/// ```
/// use mom_client::{ChannelObserver, ClientObserver};
///
/// let (observer, mut events) = ChannelObserver::new();
/// drop(observer);
/// assert!(events.try_recv().is_err());
/// ```
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelObserver {
    // ---
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ClientObserver for ChannelObserver {
    fn on_event(&self, event: ClientEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Per-client event dispatcher: logs, then hands the event to the observer.
#[derive(Clone)]
pub(crate) struct Notifier {
    observer: ObserverPtr,
    name: Arc<str>,
}

impl Notifier {
    // ---
    pub(crate) fn new(observer: ObserverPtr, name: Arc<str>) -> Self {
        Self { observer, name }
    }

    /// Fresh context carrying the client identity.
    pub(crate) fn context(&self) -> EventContext {
        EventContext::new(Arc::clone(&self.name))
    }

    pub(crate) fn info(&self, message: &'static str, context: EventContext) {
        self.emit(EventKind::Info, message, context, None);
    }

    pub(crate) fn debug(&self, message: &'static str, context: EventContext) {
        self.emit(EventKind::Debug, message, context, None);
    }

    pub(crate) fn error(&self, message: &'static str, context: EventContext) {
        self.emit(EventKind::Error, message, context, None);
    }

    pub(crate) fn update(&self, payload: Bytes, context: EventContext) {
        self.emit(EventKind::Update, "Message received", context, Some(payload));
    }

    fn emit(
        &self,
        kind: EventKind,
        message: &'static str,
        context: EventContext,
        payload: Option<Bytes>,
    ) {
        // ---
        match kind {
            EventKind::Error => log_error!(self.name; "{message} ({context})"),
            EventKind::Info => log_info!(self.name; "{message} ({context})"),
            EventKind::Debug | EventKind::Update => log_debug!(self.name; "{message} ({context})"),
        }

        let event = ClientEvent {
            kind,
            message,
            context,
            payload,
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| self.observer.on_event(event)));
        if outcome.is_err() {
            log_error!(self.name; "observer panicked while handling a {} event", kind.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_context_fields() {
        // ---
        let ctx = EventContext::new(Arc::from("svc.orders"))
            .with("retry_token", 42)
            .with("queue_name", "orders");

        assert_eq!(ctx.get("retry_token"), Some("42"));
        assert_eq!(ctx.get("queue_name"), Some("orders"));
        assert_eq!(ctx.get("missing"), None);
        assert_eq!(ctx.to_string(), "name=svc.orders retry_token=42 queue_name=orders");
    }

    #[test]
    fn test_closure_observer_receives_events() {
        // ---
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: ObserverPtr = Arc::new(move |event: ClientEvent| {
            sink.lock().unwrap().push((event.kind, event.message));
        });

        let notifier = Notifier::new(observer, Arc::from("svc.orders"));
        notifier.info("Stopping", notifier.context());
        notifier.error("Connection closed", notifier.context());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (EventKind::Info, "Stopping"),
                (EventKind::Error, "Connection closed")
            ]
        );
    }

    #[test]
    fn test_update_carries_payload() {
        // ---
        let (observer, mut rx) = ChannelObserver::new();
        let notifier = Notifier::new(Arc::new(observer), Arc::from("svc.orders"));

        notifier.update(Bytes::from_static(b"{}"), notifier.context());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.payload.as_deref(), Some(&b"{}"[..]));
        assert_eq!(&*event.context.name, "svc.orders");
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        // ---
        let observer: ObserverPtr = Arc::new(|_event: ClientEvent| panic!("handler blew up"));
        let notifier = Notifier::new(observer, Arc::from("svc.orders"));

        // Must not unwind into the caller.
        notifier.update(Bytes::from_static(b"x"), notifier.context());
        notifier.debug("still alive", notifier.context());
    }
}
