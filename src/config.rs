//! Client configuration and validation.
//!
//! [`MqOptions`] is the raw, caller-supplied record. Every field is optional
//! so the validator can report the first missing one in a fixed precedence
//! order. A successful validation produces an immutable [`ClientConfig`].

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use crate::{
    // ---
    DriverPtr,
    Error,
    ExchangeKind,
    ReconnectPolicy,
    Result,
};

const TYPE_QUEUE: &str = "queue";
const TYPE_EXCHANGE: &str = "exchange";

/// Envelope settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOptions {
    /// Envelope `version`; `"1"` when absent.
    pub version: Option<String>,

    /// Prefix for envelope names (`"<serviceName>.<eventName>"`).
    pub service_name: Option<String>,
}

impl MessageOptions {
    // ---

    /// Envelope version to stamp on outgoing messages.
    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or("1")
    }

    /// Full envelope name for `event_name`.
    pub fn qualified_name(&self, event_name: &str) -> String {
        // ---
        match self.service_name.as_deref() {
            Some(service) => format!("{service}.{event_name}"),
            None => event_name.to_string(),
        }
    }
}

/// Raw construction parameters.
///
/// Field names follow the camelCase wire form when deserialized, so the
/// record can be loaded from whatever configuration source the owner uses.
///
/// # Example
///
/// ```
/// use mom_client::MqOptions;
///
/// let options = MqOptions::queue("amqp://localhost:5672/%2f", "billing", "invoices")
///     .with_durable(true)
///     .with_service_name("billing");
///
/// assert_eq!(options.queue_name.as_deref(), Some("invoices"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqOptions {
    // ---
    /// Broker URL.
    pub url: Option<String>,

    /// Logical service name.
    pub name: Option<String>,

    /// `"queue"` or `"exchange"`.
    #[serde(rename = "type")]
    pub kind: Option<String>,

    /// Target queue (queue mode).
    pub queue_name: Option<String>,

    /// Target exchange (exchange mode).
    pub exchange_name: Option<String>,

    /// Exchange kind, e.g. `"topic"` (exchange mode).
    pub exchange_type: Option<String>,

    /// Prepended to every routing key (exchange mode).
    pub routing_prefix: Option<String>,

    /// Declare the queue or exchange as durable. Defaults to `false`.
    pub durable: Option<bool>,

    /// Envelope settings.
    pub msg: Option<MessageOptions>,
}

impl MqOptions {
    // ---

    /// Options for a point-to-point queue client.
    pub fn queue(
        url: impl Into<String>,
        name: impl Into<String>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            url: Some(url.into()),
            name: Some(name.into()),
            kind: Some(TYPE_QUEUE.to_string()),
            queue_name: Some(queue_name.into()),
            ..Self::default()
        }
    }

    /// Options for a routed exchange client.
    pub fn exchange(
        url: impl Into<String>,
        name: impl Into<String>,
        exchange_name: impl Into<String>,
        exchange_type: impl Into<String>,
        routing_prefix: impl Into<String>,
    ) -> Self {
        Self {
            url: Some(url.into()),
            name: Some(name.into()),
            kind: Some(TYPE_EXCHANGE.to_string()),
            exchange_name: Some(exchange_name.into()),
            exchange_type: Some(exchange_type.into()),
            routing_prefix: Some(routing_prefix.into()),
            ..Self::default()
        }
    }

    /// Set the durability flag.
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Set the envelope service name.
    pub fn with_service_name(mut self, service: impl Into<String>) -> Self {
        self.msg.get_or_insert_with(MessageOptions::default).service_name = Some(service.into());
        self
    }

    /// Override the envelope version.
    pub fn with_message_version(mut self, version: impl Into<String>) -> Self {
        self.msg.get_or_insert_with(MessageOptions::default).version = Some(version.into());
        self
    }
}

/// Target of a client, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    // ---
    /// Point-to-point queue.
    Queue { name: String, durable: bool },

    /// Routed exchange.
    Exchange {
        name: String,
        kind: ExchangeKind,
        routing_prefix: String,
        durable: bool,
    },
}

impl Topology {
    // ---

    /// Queue or exchange name.
    pub fn target_name(&self) -> &str {
        match self {
            Self::Queue { name, .. } | Self::Exchange { name, .. } => name,
        }
    }

    /// Queue name, in queue mode.
    pub fn queue_name(&self) -> Option<&str> {
        match self {
            Self::Queue { name, .. } => Some(name),
            Self::Exchange { .. } => None,
        }
    }

    pub fn is_queue(&self) -> bool {
        matches!(self, Self::Queue { .. })
    }
}

/// Identity of a client: `"<service name>.<queue or exchange name>"`.
///
/// Sent to the broker as client metadata and attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(Arc<str>);

impl ClientIdentity {
    // ---
    pub fn new(service: &str, target: &str) -> Self {
        Self(Arc::from(format!("{service}.{target}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn shared(&self) -> Arc<str> {
        Arc::clone(&self.0)
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated, immutable client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub identity: ClientIdentity,
    pub topology: Topology,
    pub message: MessageOptions,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    // ---

    /// Validate construction parameters.
    ///
    /// Rules are checked in order and the first violation is returned:
    ///
    /// 1. driver present
    /// 2. options present
    /// 3. `url` present
    /// 4. `name` present
    /// 5. `type` present and one of `queue`, `exchange`
    /// 6. queue mode: `queueName` present
    /// 7. exchange mode: `exchangeName`, `exchangeType`, `routingPrefix` present
    ///
    /// The reconnect policy starts at its default; the builder may replace it.
    pub fn validate(driver: Option<&DriverPtr>, options: Option<&MqOptions>) -> Result<Self> {
        // ---
        if driver.is_none() {
            return Err(Error::MissingConfig("broker driver"));
        }
        let options = options.ok_or(Error::MissingConfig("options"))?;
        let url = required(&options.url, "options.url")?;
        let name = required(&options.name, "options.name")?;
        let kind = required(&options.kind, "options.type")?;
        let durable = options.durable.unwrap_or(false);

        let topology = match kind {
            TYPE_QUEUE => Topology::Queue {
                name: required(&options.queue_name, "options.queueName")?.to_string(),
                durable,
            },
            TYPE_EXCHANGE => {
                let exchange = required(&options.exchange_name, "options.exchangeName")?;
                let exchange_type = required(&options.exchange_type, "options.exchangeType")?;
                let prefix = required(&options.routing_prefix, "options.routingPrefix")?;
                Topology::Exchange {
                    name: exchange.to_string(),
                    kind: ExchangeKind::parse(exchange_type),
                    routing_prefix: prefix.to_string(),
                    durable,
                }
            }
            other => return Err(Error::InvalidTopologyType(other.to_string())),
        };

        Ok(Self {
            url: url.to_string(),
            identity: ClientIdentity::new(name, topology.target_name()),
            topology,
            message: options.msg.clone().unwrap_or_default(),
            reconnect: ReconnectPolicy::default(),
        })
    }
}

fn required<'a>(field: &'a Option<String>, label: &'static str) -> Result<&'a str> {
    field.as_deref().ok_or(Error::MissingConfig(label))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::MemoryBroker;

    fn driver() -> DriverPtr {
        Arc::new(MemoryBroker::new())
    }

    fn message(options: Option<&MqOptions>) -> String {
        // ---
        let driver = driver();
        match ClientConfig::validate(Some(&driver), options) {
            Ok(_) => String::new(),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn test_missing_driver_checked_first() {
        // ---
        let err = ClientConfig::validate(None, None).unwrap_err();
        assert_eq!(err.to_string(), "broker driver is required");
    }

    #[test]
    fn test_precedence_order() {
        // ---
        assert_eq!(message(None), "options is required");

        let mut options = MqOptions::default();
        assert_eq!(message(Some(&options)), "options.url is required");

        options.url = Some("memory://".into());
        assert_eq!(message(Some(&options)), "options.name is required");

        options.name = Some("svc".into());
        assert_eq!(message(Some(&options)), "options.type is required");

        options.kind = Some("type".into());
        assert_eq!(message(Some(&options)), "options.type is not correct type");

        options.kind = Some("queue".into());
        assert_eq!(message(Some(&options)), "options.queueName is required");

        options.kind = Some("exchange".into());
        assert_eq!(message(Some(&options)), "options.exchangeName is required");

        options.exchange_name = Some("events".into());
        assert_eq!(message(Some(&options)), "options.exchangeType is required");

        options.exchange_type = Some("topic".into());
        assert_eq!(message(Some(&options)), "options.routingPrefix is required");

        options.routing_prefix = Some("svc.".into());
        assert_eq!(message(Some(&options)), "");
    }

    #[test]
    fn test_queue_config() {
        // ---
        let options = MqOptions::queue("memory://", "svc", "orders").with_durable(true);
        let config = ClientConfig::validate(Some(&driver()), Some(&options)).unwrap();

        assert_eq!(config.identity.as_str(), "svc.orders");
        assert_eq!(
            config.topology,
            Topology::Queue {
                name: "orders".into(),
                durable: true
            }
        );
        assert_eq!(config.message, MessageOptions::default());
        assert_eq!(config.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn test_exchange_config() {
        // ---
        let options = MqOptions::exchange("memory://", "svc", "events", "topic", "svc.");
        let config = ClientConfig::validate(Some(&driver()), Some(&options)).unwrap();

        assert_eq!(config.identity.as_str(), "svc.events");
        assert_eq!(
            config.topology,
            Topology::Exchange {
                name: "events".into(),
                kind: ExchangeKind::Topic,
                routing_prefix: "svc.".into(),
                durable: false,
            }
        );
        assert!(config.topology.queue_name().is_none());
    }

    #[test]
    fn test_message_options() {
        // ---
        let plain = MessageOptions::default();
        assert_eq!(plain.version(), "1");
        assert_eq!(plain.qualified_name("orderCreated"), "orderCreated");

        let options = MqOptions::queue("memory://", "svc", "orders")
            .with_service_name("svc")
            .with_message_version("2");
        let msg = options.msg.unwrap();
        assert_eq!(msg.version(), "2");
        assert_eq!(msg.qualified_name("orderCreated"), "svc.orderCreated");
    }

    #[test]
    fn test_deserialize_camel_case() {
        // ---
        let options: MqOptions = serde_json::from_str(
            r#"{
                "url": "amqp://localhost",
                "name": "svc",
                "type": "exchange",
                "exchangeName": "events",
                "exchangeType": "fanout",
                "routingPrefix": "",
                "durable": true,
                "msg": { "serviceName": "svc" }
            }"#,
        )
        .unwrap();

        let config = ClientConfig::validate(Some(&driver()), Some(&options)).unwrap();
        assert_eq!(config.identity.as_str(), "svc.events");
        assert!(matches!(
            config.topology,
            Topology::Exchange {
                kind: ExchangeKind::Fanout,
                durable: true,
                ..
            }
        ));
        assert_eq!(config.message.service_name.as_deref(), Some("svc"));
    }
}
